use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A commit record from the history source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,
}

impl CommitInfo {
    /// Build a commit from a full message; the first line becomes the subject.
    pub fn from_message(hash: impl Into<String>, message: &str) -> Self {
        let message = message.trim();
        let (subject, body) = match message.split_once('\n') {
            Some((subject, body)) => (subject.trim(), body.trim()),
            None => (message, ""),
        };
        Self {
            hash: hash.into(),
            subject: subject.to_string(),
            body: body.to_string(),
            author: String::new(),
            date: String::new(),
        }
    }

    pub fn message(&self) -> String {
        if self.body.is_empty() {
            self.subject.clone()
        } else {
            format!("{}\n\n{}", self.subject, self.body)
        }
    }

    pub fn short_hash(&self) -> &str {
        &self.hash[..7.min(self.hash.len())]
    }

    /// Commits opting out of analysis with `[skip release]` or `[release skip]`.
    pub fn skips_release(&self) -> bool {
        let message = self.message().to_lowercase();
        message.contains("[skip release]") || message.contains("[release skip]")
    }
}

/// A commit message interpreted under the conventional-commits convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConventionalCommit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub description: String,
    /// `!` before the colon, or a `BREAKING CHANGE:` footer.
    pub breaking: bool,
    /// `!` marker in the header only.
    pub bang: bool,
    /// Text of `BREAKING CHANGE:` footers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub breaking_notes: Vec<String>,
    pub revert: bool,
    pub merge: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<u64>,
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<type>[A-Za-z]+)(?:\((?P<scope>[^()]*)\))?(?P<bang>!)?: (?P<subject>.+)$")
            .expect("Invalid regex pattern")
    })
}

fn breaking_note_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^BREAKING[ -]CHANGES?:[ \t]*(?P<text>.*(?:\n[^\n].*)*)")
            .expect("Invalid regex pattern")
    })
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[\s(])#(?P<num>\d+)\b").expect("Invalid regex pattern"))
}

fn is_merge_subject(subject: &str) -> bool {
    let lower = subject.to_lowercase();
    lower.starts_with("merge pull request")
        || lower.starts_with("merge branch")
        || lower.starts_with("merge remote-tracking")
}

impl ConventionalCommit {
    pub fn parse(commit: &CommitInfo) -> Self {
        let subject = commit.subject.trim();
        let merge = is_merge_subject(subject);

        let mut references: Vec<u64> = reference_regex()
            .captures_iter(&commit.message())
            .filter_map(|caps| caps["num"].parse().ok())
            .collect();
        references.sort_unstable();
        references.dedup();

        let breaking_notes: Vec<String> = breaking_note_regex()
            .captures_iter(&commit.body)
            .map(|caps| caps["text"].trim().to_string())
            .filter(|text| !text.is_empty())
            .collect();

        let Some(caps) = header_regex().captures(subject) else {
            let revert = subject.starts_with("Revert \"");
            return Self {
                kind: None,
                scope: None,
                description: subject.to_string(),
                breaking: !breaking_notes.is_empty(),
                bang: false,
                breaking_notes,
                revert,
                merge,
                references,
            };
        };

        let kind = caps["type"].to_lowercase();
        let bang = caps.name("bang").is_some();
        let description = caps["subject"].trim().to_string();

        Self {
            revert: kind == "revert",
            kind: Some(kind),
            scope: caps
                .name("scope")
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty()),
            breaking: bang || !breaking_notes.is_empty(),
            bang,
            description,
            breaking_notes,
            merge,
            references,
        }
    }
}

/// Parse `git log` output produced with [`LOG_FORMAT`](super::LOG_FORMAT).
pub(crate) fn parse_log_records(stdout: &str) -> Vec<CommitInfo> {
    stdout
        .split('\x1e')
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            let mut fields = record.splitn(4, '\x1f');
            let hash = fields.next()?.trim();
            if hash.is_empty() {
                return None;
            }
            let author = fields.next().unwrap_or_default().trim().to_string();
            let date = fields.next().unwrap_or_default().trim().to_string();
            let message = fields.next().unwrap_or_default();
            let mut commit = CommitInfo::from_message(hash, message);
            commit.author = author;
            commit.date = date;
            Some(commit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(message: &str) -> ConventionalCommit {
        ConventionalCommit::parse(&CommitInfo::from_message("abc1234def", message))
    }

    #[test]
    fn parse_feature_with_scope() {
        let commit = parse("feat(api): add endpoint");
        assert_eq!(commit.kind.as_deref(), Some("feat"));
        assert_eq!(commit.scope.as_deref(), Some("api"));
        assert_eq!(commit.description, "add endpoint");
        assert!(!commit.breaking);
    }

    #[test]
    fn parse_bang_marks_breaking() {
        let commit = parse("feat!: drop python 3.8");
        assert!(commit.breaking);
        assert!(commit.bang);
        assert!(commit.breaking_notes.is_empty());
    }

    #[test]
    fn parse_breaking_footer() {
        let commit = parse("fix: change token format\n\nBREAKING CHANGE: tokens are now JWTs");
        assert!(commit.breaking);
        assert!(!commit.bang);
        assert_eq!(
            commit.breaking_notes,
            vec!["tokens are now JWTs".to_string()]
        );
    }

    #[test]
    fn parse_breaking_hyphen_footer() {
        let commit = parse("refactor: x\n\nBREAKING-CHANGE: removed y");
        assert!(commit.breaking);
    }

    #[test]
    fn parse_non_conventional_subject() {
        let commit = parse("Random commit message");
        assert_eq!(commit.kind, None);
        assert_eq!(commit.description, "Random commit message");
    }

    #[test]
    fn parse_merge_commit() {
        let commit = parse("Merge pull request #45 from feature-branch");
        assert!(commit.merge);
        assert_eq!(commit.references, vec![45]);
    }

    #[test]
    fn parse_revert_forms() {
        assert!(parse("revert: feat: add B").revert);
        assert!(parse("Revert \"feat: add B\"").revert);
    }

    #[test]
    fn parse_collects_issue_references() {
        let commit = parse("fix: handle empty ledger (#12)\n\nCloses #7, refs #12");
        assert_eq!(commit.references, vec![7, 12]);
    }

    #[test]
    fn skip_release_marker() {
        assert!(CommitInfo::from_message("a", "feat: x [skip release]").skips_release());
        assert!(CommitInfo::from_message("a", "fix: y\n\n[release skip]").skips_release());
        assert!(!CommitInfo::from_message("a", "fix: y").skips_release());
    }

    #[test]
    fn parse_log_records_splits_fields() {
        let stdout = "abc123\x1fAda\x1f2026-10-01T10:00:00+00:00\x1ffeat: add B\n\nbody line\n\x1e\ndef456\x1fBob\x1f2026-09-30T10:00:00+00:00\x1ffix: bug A\n\x1e\n";
        let commits = parse_log_records(stdout);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, "abc123");
        assert_eq!(commits[0].subject, "feat: add B");
        assert_eq!(commits[0].body, "body line");
        assert_eq!(commits[0].author, "Ada");
        assert_eq!(commits[1].subject, "fix: bug A");
    }
}

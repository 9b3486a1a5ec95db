use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::git::CommitInfo;
use crate::hosting::PublishedRelease;
use crate::version::{self, ReleaseType};

/// Context fields a step can require or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    CurrentVersion,
    Commits,
    NextVersion,
    Notes,
    FileEdits,
    Artifacts,
    GitTag,
    Releases,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::CurrentVersion => "currentVersion",
            Field::Commits => "commits",
            Field::NextVersion => "nextVersion",
            Field::Notes => "notes",
            Field::FileEdits => "fileEdits",
            Field::Artifacts => "artifacts",
            Field::GitTag => "gitTag",
            Field::Releases => "releases",
        }
    }

    /// Fields the orchestrator seeds before the first step runs.
    pub fn seeded() -> &'static [Field] {
        &[Field::CurrentVersion, Field::Commits]
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRelease {
    pub version: String,
    pub git_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,
}

/// A content mutation of one working-tree file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEdit {
    pub path: String,
    #[serde(skip_serializing)]
    pub original: Option<String>,
    #[serde(skip_serializing)]
    pub content: String,
    pub replacements: usize,
    /// False in dry runs: the edit was computed but not written.
    pub written: bool,
}

impl FileEdit {
    pub fn new(path: impl Into<String>, original: Option<String>, content: String) -> Self {
        Self {
            path: path.into(),
            original,
            content,
            replacements: 0,
            written: false,
        }
    }

    pub fn changed(&self) -> bool {
        self.original.as_deref() != Some(self.content.as_str())
    }
}

/// Mutable state threaded through every step of one release run.
///
/// Created fresh per run and discarded afterwards. Steps receive it by value
/// and hand it back, so there is exactly one owner at any time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseContext {
    pub repository_url: String,
    pub branch: String,
    pub tag_format: String,
    pub release_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_release: Option<LastRelease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    release_type: Option<ReleaseType>,
    pub commits: Vec<CommitInfo>,
    #[serde(skip_serializing_if = "String::is_empty")]
    notes: String,
    pub file_edits: BTreeMap<String, FileEdit>,
    pub artifacts: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_tag: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub releases: Vec<PublishedRelease>,
    /// Non-fatal problems reported by steps, in the order they occurred.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ReleaseContext {
    pub fn new(
        repository_url: impl Into<String>,
        branch: impl Into<String>,
        tag_format: impl Into<String>,
    ) -> Self {
        Self {
            repository_url: repository_url.into(),
            branch: branch.into(),
            tag_format: tag_format.into(),
            release_date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            last_release: None,
            current_version: None,
            next_version: None,
            release_type: None,
            commits: Vec::new(),
            notes: String::new(),
            file_edits: BTreeMap::new(),
            artifacts: BTreeSet::new(),
            git_tag: None,
            releases: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = Some(version.into());
        self
    }

    pub fn with_last_release(mut self, last_release: LastRelease) -> Self {
        if self.current_version.is_none() {
            self.current_version = Some(last_release.version.clone());
        }
        self.last_release = Some(last_release);
        self
    }

    pub fn with_commits(mut self, commits: Vec<CommitInfo>) -> Self {
        self.commits = commits;
        self
    }

    pub fn with_release_date(mut self, date: impl Into<String>) -> Self {
        self.release_date = date.into();
        self
    }

    pub fn next_version(&self) -> Option<&str> {
        self.next_version.as_deref()
    }

    pub fn release_type(&self) -> Option<ReleaseType> {
        self.release_type
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn current(&self) -> Result<Option<Version>> {
        self.current_version.as_deref().map(version::parse).transpose()
    }

    /// Assign the version being released.
    ///
    /// Once set, only the identical value may be assigned again, and the
    /// version can never be at or below the current version.
    pub fn set_next_version(&mut self, next: &Version, release_type: ReleaseType) -> Result<()> {
        let next_str = next.to_string();
        if let Some(existing) = &self.next_version {
            if *existing == next_str {
                return Ok(());
            }
            return Err(Error::context_conflict(
                Field::NextVersion.as_str(),
                format!("already set to {}, refusing {}", existing, next_str),
            ));
        }
        if let Some(current) = self.current()? {
            if *next <= current {
                return Err(Error::context_conflict(
                    Field::NextVersion.as_str(),
                    format!("{} is not greater than current version {}", next, current),
                ));
            }
        }
        self.next_version = Some(next_str);
        self.release_type = Some(release_type);
        Ok(())
    }

    /// Append a block of release notes. Notes are never rewritten within a run.
    pub fn append_notes(&mut self, notes: &str) {
        let notes = notes.trim();
        if notes.is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push_str("\n\n");
        }
        self.notes.push_str(notes);
    }

    pub fn record_edit(&mut self, edit: FileEdit) {
        self.file_edits.insert(edit.path.clone(), edit);
    }

    /// Variables available to `${...}` templates.
    pub fn template_vars(&self) -> serde_json::Value {
        let next_tag = self
            .git_tag
            .clone()
            .or_else(|| {
                self.next_version
                    .as_deref()
                    .map(|v| version::render_tag(&self.tag_format, v))
            });
        serde_json::json!({
            "version": self.next_version,
            "branch": self.branch,
            "repositoryUrl": self.repository_url,
            "nextRelease": {
                "version": self.next_version,
                "type": self.release_type.map(|t| t.as_str()),
                "gitTag": next_tag,
                "name": next_tag,
                "notes": self.notes,
            },
            "lastRelease": self.last_release.as_ref().map(|last| serde_json::json!({
                "version": last.version,
                "gitTag": last.git_tag,
                "gitHead": last.git_head,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ReleaseContext {
        ReleaseContext::new("https://github.com/o/r", "main", "${version}")
            .with_current_version("1.2.0")
    }

    #[test]
    fn next_version_is_set_once() {
        let mut ctx = context();
        ctx.set_next_version(&Version::new(1, 3, 0), ReleaseType::Minor)
            .unwrap();
        ctx.set_next_version(&Version::new(1, 3, 0), ReleaseType::Minor)
            .unwrap();

        let err = ctx
            .set_next_version(&Version::new(2, 0, 0), ReleaseType::Major)
            .unwrap_err();
        assert_eq!(err.code.as_str(), "context.conflict");
        assert_eq!(ctx.next_version(), Some("1.3.0"));
    }

    #[test]
    fn next_version_never_lowers_current() {
        let mut ctx = context();
        assert!(ctx
            .set_next_version(&Version::new(1, 1, 0), ReleaseType::Minor)
            .is_err());
        assert!(ctx
            .set_next_version(&Version::new(1, 2, 0), ReleaseType::Patch)
            .is_err());
        assert_eq!(ctx.next_version(), None);
    }

    #[test]
    fn notes_are_append_only() {
        let mut ctx = context();
        ctx.append_notes("first");
        ctx.append_notes("   ");
        ctx.append_notes("second\n");
        assert_eq!(ctx.notes(), "first\n\nsecond");
    }

    #[test]
    fn file_edit_detects_unchanged_content() {
        let same = FileEdit::new("a", Some("x".to_string()), "x".to_string());
        let created = FileEdit::new("b", None, "x".to_string());
        assert!(!same.changed());
        assert!(created.changed());
    }

    #[test]
    fn template_vars_expose_next_release() {
        let mut ctx = context();
        ctx.set_next_version(&Version::new(1, 3, 0), ReleaseType::Minor)
            .unwrap();
        ctx.append_notes("## 1.3.0");

        let vars = ctx.template_vars();
        assert_eq!(vars["nextRelease"]["version"], "1.3.0");
        assert_eq!(vars["nextRelease"]["gitTag"], "1.3.0");
        assert_eq!(vars["nextRelease"]["notes"], "## 1.3.0");
        assert_eq!(vars["version"], "1.3.0");
    }
}

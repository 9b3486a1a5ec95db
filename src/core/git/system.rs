use std::path::PathBuf;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::utils::command;

use super::commits::parse_log_records;
use super::{redact_remote, CommitInfo, GitOutput, Vcs, LOG_FORMAT};

/// Branch variables CI providers set when HEAD is detached.
const CI_BRANCH_VARS: [&str; 3] = ["GITHUB_REF_NAME", "CI_COMMIT_BRANCH", "BRANCH_NAME"];

/// [`Vcs`] backed by the system `git` binary.
pub struct SystemGit {
    root: PathBuf,
}

impl SystemGit {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(&self, args: &[&str], context: &str) -> Result<String> {
        command::run_in(&self.root, "git", args, context)
            .map_err(|e| Error::git_command_failed(e.message))
    }

    fn write(&self, action: &str, args: &[&str], deadline: Option<Instant>) -> Result<GitOutput> {
        let output = command::capture_in(&self.root, "git", args, action, deadline)?;
        Ok(GitOutput {
            action: action.to_string(),
            success: output.success,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

impl Vcs for SystemGit {
    fn current_branch(&self) -> Result<String> {
        let branch = self.read(&["rev-parse", "--abbrev-ref", "HEAD"], "git rev-parse")?;
        if branch != "HEAD" {
            return Ok(branch);
        }
        CI_BRANCH_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                Error::git_command_failed("HEAD is detached and no CI branch variable is set")
                    .with_hint("Check out the release branch before running a release")
            })
    }

    fn rev_parse(&self, reference: &str) -> Result<String> {
        // Peel annotated tags to the commit they point at.
        let spec = format!("{}^{{commit}}", reference);
        self.read(&["rev-parse", &spec], "git rev-parse")
    }

    fn tags(&self) -> Result<Vec<String>> {
        let stdout = self.read(&["tag", "--merged", "HEAD"], "git tag")?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn commits_since(&self, tag: Option<&str>) -> Result<Vec<CommitInfo>> {
        let range = tag
            .map(|t| format!("{}..HEAD", t))
            .unwrap_or_else(|| "HEAD".to_string());
        let stdout = self.read(&["log", LOG_FORMAT, &range], "git log")?;
        Ok(parse_log_records(&stdout))
    }

    fn stage(&self, paths: &[String], deadline: Option<Instant>) -> Result<GitOutput> {
        if paths.is_empty() {
            return Ok(GitOutput::ok("add"));
        }
        let mut args = vec!["add", "--force", "--ignore-errors", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.write("add", &args, deadline)
    }

    fn has_staged_changes(&self, deadline: Option<Instant>) -> Result<bool> {
        let output = command::capture_in(
            &self.root,
            "git",
            &["diff", "--cached", "--quiet"],
            "git diff",
            deadline,
        )?;
        match output.exit_code {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::git_command_failed(format!(
                "git diff --cached failed: {}",
                output.error_text()
            ))),
        }
    }

    fn commit(&self, message: &str, deadline: Option<Instant>) -> Result<GitOutput> {
        self.write("commit", &["commit", "-m", message], deadline)
    }

    fn tag(&self, name: &str, message: &str, deadline: Option<Instant>) -> Result<GitOutput> {
        self.write("tag", &["tag", "-a", name, "-m", message], deadline)
    }

    fn push(
        &self,
        remote: &str,
        branch: &str,
        tag: &str,
        deadline: Option<Instant>,
    ) -> Result<GitOutput> {
        let branch_ref = format!("HEAD:refs/heads/{}", branch);
        let tag_ref = format!("refs/tags/{}", tag);
        let mut output = self.write(
            "push",
            &["push", "--atomic", remote, &branch_ref, &tag_ref],
            deadline,
        )?;
        // git echoes the remote URL back on failure; keep tokens out of reports.
        if remote.contains('@') {
            let redacted = redact_remote(remote);
            output.stderr = output.stderr.replace(remote, &redacted);
            output.stdout = output.stdout.replace(remote, &redacted);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("Failed to run git");
        assert!(status.status.success(), "git {:?} failed", args);
    }

    fn init_repo() -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        git(dir, &["init", "-q", "-b", "main"]);
        git(dir, &["config", "user.email", "release@example.com"]);
        git(dir, &["config", "user.name", "Release Bot"]);
        git(dir, &["config", "commit.gpgsign", "false"]);
        git(dir, &["config", "tag.gpgsign", "false"]);
        temp_dir
    }

    fn commit_file(dir: &Path, name: &str, message: &str) {
        fs::write(dir.join(name), message).unwrap();
        git(dir, &["add", name]);
        git(dir, &["commit", "-q", "-m", message]);
    }

    #[test]
    fn commits_since_tag_reads_newest_first() {
        let repo = init_repo();
        let dir = repo.path();
        commit_file(dir, "a.txt", "chore: initial");
        git(dir, &["tag", "1.2.0"]);
        commit_file(dir, "b.txt", "fix: bug A");
        commit_file(dir, "c.txt", "feat: add B\n\nCloses #3");

        let vcs = SystemGit::new(dir);
        let commits = vcs.commits_since(Some("1.2.0")).unwrap();

        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].subject, "feat: add B");
        assert_eq!(commits[0].body, "Closes #3");
        assert_eq!(commits[0].author, "Release Bot");
        assert_eq!(commits[1].subject, "fix: bug A");
        assert_eq!(vcs.tags().unwrap(), vec!["1.2.0".to_string()]);
    }

    #[test]
    fn current_branch_reads_checked_out_branch() {
        let repo = init_repo();
        commit_file(repo.path(), "a.txt", "chore: initial");
        assert_eq!(SystemGit::new(repo.path()).current_branch().unwrap(), "main");
    }

    #[test]
    fn stage_commit_and_tag() {
        let repo = init_repo();
        let dir = repo.path();
        commit_file(dir, "a.txt", "chore: initial");
        fs::write(dir.join("CHANGELOG.md"), "# Changelog\n").unwrap();

        let vcs = SystemGit::new(dir);
        assert!(vcs.stage(&["CHANGELOG.md".to_string()], None).unwrap().success);
        assert!(vcs.has_staged_changes(None).unwrap());
        assert!(vcs.commit("chore(release): 1.0.0", None).unwrap().success);
        assert!(!vcs.has_staged_changes(None).unwrap());
        assert!(vcs.tag("1.0.0", "1.0.0", None).unwrap().success);
        assert_eq!(
            vcs.rev_parse("1.0.0").unwrap(),
            vcs.rev_parse("HEAD").unwrap()
        );

        let again = vcs.tag("1.0.0", "1.0.0", None).unwrap();
        assert!(!again.success);
        assert!(again.error_text().contains("already exists"));
    }

    #[test]
    fn push_to_missing_remote_reports_failure() {
        let repo = init_repo();
        commit_file(repo.path(), "a.txt", "chore: initial");
        let vcs = SystemGit::new(repo.path());
        vcs.tag("1.0.0", "1.0.0", None).unwrap();

        let output = vcs.push("no-such-remote", "main", "1.0.0", None).unwrap();
        assert!(!output.success);
    }

    #[test]
    fn tags_is_empty_for_untagged_history() {
        let repo = init_repo();
        commit_file(repo.path(), "a.txt", "chore: initial");
        assert!(SystemGit::new(repo.path()).tags().unwrap().is_empty());
    }

    #[test]
    fn tags_outside_a_repository_is_an_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let err = SystemGit::new(dir.path()).tags().unwrap_err();
        assert_eq!(err.code.as_str(), "git.command_failed");
    }
}

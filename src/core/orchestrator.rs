use std::path::Path;
use std::time::Duration;

use crate::config;
use crate::context::{LastRelease, ReleaseContext};
use crate::error::Result;
use crate::git::{SystemGit, Vcs};
use crate::hosting::{token_from_env, GitHubHost, ReleaseHost};
use crate::local_files::{FileSystem, LocalFs};
use crate::pipeline::{Pipeline, PipelineSpec, RunResult};
use crate::steps::{StepEnv, StepKind};
use crate::version;

pub const BRANCH_NOT_CONFIGURED: &str = "branch not configured for release";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Per-step deadline for external commands and requests.
    pub step_timeout: Option<Duration>,
}

/// Drives one release run: validate, seed the context, check the branch, run.
pub struct Orchestrator<'a> {
    root: &'a Path,
    fs: &'a dyn FileSystem,
    vcs: &'a dyn Vcs,
    host: Option<&'a dyn ReleaseHost>,
    token: Option<&'a str>,
    options: RunOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(root: &'a Path, fs: &'a dyn FileSystem, vcs: &'a dyn Vcs) -> Self {
        Self {
            root,
            fs,
            vcs,
            host: None,
            token: None,
            options: RunOptions::default(),
        }
    }

    pub fn with_host(mut self, host: &'a dyn ReleaseHost) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_token(mut self, token: Option<&'a str>) -> Self {
        self.token = token;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    fn env(&self) -> StepEnv<'a> {
        let env = StepEnv::new(self.root, self.fs, self.vcs)
            .with_token(self.token)
            .with_dry_run(self.options.dry_run);
        match self.host {
            Some(host) => env.with_host(host),
            None => env,
        }
    }

    /// Fresh context from repository state: branch, last release, commits since it.
    pub fn seed(&self, spec: &PipelineSpec) -> Result<ReleaseContext> {
        let branch = self.vcs.current_branch()?;
        let tags = self.vcs.tags()?;
        let mut context = ReleaseContext::new(&spec.repository_url, branch, &spec.tag_format);

        let last_tag = match version::latest_release_tag(&tags, &spec.tag_format) {
            Some((tag, last)) => {
                log_status!("release", "Last release is {} ({})", last, tag);
                let git_head = self.vcs.rev_parse(&tag)?;
                context = context.with_last_release(LastRelease {
                    version: last.to_string(),
                    git_tag: tag.clone(),
                    git_head: Some(git_head),
                });
                Some(tag)
            }
            None => {
                log_status!("release", "No previous release found");
                None
            }
        };

        let commits = self.vcs.commits_since(last_tag.as_deref())?;
        log_status!(
            "release",
            "Found {} commits since {}",
            commits.len(),
            last_tag.as_deref().unwrap_or("the first commit")
        );
        Ok(context.with_commits(commits))
    }

    pub fn run(&self, spec: &PipelineSpec) -> Result<RunResult> {
        let pipeline = Pipeline::from_spec(spec)?.with_step_timeout(self.options.step_timeout);
        let context = self.seed(spec)?;

        if !spec.allows_branch(&context.branch) {
            log_status!(
                "release",
                "Branch {} is not one of {}, skipping",
                context.branch,
                spec.branches.join(", ")
            );
            return Ok(pipeline.skip_all(context, BRANCH_NOT_CONFIGURED, self.options.dry_run));
        }

        let env = self.env();
        pipeline.verify(&env)?;
        if env.dry_run {
            log_status!("release", "Dry run: no files, tags or releases will be written");
        }
        Ok(pipeline.run(context, &env))
    }
}

/// Whether any configured step publishes to the hosting platform.
fn publishes_release(spec: &PipelineSpec) -> bool {
    spec.steps
        .iter()
        .any(|step| StepKind::resolve(&step.name) == Some(StepKind::ReleasePublisher))
}

/// Run the release for the repository at `dir` with the system git and GitHub.
pub fn run_in_dir(dir: &Path, config_path: Option<&str>, options: RunOptions) -> Result<RunResult> {
    let fs = LocalFs::new();
    let (path, spec) = config::resolve(&fs, dir, config_path)?;
    log_status!("release", "Using {}", path.display());

    let vcs = SystemGit::new(dir);
    let token = token_from_env();
    let host = if publishes_release(&spec) {
        GitHubHost::from_env(&spec.repository_url)?
    } else {
        None
    };

    let mut orchestrator = Orchestrator::new(dir, &fs, &vcs)
        .with_token(token.as_deref())
        .with_options(options);
    if let Some(host) = &host {
        orchestrator = orchestrator.with_host(host);
    }
    orchestrator.run(&spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{CommitInfo, GitOutput};
    use crate::pipeline::RunStatus;
    use crate::steps::testing::{commits, MemoryFs, RecordingHost, RecordingVcs};
    use std::cell::RefCell;
    use std::time::Instant;

    /// Repository with history; writes go to a [`RecordingVcs`].
    struct History {
        branch: &'static str,
        tags: Vec<String>,
        commits: Vec<CommitInfo>,
        since: RefCell<Option<String>>,
        writes: RecordingVcs,
    }

    impl History {
        fn new(tags: &[&str], messages: &[&str]) -> Self {
            Self {
                branch: "main",
                tags: tags.iter().map(|t| t.to_string()).collect(),
                commits: commits(messages),
                since: RefCell::new(None),
                writes: RecordingVcs::default(),
            }
        }
    }

    impl Vcs for History {
        fn current_branch(&self) -> Result<String> {
            Ok(self.branch.to_string())
        }

        fn rev_parse(&self, reference: &str) -> Result<String> {
            Ok(format!("sha-{}", reference))
        }

        fn tags(&self) -> Result<Vec<String>> {
            Ok(self.tags.clone())
        }

        fn commits_since(&self, tag: Option<&str>) -> Result<Vec<CommitInfo>> {
            *self.since.borrow_mut() = tag.map(String::from);
            Ok(self.commits.clone())
        }

        fn stage(&self, paths: &[String], deadline: Option<Instant>) -> Result<GitOutput> {
            self.writes.stage(paths, deadline)
        }

        fn has_staged_changes(&self, deadline: Option<Instant>) -> Result<bool> {
            self.writes.has_staged_changes(deadline)
        }

        fn commit(&self, message: &str, deadline: Option<Instant>) -> Result<GitOutput> {
            self.writes.commit(message, deadline)
        }

        fn tag(&self, name: &str, message: &str, deadline: Option<Instant>) -> Result<GitOutput> {
            self.writes.tag(name, message, deadline)
        }

        fn push(
            &self,
            remote: &str,
            branch: &str,
            tag: &str,
            deadline: Option<Instant>,
        ) -> Result<GitOutput> {
            self.writes.push(remote, branch, tag, deadline)
        }
    }

    fn reference_spec() -> PipelineSpec {
        serde_json::from_value(serde_json::json!({
            "branches": ["main"],
            "repositoryUrl": "https://github.com/o/r",
            "tagFormat": "${version}",
            "plugins": [
                ["@semantic-release/commit-analyzer", { "preset": "conventionalcommits" }],
                ["@semantic-release/release-notes-generator", { "preset": "conventionalcommits" }],
                ["@semantic-release/changelog", {
                    "changelogFile": "CHANGELOG.md",
                    "changelogTitle": "# Changelog"
                }],
                ["@google/semantic-release-replace-plugin", { "replacements": [{
                    "files": ["project/settings/settings.py"],
                    "pattern": "'VERSION': '[^']+'",
                    "replacement": "'VERSION': '${nextRelease.version}'"
                }]}],
                ["@semantic-release/git", {
                    "assets": ["CHANGELOG.md", "project/settings/settings.py", "package.json"],
                    "message": "chore(release): ${nextRelease.version}\n\n${nextRelease.notes}"
                }],
                ["@semantic-release/github", { "successComment": false }]
            ]
        }))
        .unwrap()
    }

    fn working_tree() -> MemoryFs {
        MemoryFs::default().with_file(
            "/repo/project/settings/settings.py",
            "SETTINGS = {'VERSION': '1.2.0'}\n",
        )
    }

    #[test]
    fn releases_next_minor_version() {
        let fs = working_tree();
        let vcs = History::new(&["1.1.0", "1.2.0"], &["fix: bug A", "feat: add B"]);
        let host = RecordingHost::default();

        let result = Orchestrator::new(Path::new("/repo"), &fs, &vcs)
            .with_host(&host)
            .run(&reference_spec())
            .unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.exit_code(), 0);
        assert_eq!(vcs.since.borrow().as_deref(), Some("1.2.0"));
        assert_eq!(result.context.next_version(), Some("1.3.0"));
        assert_eq!(
            result.context.last_release.as_ref().and_then(|l| l.git_head.as_deref()),
            Some("sha-1.2.0")
        );
        assert_eq!(
            vcs.writes.staged.borrow().clone(),
            vec![
                "CHANGELOG.md".to_string(),
                "project/settings/settings.py".to_string()
            ]
        );
        assert_eq!(
            fs.content("/repo/project/settings/settings.py").as_deref(),
            Some("SETTINGS = {'VERSION': '1.3.0'}\n")
        );
        let changelog = fs.content("/repo/CHANGELOG.md").unwrap();
        assert!(changelog.starts_with(
            "# Changelog\n\n## [1.3.0](https://github.com/o/r/compare/1.2.0...1.3.0)"
        ));
        assert_eq!(host.releases.borrow()[0].tag, "1.3.0");
        assert_eq!(result.context.git_tag.as_deref(), Some("1.3.0"));
    }

    #[test]
    fn nothing_releasable_is_skipped_without_side_effects() {
        let fs = working_tree();
        let vcs = History::new(&["1.2.0"], &["chore: tidy"]);
        let host = RecordingHost::default();

        let result = Orchestrator::new(Path::new("/repo"), &fs, &vcs)
            .with_host(&host)
            .run(&reference_spec())
            .unwrap();

        assert_eq!(result.status, RunStatus::Skipped);
        assert_eq!(result.exit_code(), 0);
        assert!(result.context.file_edits.is_empty());
        assert!(fs.writes.borrow().is_empty());
        assert!(vcs.writes.calls.borrow().is_empty());
        assert!(host.releases.borrow().is_empty());
    }

    #[test]
    fn first_release_reads_all_history() {
        let fs = working_tree();
        let vcs = History::new(&[], &["feat: initial feature"]);
        let host = RecordingHost::default();

        let result = Orchestrator::new(Path::new("/repo"), &fs, &vcs)
            .with_host(&host)
            .run(&reference_spec())
            .unwrap();

        assert_eq!(vcs.since.borrow().as_deref(), None);
        assert!(result.context.last_release.is_none());
        assert_eq!(result.context.next_version(), Some("1.0.0"));
    }

    #[test]
    fn unconfigured_branch_skips_every_step() {
        let fs = working_tree();
        let mut vcs = History::new(&["1.2.0"], &["feat: add B"]);
        vcs.branch = "feature/x";

        let result = Orchestrator::new(Path::new("/repo"), &fs, &vcs)
            .run(&reference_spec())
            .unwrap();

        assert_eq!(result.status, RunStatus::Skipped);
        assert_eq!(result.reason.as_deref(), Some(BRANCH_NOT_CONFIGURED));
        assert!(result
            .steps
            .iter()
            .all(|s| s.status == RunStatus::Skipped));
        assert!(vcs.writes.calls.borrow().is_empty());
    }

    #[test]
    fn missing_host_fails_before_any_step() {
        let fs = working_tree();
        let vcs = History::new(&["1.2.0"], &["feat: add B"]);

        let err = Orchestrator::new(Path::new("/repo"), &fs, &vcs)
            .run(&reference_spec())
            .unwrap_err();

        assert_eq!(err.code.as_str(), "step.execution_failed");
        assert!(fs.writes.borrow().is_empty());
        assert!(vcs.writes.calls.borrow().is_empty());
    }

    #[test]
    fn dry_run_computes_without_writing() {
        let fs = working_tree();
        let vcs = History::new(&["1.2.0"], &["feat: add B"]);

        let result = Orchestrator::new(Path::new("/repo"), &fs, &vcs)
            .with_options(RunOptions {
                dry_run: true,
                step_timeout: None,
            })
            .run(&reference_spec())
            .unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert!(result.dry_run);
        assert_eq!(result.context.next_version(), Some("1.3.0"));
        assert!(result.context.file_edits.contains_key("CHANGELOG.md"));
        assert!(fs.writes.borrow().is_empty());
        assert!(vcs.writes.calls.borrow().is_empty());
    }

    #[test]
    fn invalid_spec_is_rejected_before_seeding() {
        let fs = working_tree();
        let vcs = History::new(&["1.2.0"], &["feat: add B"]);
        let mut spec = reference_spec();
        spec.steps.swap(0, 4);

        let err = Orchestrator::new(Path::new("/repo"), &fs, &vcs)
            .run(&spec)
            .unwrap_err();

        assert_eq!(err.code.as_str(), "config.validation_failed");
        assert!(vcs.since.borrow().is_none());
    }

    #[test]
    fn publishes_release_detects_github_step() {
        assert!(publishes_release(&reference_spec()));
        assert!(!publishes_release(&PipelineSpec::default()));
    }
}

//! Release step registry.
//!
//! Step kinds form a closed set. Each kind has a typed option schema parsed
//! up front, a contract (fields it requires and writes, the kind of side
//! effect it performs) and an execute function.
//!
//! - `analyzer` - commit analysis and next-version computation
//! - `notes` - conventional-commits release notes
//! - `changelog` - changelog file prepending
//! - `replace` - regex version replacement in arbitrary files
//! - `git` - stage, commit, tag and push
//! - `github` - hosted release publication

mod analyzer;
mod changelog;
mod git;
mod github;
mod notes;
mod replace;

pub use analyzer::{analyze_commits, AnalyzerOptions, Preset, ReleaseRule, RuleRelease};
pub use changelog::{prepend_notes, ChangelogOptions};
pub use git::GitOptions;
pub use github::{GitHubOptions, SuccessComment};
pub use notes::{render_notes, NotesOptions};
pub use replace::{ReplaceOptions, ReplaceStep, Replacement};

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::{Field, FileEdit, ReleaseContext};
use crate::error::{Error, Result};
use crate::git::Vcs;
use crate::hosting::ReleaseHost;
use crate::local_files::FileSystem;

/// Side effect a step performs outside the release context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Pure,
    Filesystem,
    Vcs,
    Network,
}

impl Effect {
    /// Effects that must not happen during a dry run.
    pub fn is_external(&self) -> bool {
        matches!(self, Effect::Vcs | Effect::Network)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContract {
    pub requires: &'static [Field],
    pub writes: &'static [Field],
    pub effect: Effect,
    /// May appear more than once in a pipeline.
    pub idempotent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Analyzer,
    NotesGenerator,
    ChangelogWriter,
    TextReplacer,
    GitPublisher,
    ReleasePublisher,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::Analyzer,
        StepKind::NotesGenerator,
        StepKind::ChangelogWriter,
        StepKind::TextReplacer,
        StepKind::GitPublisher,
        StepKind::ReleasePublisher,
    ];

    /// Canonical short name.
    pub fn id(&self) -> &'static str {
        self.names()[0]
    }

    /// Every name the kind answers to in configuration files.
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            StepKind::Analyzer => &["commit-analyzer", "@semantic-release/commit-analyzer"],
            StepKind::NotesGenerator => &[
                "release-notes-generator",
                "@semantic-release/release-notes-generator",
            ],
            StepKind::ChangelogWriter => &["changelog", "@semantic-release/changelog"],
            StepKind::TextReplacer => &["replace", "@google/semantic-release-replace-plugin"],
            StepKind::GitPublisher => &["git", "@semantic-release/git"],
            StepKind::ReleasePublisher => &["github", "@semantic-release/github"],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StepKind::Analyzer => "Determine the release type from conventional commits",
            StepKind::NotesGenerator => "Generate release notes from the released commits",
            StepKind::ChangelogWriter => "Prepend the release notes to the changelog file",
            StepKind::TextReplacer => "Replace version strings in files using regex patterns",
            StepKind::GitPublisher => "Commit release assets, tag the release and push",
            StepKind::ReleasePublisher => "Publish a GitHub release and comment on resolved issues",
        }
    }

    pub fn resolve(name: &str) -> Option<StepKind> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.names().contains(&name))
    }

    pub fn contract(&self) -> StepContract {
        match self {
            StepKind::Analyzer => StepContract {
                requires: &[Field::Commits],
                writes: &[Field::NextVersion],
                effect: Effect::Pure,
                idempotent: true,
            },
            StepKind::NotesGenerator => StepContract {
                requires: &[Field::Commits, Field::NextVersion],
                writes: &[Field::Notes],
                effect: Effect::Pure,
                idempotent: false,
            },
            StepKind::ChangelogWriter => StepContract {
                requires: &[Field::Notes],
                writes: &[Field::FileEdits],
                effect: Effect::Filesystem,
                idempotent: false,
            },
            StepKind::TextReplacer => StepContract {
                requires: &[Field::NextVersion],
                writes: &[Field::FileEdits],
                effect: Effect::Filesystem,
                idempotent: true,
            },
            StepKind::GitPublisher => StepContract {
                requires: &[Field::NextVersion],
                writes: &[Field::GitTag, Field::Artifacts],
                effect: Effect::Vcs,
                idempotent: false,
            },
            StepKind::ReleasePublisher => StepContract {
                requires: &[Field::GitTag],
                writes: &[Field::Releases],
                effect: Effect::Network,
                idempotent: false,
            },
        }
    }

    /// First kind that writes `field`, used to suggest a fix for ordering problems.
    pub fn provider_of(field: Field) -> Option<StepKind> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.contract().writes.contains(&field))
    }
}

/// A step kind together with its validated options.
#[derive(Debug, Clone)]
pub enum Step {
    Analyzer(AnalyzerOptions),
    NotesGenerator(NotesOptions),
    ChangelogWriter(ChangelogOptions),
    TextReplacer(ReplaceStep),
    GitPublisher(GitOptions),
    ReleasePublisher(GitHubOptions),
}

/// External collaborators available to a running step.
#[derive(Clone, Copy)]
pub struct StepEnv<'a> {
    pub root: &'a Path,
    pub fs: &'a dyn FileSystem,
    pub vcs: &'a dyn Vcs,
    pub host: Option<&'a dyn ReleaseHost>,
    /// Credential injected into HTTPS push URLs.
    pub token: Option<&'a str>,
    pub dry_run: bool,
    pub deadline: Option<Instant>,
}

impl<'a> StepEnv<'a> {
    pub fn new(root: &'a Path, fs: &'a dyn FileSystem, vcs: &'a dyn Vcs) -> Self {
        Self {
            root,
            fs,
            vcs,
            host: None,
            token: None,
            dry_run: false,
            deadline: None,
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

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Absolute path of a working-tree relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// How a successful step hands control back to the pipeline.
#[derive(Debug)]
pub enum StepFlow {
    Continue(ReleaseContext),
    /// End the run without a release; remaining steps are skipped.
    Halt(ReleaseContext, String),
}

/// A failed step, with the context as the step left it.
#[derive(Debug)]
pub struct StepFailure {
    pub context: ReleaseContext,
    pub error: Error,
}

pub type StepResult = std::result::Result<StepFlow, Box<StepFailure>>;

/// Internal step return: keep going or halt the run.
#[derive(Debug)]
pub(crate) enum Control {
    Proceed,
    Halt(String),
}

impl Step {
    /// Resolve `name` and parse `options` into a typed step.
    pub fn parse(name: &str, options: &Map<String, Value>) -> Result<Step> {
        let kind = StepKind::resolve(name).ok_or_else(|| {
            Error::step_validation(
                name,
                None,
                format!(
                    "unknown step; known steps: {}",
                    StepKind::ALL
                        .iter()
                        .map(|k| k.id())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
        })?;

        match kind {
            StepKind::Analyzer => {
                let options: AnalyzerOptions = parse_options(name, options)?;
                options.validate(name)?;
                Ok(Step::Analyzer(options))
            }
            StepKind::NotesGenerator => Ok(Step::NotesGenerator(parse_options(name, options)?)),
            StepKind::ChangelogWriter => {
                let options: ChangelogOptions = parse_options(name, options)?;
                options.validate(name)?;
                Ok(Step::ChangelogWriter(options))
            }
            StepKind::TextReplacer => {
                let options: ReplaceOptions = parse_options(name, options)?;
                Ok(Step::TextReplacer(ReplaceStep::compile(name, options)?))
            }
            StepKind::GitPublisher => {
                let options: GitOptions = parse_options(name, options)?;
                options.validate(name)?;
                Ok(Step::GitPublisher(options))
            }
            StepKind::ReleasePublisher => {
                Ok(Step::ReleasePublisher(parse_options(name, options)?))
            }
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Analyzer(_) => StepKind::Analyzer,
            Step::NotesGenerator(_) => StepKind::NotesGenerator,
            Step::ChangelogWriter(_) => StepKind::ChangelogWriter,
            Step::TextReplacer(_) => StepKind::TextReplacer,
            Step::GitPublisher(_) => StepKind::GitPublisher,
            Step::ReleasePublisher(_) => StepKind::ReleasePublisher,
        }
    }

    pub fn contract(&self) -> StepContract {
        self.kind().contract()
    }

    /// Preconditions checked before any step of a real run executes.
    pub fn verify(&self, name: &str, env: &StepEnv) -> Result<()> {
        match self {
            Step::ReleasePublisher(_) if env.host.is_none() => Err(Error::step_execution(
                name,
                "no release host configured",
            )
            .with_hint("Set GITHUB_TOKEN or GH_TOKEN to publish GitHub releases")),
            _ => Ok(()),
        }
    }

    /// Run the step, moving the context in and handing it back.
    pub fn execute(&self, name: &str, mut context: ReleaseContext, env: &StepEnv) -> StepResult {
        let control = match self {
            Step::Analyzer(options) => analyzer::run(options, &mut context),
            Step::NotesGenerator(options) => notes::run(options, &mut context),
            Step::ChangelogWriter(options) => changelog::run(options, &mut context, env),
            Step::TextReplacer(step) => replace::run(name, step, &mut context, env),
            Step::GitPublisher(options) => git::run(options, &mut context, env),
            Step::ReleasePublisher(options) => github::run(name, options, &mut context, env),
        };

        match control {
            Ok(Control::Proceed) => Ok(StepFlow::Continue(context)),
            Ok(Control::Halt(reason)) => Ok(StepFlow::Halt(context, reason)),
            Err(error) => Err(Box::new(StepFailure {
                context,
                error: error.into_step_failure(name),
            })),
        }
    }
}

fn parse_options<T: DeserializeOwned>(step: &str, options: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(options.clone())).map_err(|e| {
        let message = e.to_string();
        Error::step_validation(step, option_in_message(&message), message)
    })
}

/// serde names the offending key in backticks: "unknown field `foo`, expected ...".
fn option_in_message(message: &str) -> Option<String> {
    if !message.starts_with("unknown field") && !message.starts_with("missing field") {
        return None;
    }
    let start = message.find('`')? + 1;
    let len = message[start..].find('`')?;
    Some(message[start..start + len].to_string())
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Check a path-or-glob option value at validation time.
pub(crate) fn validate_path_pattern(step: &str, field: &str, pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(Error::step_validation(
            step,
            Some(field.to_string()),
            "paths must not be empty",
        ));
    }
    if has_glob_chars(pattern) {
        glob::Pattern::new(pattern).map_err(|e| {
            Error::step_validation(
                step,
                Some(field.to_string()),
                format!("invalid glob '{}': {}", pattern, e),
            )
        })?;
    }
    Ok(())
}

/// Expand a working-tree relative path or glob into relative paths.
///
/// Plain paths are returned as-is whether or not they exist.
pub(crate) fn expand_paths(env: &StepEnv, pattern: &str) -> Result<Vec<String>> {
    if !has_glob_chars(pattern) {
        return Ok(vec![pattern.trim_start_matches("./").to_string()]);
    }

    let full = env.root.join(pattern);
    let paths = env
        .fs
        .glob(&full.to_string_lossy())?
        .into_iter()
        .filter_map(|path| {
            path.strip_prefix(env.root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    Ok(paths)
}

/// A working-tree file as seen by a step: on disk before the run, and as pending edits left it.
pub(crate) struct TrackedFile {
    pub path: String,
    pub original: Option<String>,
    pub current: Option<String>,
    replacements: usize,
    written: bool,
}

pub(crate) fn open_file(ctx: &ReleaseContext, env: &StepEnv, path: &str) -> Result<TrackedFile> {
    if let Some(edit) = ctx.file_edits.get(path) {
        return Ok(TrackedFile {
            path: path.to_string(),
            original: edit.original.clone(),
            current: Some(edit.content.clone()),
            replacements: edit.replacements,
            written: edit.written,
        });
    }
    let original = env.fs.read_optional(&env.path(path))?;
    Ok(TrackedFile {
        path: path.to_string(),
        current: original.clone(),
        original,
        replacements: 0,
        written: false,
    })
}

/// Record new content for a tracked file, writing it unless this is a dry run.
pub(crate) fn record_edit(
    ctx: &mut ReleaseContext,
    env: &StepEnv,
    file: TrackedFile,
    content: String,
    replacements: usize,
) -> Result<()> {
    let needs_write = file.current.as_deref() != Some(content.as_str());
    let mut edit = FileEdit::new(file.path, file.original, content);
    edit.replacements = file.replacements + replacements;
    edit.written = file.written;

    if !env.dry_run && needs_write {
        env.fs.write(&env.path(&edit.path), &edit.content)?;
        edit.written = true;
    }
    ctx.record_edit(edit);
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    use crate::error::{Error, Result};
    use crate::git::{CommitInfo, GitOutput, Vcs};
    use crate::hosting::{PublishedRelease, ReleaseHost, ReleaseRequest};
    use crate::local_files::FileSystem;

    /// In-memory working tree.
    #[derive(Default)]
    pub struct MemoryFs {
        pub files: RefCell<BTreeMap<PathBuf, String>>,
        pub writes: RefCell<Vec<PathBuf>>,
    }

    impl MemoryFs {
        pub fn with_file(self, path: impl Into<PathBuf>, content: &str) -> Self {
            self.files.borrow_mut().insert(path.into(), content.to_string());
            self
        }

        pub fn content(&self, path: impl AsRef<Path>) -> Option<String> {
            self.files.borrow().get(path.as_ref()).cloned()
        }
    }

    impl FileSystem for MemoryFs {
        fn read(&self, path: &Path) -> Result<String> {
            self.content(path).ok_or_else(|| {
                Error::internal_io("not found", Some(path.display().to_string()))
            })
        }

        fn write(&self, path: &Path, content: &str) -> Result<()> {
            self.files
                .borrow_mut()
                .insert(path.to_path_buf(), content.to_string());
            self.writes.borrow_mut().push(path.to_path_buf());
            Ok(())
        }

        fn exists(&self, path: &Path) -> bool {
            self.files.borrow().contains_key(path)
        }

        fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
            let pattern = glob::Pattern::new(pattern).map_err(|e| {
                Error::validation_invalid_argument("path", e.to_string(), None, None)
            })?;
            let options = glob::MatchOptions {
                require_literal_separator: true,
                ..glob::MatchOptions::new()
            };
            Ok(self
                .files
                .borrow()
                .keys()
                .filter(|path| pattern.matches_path_with(path, options))
                .cloned()
                .collect())
        }
    }

    /// Vcs that records every mutating call.
    #[derive(Default)]
    pub struct RecordingVcs {
        pub calls: RefCell<Vec<String>>,
        pub staged: RefCell<Vec<String>>,
        pub fail_action: Option<&'static str>,
        /// Action that hangs until the step deadline, then times out.
        pub stall_action: Option<&'static str>,
    }

    impl RecordingVcs {
        fn stall(&self, action: &str, deadline: Option<Instant>) -> Result<()> {
            if self.stall_action != Some(action) {
                return Ok(());
            }
            let Some(deadline) = deadline else {
                return Err(Error::internal_io(
                    format!("git {} hung with no deadline", action),
                    None,
                ));
            };
            let started = Instant::now();
            std::thread::sleep(deadline.saturating_duration_since(started));
            Err(Error::step_timeout(
                format!("git {}", action),
                deadline.saturating_duration_since(started).as_millis() as u64,
            ))
        }

        fn record(&self, action: &str, detail: String) -> GitOutput {
            self.calls.borrow_mut().push(format!("{} {}", action, detail));
            if self.fail_action == Some(action) {
                GitOutput::failed(action, format!("{} rejected", action))
            } else {
                GitOutput::ok(action)
            }
        }
    }

    impl Vcs for RecordingVcs {
        fn current_branch(&self) -> Result<String> {
            Ok("main".to_string())
        }

        fn rev_parse(&self, _reference: &str) -> Result<String> {
            Ok("0000000".to_string())
        }

        fn tags(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn commits_since(&self, _tag: Option<&str>) -> Result<Vec<CommitInfo>> {
            Ok(Vec::new())
        }

        fn stage(&self, paths: &[String], deadline: Option<Instant>) -> Result<GitOutput> {
            self.stall("add", deadline)?;
            self.staged.borrow_mut().extend(paths.iter().cloned());
            Ok(self.record("add", paths.join(" ")))
        }

        fn has_staged_changes(&self, _deadline: Option<Instant>) -> Result<bool> {
            Ok(!self.staged.borrow().is_empty())
        }

        fn commit(&self, message: &str, deadline: Option<Instant>) -> Result<GitOutput> {
            self.stall("commit", deadline)?;
            Ok(self.record("commit", message.lines().next().unwrap_or("").to_string()))
        }

        fn tag(&self, name: &str, _message: &str, deadline: Option<Instant>) -> Result<GitOutput> {
            self.stall("tag", deadline)?;
            Ok(self.record("tag", name.to_string()))
        }

        fn push(
            &self,
            remote: &str,
            branch: &str,
            tag: &str,
            deadline: Option<Instant>,
        ) -> Result<GitOutput> {
            self.stall("push", deadline)?;
            Ok(self.record("push", format!("{} {} {}", remote, branch, tag)))
        }
    }

    /// ReleaseHost that records releases and comments.
    #[derive(Default)]
    pub struct RecordingHost {
        pub releases: RefCell<Vec<ReleaseRequest>>,
        pub comments: RefCell<Vec<(u64, String)>>,
        pub fail_comments: bool,
    }

    impl ReleaseHost for RecordingHost {
        fn create_release(
            &self,
            request: &ReleaseRequest,
            _deadline: Option<Instant>,
        ) -> Result<PublishedRelease> {
            self.releases.borrow_mut().push(request.clone());
            Ok(PublishedRelease {
                name: request.name.clone(),
                tag: request.tag.clone(),
                url: Some(format!("https://github.com/o/r/releases/tag/{}", request.tag)),
                id: Some(1),
            })
        }

        fn comment_on_issue(&self, number: u64, body: &str, _deadline: Option<Instant>) -> Result<()> {
            if self.fail_comments {
                return Err(Error::remote_request_failed("comments", Some(403), "forbidden"));
            }
            self.comments.borrow_mut().push((number, body.to_string()));
            Ok(())
        }
    }

    pub fn commits(messages: &[&str]) -> Vec<CommitInfo> {
        messages
            .iter()
            .enumerate()
            .map(|(i, message)| CommitInfo::from_message(format!("{:07x}abcdef", i + 1), message))
            .collect()
    }
}

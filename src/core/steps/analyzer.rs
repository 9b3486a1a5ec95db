use serde::{Deserialize, Deserializer, Serialize};

use crate::context::ReleaseContext;
use crate::error::{Error, Result};
use crate::git::{CommitInfo, ConventionalCommit};
use crate::version::{self, ReleaseType};

use super::Control;

/// Commit convention used to read commit messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    #[default]
    #[serde(rename = "conventionalcommits")]
    ConventionalCommits,
    #[serde(rename = "angular")]
    Angular,
}

impl Preset {
    /// Angular only honors `BREAKING CHANGE:` footers, not the `!` marker.
    pub fn is_breaking(&self, commit: &ConventionalCommit) -> bool {
        match self {
            Preset::ConventionalCommits => commit.breaking,
            Preset::Angular => !commit.breaking_notes.is_empty(),
        }
    }
}

/// Release produced by a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleRelease {
    Bump(ReleaseType),
    /// `release: false`, matching commits never trigger a release.
    None,
}

impl<'de> Deserialize<'de> for RuleRelease {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => Ok(RuleRelease::None),
            Raw::Name(name) => ReleaseType::parse(&name).map(RuleRelease::Bump).ok_or_else(|| {
                serde::de::Error::custom(format!(
                    "invalid release '{}', expected major, minor, patch or false",
                    name
                ))
            }),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "invalid release true, expected major, minor, patch or false",
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseRule {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Exact scope or glob pattern.
    pub scope: Option<String>,
    pub breaking: Option<bool>,
    pub revert: Option<bool>,
    pub release: RuleRelease,
}

impl ReleaseRule {
    fn matches(&self, commit: &ConventionalCommit, breaking: bool) -> bool {
        if let Some(kind) = &self.kind {
            if commit.kind.as_deref() != Some(kind.as_str()) {
                return false;
            }
        }
        if let Some(pattern) = &self.scope {
            let Some(scope) = commit.scope.as_deref() else {
                return false;
            };
            let matched = glob::Pattern::new(pattern)
                .map(|p| p.matches(scope))
                .unwrap_or(false);
            if !matched && pattern != scope {
                return false;
            }
        }
        if self.breaking.is_some_and(|b| b != breaking) {
            return false;
        }
        if self.revert.is_some_and(|r| r != commit.revert) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct AnalyzerOptions {
    pub preset: Preset,
    /// Checked before the default rules; a commit matched here ignores the defaults.
    pub release_rules: Vec<ReleaseRule>,
}

impl AnalyzerOptions {
    pub(crate) fn validate(&self, step: &str) -> Result<()> {
        for (index, rule) in self.release_rules.iter().enumerate() {
            if rule.kind.is_none()
                && rule.scope.is_none()
                && rule.breaking.is_none()
                && rule.revert.is_none()
            {
                return Err(Error::step_validation(
                    step,
                    Some("releaseRules".to_string()),
                    format!("rule {} matches every commit; add type, scope, breaking or revert", index + 1),
                ));
            }
        }
        Ok(())
    }
}

fn default_release(commit: &ConventionalCommit, breaking: bool) -> Option<ReleaseType> {
    if breaking {
        return Some(ReleaseType::Major);
    }
    if commit.revert {
        return Some(ReleaseType::Patch);
    }
    match commit.kind.as_deref() {
        Some("feat") => Some(ReleaseType::Minor),
        Some("fix") | Some("perf") => Some(ReleaseType::Patch),
        _ => None,
    }
}

fn commit_release(commit: &ConventionalCommit, options: &AnalyzerOptions) -> Option<ReleaseType> {
    let breaking = options.preset.is_breaking(commit);
    let mut matched = options
        .release_rules
        .iter()
        .filter(|rule| rule.matches(commit, breaking))
        .peekable();

    if matched.peek().is_none() {
        return default_release(commit, breaking);
    }
    matched
        .filter_map(|rule| match rule.release {
            RuleRelease::Bump(release_type) => Some(release_type),
            RuleRelease::None => None,
        })
        .max()
}

/// Highest release type warranted by `commits`, or `None` when nothing is releasable.
pub fn analyze_commits(commits: &[CommitInfo], options: &AnalyzerOptions) -> Option<ReleaseType> {
    commits
        .iter()
        .filter(|commit| !commit.skips_release())
        .map(ConventionalCommit::parse)
        .filter(|commit| !commit.merge)
        .filter_map(|commit| commit_release(&commit, options))
        .max()
}

pub(super) fn run(options: &AnalyzerOptions, ctx: &mut ReleaseContext) -> Result<Control> {
    log_status!("release", "Analyzing {} commits", ctx.commits.len());

    let Some(release_type) = analyze_commits(&ctx.commits, options) else {
        log_status!("release", "No release-worthy commits, nothing to release");
        return Ok(Control::Halt(
            "no release-worthy changes since the last release".to_string(),
        ));
    };

    let current = ctx.current()?;
    let next = version::next_version(current.as_ref(), release_type)?;
    ctx.set_next_version(&next, release_type)?;

    match current {
        Some(current) => log_status!(
            "release",
            "Release type {}: {} -> {}",
            release_type,
            current,
            next
        ),
        None => log_status!("release", "First release: {}", next),
    }
    Ok(Control::Proceed)
}

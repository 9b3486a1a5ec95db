use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer};

use crate::context::ReleaseContext;
use crate::error::{Error, Result};
use crate::git::{CommitInfo, ConventionalCommit};
use crate::hosting::ReleaseRequest;
use crate::utils::template;
use crate::version;

use super::{Control, StepEnv};

const DEFAULT_SUCCESS_COMMENT: &str =
    ":tada: This issue has been resolved in version ${nextRelease.version} :tada:";
const DEFAULT_RELEASE_NAME: &str = "${nextRelease.gitTag}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessComment {
    Disabled,
    Template(String),
}

impl Default for SuccessComment {
    fn default() -> Self {
        SuccessComment::Template(DEFAULT_SUCCESS_COMMENT.to_string())
    }
}

impl<'de> Deserialize<'de> for SuccessComment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Template(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => SuccessComment::Disabled,
            Raw::Flag(true) => SuccessComment::default(),
            Raw::Template(template) => SuccessComment::Template(template),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct GitHubOptions {
    pub success_comment: SuccessComment,
    pub draft_release: bool,
    pub release_name_template: String,
}

impl Default for GitHubOptions {
    fn default() -> Self {
        Self {
            success_comment: SuccessComment::default(),
            draft_release: false,
            release_name_template: DEFAULT_RELEASE_NAME.to_string(),
        }
    }
}

/// Issue numbers referenced by the released commits.
fn referenced_issues(commits: &[CommitInfo]) -> BTreeSet<u64> {
    commits
        .iter()
        .filter(|c| !c.skips_release())
        .map(ConventionalCommit::parse)
        .filter(|c| !c.merge)
        .flat_map(|c| c.references)
        .collect()
}

pub(super) fn run(
    name: &str,
    options: &GitHubOptions,
    ctx: &mut ReleaseContext,
    env: &StepEnv,
) -> Result<Control> {
    let host = env
        .host
        .ok_or_else(|| Error::step_execution(name, "no release host configured"))?;
    let tag = ctx
        .git_tag
        .clone()
        .ok_or_else(|| Error::context_conflict("gitTag", "no tag to publish a release for"))?;

    let prerelease = match ctx.next_version() {
        Some(next) => !version::parse(next)?.pre.is_empty(),
        None => false,
    };

    let vars = ctx.template_vars();
    let request = ReleaseRequest {
        name: template::render(&options.release_name_template, &vars),
        tag,
        notes: ctx.notes().to_string(),
        draft: options.draft_release,
        prerelease,
    };

    log_status!("github", "Creating release {}", request.name);
    let release = host.create_release(&request, env.deadline)?;
    if let Some(url) = &release.url {
        log_status!("github", "Published {}", url);
    }
    ctx.releases.push(release);

    if let SuccessComment::Template(body) = &options.success_comment {
        let body = template::render(body, &vars);
        for issue in referenced_issues(&ctx.commits) {
            match host.comment_on_issue(issue, &body, env.deadline) {
                Ok(()) => log_status!("github", "Commented on #{}", issue),
                Err(e) => {
                    log_status!("github", "Could not comment on #{}: {}", issue, e.message);
                    ctx.warnings
                        .push(format!("Could not comment on #{}: {}", issue, e.message));
                }
            }
        }
    }

    Ok(Control::Proceed)
}

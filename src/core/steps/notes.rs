use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::context::ReleaseContext;
use crate::error::{Error, Result};
use crate::git::{CommitInfo, ConventionalCommit};
use crate::hosting::repository_web_url;
use crate::version::{self, ReleaseType};

use super::{Control, Preset};

/// Commit types that get a section, in display order.
const SECTIONS: [(&str, &str); 4] = [
    ("feat", "Features"),
    ("fix", "Bug Fixes"),
    ("perf", "Performance Improvements"),
    ("revert", "Reverts"),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct NotesOptions {
    pub preset: Preset,
    /// Link the heading to the compare view of the previous release.
    pub link_compare: bool,
    /// Link commit hashes and `#N` issue references.
    pub link_references: bool,
}

impl Default for NotesOptions {
    fn default() -> Self {
        Self {
            preset: Preset::default(),
            link_compare: true,
            link_references: true,
        }
    }
}

fn issue_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|[\s(])#(\d+)\b").expect("Invalid regex pattern"))
}

struct Entry {
    scope: Option<String>,
    text: String,
    hash: String,
}

impl Entry {
    fn render(&self, web_url: Option<&str>) -> String {
        let text = match web_url {
            Some(web) => issue_regex()
                .replace_all(&self.text, |caps: &regex::Captures| {
                    format!("{}[#{}]({}/issues/{})", &caps[1], &caps[2], web, &caps[2])
                })
                .into_owned(),
            None => self.text.clone(),
        };
        let scope = self
            .scope
            .as_deref()
            .map(|s| format!("**{}:** ", s))
            .unwrap_or_default();
        let short = &self.hash[..7.min(self.hash.len())];
        match web_url {
            Some(web) => format!("* {}{} ([{}]({}/commit/{}))", scope, text, short, web, self.hash),
            None if short.is_empty() => format!("* {}{}", scope, text),
            None => format!("* {}{} ({})", scope, text, short),
        }
    }
}

fn heading(ctx: &ReleaseContext, options: &NotesOptions, version: &str, web_url: Option<&str>) -> String {
    let patch = ctx.release_type() == Some(ReleaseType::Patch);
    let level = match (options.preset, patch) {
        (Preset::ConventionalCommits, true) => "###",
        (Preset::ConventionalCommits, false) => "##",
        (Preset::Angular, true) => "##",
        (Preset::Angular, false) => "#",
    };

    let compare = match (web_url, &ctx.last_release) {
        (Some(web), Some(last)) if options.link_compare => Some(format!(
            "{}/compare/{}...{}",
            web,
            last.git_tag,
            version::render_tag(&ctx.tag_format, version)
        )),
        _ => None,
    };

    match compare {
        Some(url) => format!("{} [{}]({}) ({})", level, version, url, ctx.release_date),
        None => format!("{} {} ({})", level, version, ctx.release_date),
    }
}

fn section(title: &str, entries: &[Entry], web_url: Option<&str>) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let bullets: Vec<String> = entries.iter().map(|e| e.render(web_url)).collect();
    Some(format!("### {}\n\n{}", title, bullets.join("\n")))
}

/// Release notes for `commits` in the conventional-changelog layout.
pub fn render_notes(
    ctx: &ReleaseContext,
    commits: &[CommitInfo],
    options: &NotesOptions,
) -> Result<String> {
    let version = ctx.next_version().ok_or_else(|| {
        Error::context_conflict("nextVersion", "release notes need a next version")
    })?;
    let web_url = repository_web_url(&ctx.repository_url);
    let links = if options.link_references {
        web_url.as_deref()
    } else {
        None
    };

    let mut breaking = Vec::new();
    let mut grouped: Vec<Vec<Entry>> = SECTIONS.iter().map(|_| Vec::new()).collect();

    for commit in commits.iter().filter(|c| !c.skips_release()) {
        let parsed = ConventionalCommit::parse(commit);
        if parsed.merge {
            continue;
        }

        if options.preset.is_breaking(&parsed) {
            let notes = if parsed.breaking_notes.is_empty() {
                vec![parsed.description.clone()]
            } else {
                parsed.breaking_notes.clone()
            };
            breaking.extend(notes.into_iter().map(|text| Entry {
                scope: parsed.scope.clone(),
                text,
                hash: commit.hash.clone(),
            }));
        }

        let kind = if parsed.revert {
            "revert"
        } else {
            parsed.kind.as_deref().unwrap_or_default()
        };
        if let Some(index) = SECTIONS.iter().position(|(k, _)| *k == kind) {
            grouped[index].push(Entry {
                scope: parsed.scope.clone(),
                text: parsed.description.clone(),
                hash: commit.hash.clone(),
            });
        }
    }

    let breaking_title = match options.preset {
        Preset::ConventionalCommits => "⚠ BREAKING CHANGES",
        Preset::Angular => "BREAKING CHANGES",
    };

    let mut blocks = vec![heading(ctx, options, version, web_url.as_deref())];
    blocks.extend(section(breaking_title, &breaking, links));
    for ((_, title), entries) in SECTIONS.iter().zip(&grouped) {
        blocks.extend(section(title, entries, links));
    }
    Ok(blocks.join("\n\n"))
}

pub(super) fn run(options: &NotesOptions, ctx: &mut ReleaseContext) -> Result<Control> {
    let notes = render_notes(ctx, &ctx.commits, options)?;
    log_status!("release", "Generated release notes ({} lines)", notes.lines().count());
    ctx.append_notes(&notes);
    Ok(Control::Proceed)
}

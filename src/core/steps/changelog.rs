use serde::Deserialize;

use crate::context::ReleaseContext;
use crate::error::{Error, Result};

use super::{open_file, record_edit, validate_path_pattern, Control, StepEnv};

const DEFAULT_CHANGELOG_FILE: &str = "CHANGELOG.md";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ChangelogOptions {
    pub changelog_file: String,
    pub changelog_title: Option<String>,
}

impl Default for ChangelogOptions {
    fn default() -> Self {
        Self {
            changelog_file: DEFAULT_CHANGELOG_FILE.to_string(),
            changelog_title: None,
        }
    }
}

impl ChangelogOptions {
    pub(crate) fn validate(&self, step: &str) -> Result<()> {
        validate_path_pattern(step, "changelogFile", &self.changelog_file)?;
        if self.changelog_file.contains(['*', '?', '[']) {
            return Err(Error::step_validation(
                step,
                Some("changelogFile".to_string()),
                "must be a single file, not a glob",
            ));
        }
        Ok(())
    }
}

/// Put `notes` at the top of `existing`, below `title` when one is configured.
///
/// Notes already at the top are not added twice.
pub fn prepend_notes(existing: &str, notes: &str, title: Option<&str>) -> String {
    let title = title.map(str::trim).filter(|t| !t.is_empty());
    let notes = notes.trim();

    let mut rest = existing.trim();
    if let Some(title) = title {
        if let Some(stripped) = rest.strip_prefix(title) {
            rest = stripped.trim();
        }
    }

    let mut content = if rest.starts_with(notes) {
        format!("{}\n", rest)
    } else {
        let mut content = format!("{}\n", notes);
        if !rest.is_empty() {
            content.push_str(&format!("\n{}\n", rest));
        }
        content
    };

    if let Some(title) = title {
        content = format!("{}\n\n{}", title, content);
    }
    content
}

pub(super) fn run(
    options: &ChangelogOptions,
    ctx: &mut ReleaseContext,
    env: &StepEnv,
) -> Result<Control> {
    if ctx.notes().is_empty() {
        log_status!("release", "No release notes, {} left unchanged", options.changelog_file);
        return Ok(Control::Proceed);
    }

    let file = open_file(ctx, env, &options.changelog_file)?;
    let existing = file.current.clone().unwrap_or_default();
    let content = prepend_notes(&existing, ctx.notes(), options.changelog_title.as_deref());

    log_status!(
        "release",
        "{} {}",
        if env.dry_run { "Would update" } else { "Updating" },
        options.changelog_file
    );
    record_edit(ctx, env, file, content, 0)?;
    Ok(Control::Proceed)
}

use regex::{NoExpand, Regex};
use serde::Deserialize;

use crate::context::ReleaseContext;
use crate::error::{Error, Result};
use crate::utils::template;

use super::{expand_paths, open_file, record_edit, validate_path_pattern, Control, StepEnv};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReplaceOptions {
    pub replacements: Vec<Replacement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Replacement {
    /// Paths or glob patterns relative to the working tree.
    pub files: Vec<String>,
    #[serde(alias = "from")]
    pub pattern: String,
    /// Template rendered against the release context, inserted literally.
    #[serde(alias = "to")]
    pub replacement: String,
    /// Fail when a file has no match.
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_strict() -> bool {
    true
}

#[derive(Debug, Clone)]
struct CompiledReplacement {
    files: Vec<String>,
    regex: Regex,
    replacement: String,
    strict: bool,
}

/// Replacements with their patterns compiled.
#[derive(Debug, Clone)]
pub struct ReplaceStep {
    replacements: Vec<CompiledReplacement>,
}

impl ReplaceStep {
    pub fn compile(step: &str, options: ReplaceOptions) -> Result<Self> {
        if options.replacements.is_empty() {
            return Err(Error::step_validation(
                step,
                Some("replacements".to_string()),
                "at least one replacement is required",
            ));
        }

        let mut replacements = Vec::with_capacity(options.replacements.len());
        for (index, replacement) in options.replacements.into_iter().enumerate() {
            let field = |name: &str| Some(format!("replacements[{}].{}", index, name));

            if replacement.files.is_empty() {
                return Err(Error::step_validation(
                    step,
                    field("files"),
                    "at least one file is required",
                ));
            }
            for file in &replacement.files {
                validate_path_pattern(step, &format!("replacements[{}].files", index), file)?;
            }

            let regex = Regex::new(&replacement.pattern).map_err(|e| {
                Error::step_validation(step, field("pattern"), format!("invalid regex: {}", e))
            })?;

            replacements.push(CompiledReplacement {
                files: replacement.files,
                regex,
                replacement: replacement.replacement,
                strict: replacement.strict,
            });
        }
        Ok(Self { replacements })
    }
}

fn apply(
    step: &str,
    replacement: &CompiledReplacement,
    ctx: &mut ReleaseContext,
    env: &StepEnv,
) -> Result<()> {
    let vars = ctx.template_vars();
    let missing = template::unresolved(&replacement.replacement, &vars);
    if !missing.is_empty() {
        return Err(Error::context_conflict(
            "replacement",
            format!("template values not available yet: {}", missing.join(", ")),
        ));
    }
    let value = template::render(&replacement.replacement, &vars);

    for pattern in &replacement.files {
        let paths = expand_paths(env, pattern)?;
        if paths.is_empty() && replacement.strict {
            return Err(Error::step_execution(
                step,
                format!("no files match '{}'", pattern),
            ));
        }

        for path in paths {
            let file = open_file(ctx, env, &path)?;
            let Some(current) = file.current.clone() else {
                return Err(Error::step_execution(
                    step,
                    format!("file not found: {}", path),
                ));
            };

            let count = replacement.regex.find_iter(&current).count();
            if count == 0 {
                if replacement.strict {
                    return Err(Error::step_execution(
                        step,
                        format!(
                            "pattern '{}' matched nothing in {}",
                            replacement.regex.as_str(),
                            path
                        ),
                    ));
                }
                log_status!("release", "No match in {}, skipping", path);
                continue;
            }

            let content = replacement
                .regex
                .replace_all(&current, NoExpand(&value))
                .into_owned();
            log_status!("release", "Replaced {} occurrence(s) in {}", count, path);
            record_edit(ctx, env, file, content, count)?;
        }
    }
    Ok(())
}

pub(super) fn run(
    name: &str,
    step: &ReplaceStep,
    ctx: &mut ReleaseContext,
    env: &StepEnv,
) -> Result<Control> {
    for replacement in &step.replacements {
        apply(name, replacement, ctx, env)?;
    }
    Ok(Control::Proceed)
}

//! String template rendering utilities.
//!
//! Placeholders use `${path}` syntax where `path` is a dot-separated lookup
//! into a JSON object, e.g. `${nextRelease.version}`. Placeholders that do not
//! resolve are left untouched.

use regex::{Captures, Regex};
use serde_json::Value;
use std::ops::Range;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}")
            .expect("Invalid placeholder pattern")
    })
}

fn lookup<'a>(vars: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(vars, |node, key| node.get(key))
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

pub fn render(template: &str, vars: &Value) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| {
            let path = &caps[1];
            lookup(vars, path)
                .and_then(stringify)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Placeholder paths in `template` that `vars` cannot resolve.
pub fn unresolved(template: &str, vars: &Value) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .filter(|caps| lookup(vars, &caps[1]).and_then(stringify).is_none())
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Every placeholder in `template`: its byte span and the path it names.
pub fn placeholders(template: &str) -> Vec<(Range<usize>, &str)> {
    placeholder_regex()
        .captures_iter(template)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let path = caps.get(1)?;
            Some((whole.range(), path.as_str()))
        })
        .collect()
}

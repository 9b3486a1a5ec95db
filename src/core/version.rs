use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::template;

/// Version assigned when no previous release exists.
pub const FIRST_RELEASE: &str = "1.0.0";

const VERSION_KEY: &str = "version";

const VERSION_CAPTURE: &str =
    r"(?P<version>\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?)";

/// Semantic version bump. Ordering follows precedence: patch < minor < major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    Patch,
    Minor,
    Major,
}

impl ReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::Patch => "patch",
            ReleaseType::Minor => "minor",
            ReleaseType::Major => "major",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "patch" => Some(ReleaseType::Patch),
            "minor" => Some(ReleaseType::Minor),
            "major" => Some(ReleaseType::Major),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse(version: &str) -> Result<Version> {
    Version::parse(version.trim().trim_start_matches('v')).map_err(|e| {
        Error::config_invalid_value("version", Some(version.to_string()), e.to_string())
    })
}

/// Increment a version. Pre-release and build metadata are dropped.
pub fn increment(version: &Version, release_type: ReleaseType) -> Version {
    match release_type {
        ReleaseType::Patch => Version::new(version.major, version.minor, version.patch + 1),
        ReleaseType::Minor => Version::new(version.major, version.minor + 1, 0),
        ReleaseType::Major => Version::new(version.major + 1, 0, 0),
    }
}

/// Next version from the last released one, or the first release when there is none.
pub fn next_version(current: Option<&Version>, release_type: ReleaseType) -> Result<Version> {
    match current {
        Some(version) => Ok(increment(version, release_type)),
        None => parse(FIRST_RELEASE),
    }
}

/// Ensure a tag format can round-trip a version.
pub fn validate_tag_format(tag_format: &str) -> Result<()> {
    let invalid = |problem: &str| -> Result<()> {
        Err(Error::config_invalid_value(
            "tagFormat",
            Some(tag_format.to_string()),
            problem,
        ))
    };

    let placeholders = template::placeholders(tag_format);
    if placeholders.iter().all(|(_, path)| *path != VERSION_KEY) {
        return invalid("must contain ${version}");
    }
    if placeholders.len() != 1 {
        return invalid("must contain ${version} exactly once and no other placeholder");
    }
    let rendered = render_tag(tag_format, "1.0.0");
    if rendered.chars().any(|c| c.is_whitespace() || c == '~' || c == '^' || c == ':') {
        return invalid("renders to an invalid git tag name");
    }
    Ok(())
}

pub fn render_tag(tag_format: &str, version: &str) -> String {
    template::render(tag_format, &serde_json::json!({ "version": version }))
}

fn tag_regex(tag_format: &str) -> Option<Regex> {
    let placeholders = template::placeholders(tag_format);
    let [(span, VERSION_KEY)] = placeholders.as_slice() else {
        return None;
    };
    let pattern = format!(
        "^{}{}{}$",
        regex::escape(&tag_format[..span.start]),
        VERSION_CAPTURE,
        regex::escape(&tag_format[span.end..])
    );
    Regex::new(&pattern).ok()
}

/// Extract the version a tag was created for, per the configured tag format.
pub fn version_from_tag(tag_format: &str, tag: &str) -> Option<Version> {
    let re = tag_regex(tag_format)?;
    let caps = re.captures(tag)?;
    Version::parse(caps.name("version")?.as_str()).ok()
}

/// Highest released (non pre-release) version among `tags` matching the tag format.
pub fn latest_release_tag(tags: &[String], tag_format: &str) -> Option<(String, Version)> {
    tags.iter()
        .filter_map(|tag| version_from_tag(tag_format, tag).map(|v| (tag.clone(), v)))
        .filter(|(_, v)| v.pre.is_empty())
        .max_by(|a, b| a.1.cmp(&b.1))
}

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::local_files::FileSystem;
use crate::pipeline::PipelineSpec;

/// Config file names, in lookup order.
pub const CONFIG_FILES: [&str; 6] = [
    ".releaserc",
    ".releaserc.json",
    ".releaserc.yaml",
    ".releaserc.yml",
    ".releaserc.toml",
    "release.config.json",
];

/// Script configs that cannot be evaluated here; only used to point at a conversion.
const SCRIPT_CONFIG_FILES: [&str; 4] = [
    "release.config.ts",
    "release.config.js",
    "release.config.cjs",
    "release.config.mjs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
    /// Extensionless `.releaserc`: JSON, falling back to YAML.
    JsonOrYaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::JsonOrYaml,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "JSON",
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Toml => "TOML",
            ConfigFormat::JsonOrYaml => "JSON or YAML",
        }
    }
}

fn parse_as<T: DeserializeOwned>(
    content: &str,
    format: ConfigFormat,
) -> std::result::Result<T, String> {
    match format {
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => serde_yml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::JsonOrYaml => match serde_json::from_str(content) {
            Ok(value) => Ok(value),
            Err(json_err) => serde_yml::from_str(content)
                .map_err(|yaml_err| format!("as JSON: {}; as YAML: {}", json_err, yaml_err)),
        },
    }
}

/// Parse a pipeline spec from config text.
pub fn parse(content: &str, format: ConfigFormat, source: &str) -> Result<PipelineSpec> {
    if content.trim().is_empty() {
        return Err(Error::config_parse_failed(source, format.label(), "file is empty"));
    }
    parse_as(content, format).map_err(|e| Error::config_parse_failed(source, format.label(), e))
}

/// First config file present in `dir`.
pub fn find(fs: &dyn FileSystem, dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| fs.exists(path))
}

pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<PipelineSpec> {
    let content = fs.read(path)?;
    parse(
        &content,
        ConfigFormat::from_path(path),
        &path.display().to_string(),
    )
}

fn not_found(fs: &dyn FileSystem, dir: &Path) -> Error {
    let err = Error::config_not_found(
        dir.display().to_string(),
        CONFIG_FILES.iter().map(|s| s.to_string()).collect(),
    );
    match SCRIPT_CONFIG_FILES
        .iter()
        .find(|name| fs.exists(&dir.join(name)))
    {
        Some(script) => err.with_hint(format!(
            "{} is a script config; move its exported object into .releaserc.json",
            script
        )),
        None => err,
    }
}

/// Locate and load the config for `dir`.
pub fn load_from_dir(fs: &dyn FileSystem, dir: &Path) -> Result<(PathBuf, PipelineSpec)> {
    let path = find(fs, dir).ok_or_else(|| not_found(fs, dir))?;
    let spec = load(fs, &path)?;
    Ok((path, spec))
}

/// Load from an explicit `--config` value: a path, or `-` for stdin.
pub fn load_explicit(fs: &dyn FileSystem, dir: &Path, spec: &str) -> Result<(PathBuf, PipelineSpec)> {
    use std::io::IsTerminal;

    if spec.trim() == "-" {
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            return Err(Error::validation_invalid_argument(
                "config",
                "Cannot read config from stdin when stdin is a TTY",
                None,
                None,
            ));
        }
        let mut buf = String::new();
        stdin
            .read_to_string(&mut buf)
            .map_err(|e| Error::internal_io(e.to_string(), Some("read stdin".to_string())))?;
        let parsed = parse(&buf, ConfigFormat::JsonOrYaml, "<stdin>")?;
        return Ok((PathBuf::from("-"), parsed));
    }

    let path = dir.join(spec);
    if !fs.exists(&path) {
        return Err(Error::config_not_found(
            dir.display().to_string(),
            vec![spec.to_string()],
        ));
    }
    let parsed = load(fs, &path)?;
    Ok((path, parsed))
}

/// Explicit `--config` value when given, otherwise the lookup in `dir`.
pub fn resolve(
    fs: &dyn FileSystem,
    dir: &Path,
    explicit: Option<&str>,
) -> Result<(PathBuf, PipelineSpec)> {
    match explicit {
        Some(spec) => load_explicit(fs, dir, spec),
        None => load_from_dir(fs, dir),
    }
}

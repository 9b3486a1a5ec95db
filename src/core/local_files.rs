use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Trait for working-tree file operations used by release steps.
pub trait FileSystem {
    fn read(&self, path: &Path) -> Result<String>;
    fn write(&self, path: &Path, content: &str) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;

    /// Files matching `pattern`, a glob over full paths, in sorted order.
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;

    /// Read a file that may legitimately be absent (e.g. a changelog on first release).
    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        if self.exists(path) {
            self.read(path).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Working tree on the local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(err: std::io::Error, action: &str, path: &Path) -> Error {
    let message = if err.kind() == std::io::ErrorKind::NotFound {
        format!("File not found: {}", path.display())
    } else {
        format!("{}: {}", path.display(), err)
    };
    Error::internal_io(message, Some(action.to_string()))
}

impl FileSystem for LocalFs {
    fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| io_error(e, "read file", path))
    }

    /// Writes a sibling temp file, then renames it over `path`.
    fn write(&self, path: &Path, content: &str) -> Result<()> {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(Error::internal_io(
                format!("Invalid path: {}", path.display()),
                Some("write file".to_string()),
            ));
        };

        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_error(e, "create directory", parent))?;
        }

        let staging = parent.join(format!(".{}.tmp", name.to_string_lossy()));
        fs::write(&staging, content).map_err(|e| io_error(e, "write temp file", &staging))?;
        fs::rename(&staging, path).map_err(|e| {
            let _ = fs::remove_file(&staging);
            io_error(e, "rename temp file", path)
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let entries = glob::glob(pattern).map_err(|e| {
            Error::validation_invalid_argument("path", e.to_string(), Some(pattern.to_string()), None)
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        Ok(paths)
    }
}

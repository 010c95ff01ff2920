//! Plugin name resolution

use std::path::{Path, PathBuf};

use super::PluginError;

/// Maps plugin names to executables
///
/// A name containing a path separator is used as-is. Bare names are looked up
/// in the configured plugin directories first, then on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct PluginResolver {
    dirs: Vec<PathBuf>,
    search_path: bool,
}

impl PluginResolver {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            search_path: true,
        }
    }

    /// Only look in the configured directories
    pub fn without_path_search(mut self) -> Self {
        self.search_path = false;
        self
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf, PluginError> {
        let not_found = |searched: String| PluginError::PluginNotFound {
            name: name.to_string(),
            searched,
        };

        if name.trim().is_empty() {
            return Err(not_found("nothing (empty name)".to_string()));
        }

        let candidate = Path::new(name);
        if candidate.is_absolute() || candidate.components().count() > 1 {
            return if is_executable(candidate) {
                Ok(candidate.to_path_buf())
            } else {
                Err(not_found(candidate.display().to_string()))
            };
        }

        let mut searched = self.dirs.clone();
        if self.search_path {
            if let Some(path) = std::env::var_os("PATH") {
                searched.extend(std::env::split_paths(&path));
            }
        }

        searched
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| is_executable(path))
            .ok_or_else(|| {
                not_found(
                    searched
                        .iter()
                        .map(|d| d.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                )
            })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

//! Stencil configuration
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. `--config <path>` - explicit file
//! 2. `.stencil/config.yaml` - project-level config
//! 3. `<platform config dir>/stencil/config.yaml` - global config
//! 4. Built-in defaults
//!
//! The first file found wins. `STENCIL_METADATA_URL` and `STENCIL_CACHE_DIR`
//! override whatever was loaded.
//!
//! ```yaml
//! metadata:
//!   url: https://stencil.dev/cli-data
//!   stale_after_secs: 86400
//! plugins:
//!   dirs: [/opt/stencil/plugins]
//!   timeout_secs: 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::metadata::MetadataPolicy;

pub const PROJECT_DIR: &str = ".stencil";
pub const CONFIG_FILE: &str = "config.yaml";
pub const ENV_METADATA_URL: &str = "STENCIL_METADATA_URL";
pub const ENV_CACHE_DIR: &str = "STENCIL_CACHE_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("Invalid config {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StencilConfig {
    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub plugins: PluginConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Base URL (or local directory) serving published metadata
    #[serde(default = "default_metadata_url")]
    pub url: String,

    /// Cache root; the platform cache dir when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Age after which the latest-version marker is refreshed
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            url: default_metadata_url(),
            cache_dir: None,
            stale_after_secs: default_stale_after(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Searched before `PATH`
    #[serde(default)]
    pub dirs: Vec<PathBuf>,

    #[serde(default = "default_plugin_timeout")]
    pub timeout_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            timeout_secs: default_plugin_timeout(),
        }
    }
}

fn default_metadata_url() -> String {
    "https://stencil.dev/cli-data".to_string()
}

fn default_stale_after() -> u64 {
    86400
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_plugin_timeout() -> u64 {
    5
}

impl StencilConfig {
    /// Load configuration for a project rooted at `project_root`
    pub fn load(explicit: Option<&Path>, project_root: &Path) -> Result<Self, ConfigError> {
        Self::load_with(
            explicit,
            project_root,
            global_config_path().as_deref(),
            |key| std::env::var(key).ok(),
        )
    }

    /// Same as [`StencilConfig::load`] with the global path and environment supplied
    pub fn load_with<E>(
        explicit: Option<&Path>,
        project_root: &Path,
        global: Option<&Path>,
        env: E,
    ) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut config = match explicit {
            Some(path) if !path.is_file() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Self::from_file(path)?,
            None => {
                let project = project_root.join(PROJECT_DIR).join(CONFIG_FILE);
                match std::iter::once(project.as_path())
                    .chain(global)
                    .find(|p| p.is_file())
                {
                    Some(path) => Self::from_file(path)?,
                    None => {
                        debug!("No config file found, using defaults");
                        Self::default()
                    }
                }
            }
        };

        if let Some(url) = env(ENV_METADATA_URL).filter(|v| !v.trim().is_empty()) {
            debug!("{} overrides metadata url", ENV_METADATA_URL);
            config.metadata.url = url;
        }
        if let Some(dir) = env(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            debug!("{} overrides cache dir", ENV_CACHE_DIR);
            config.metadata.cache_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Loading config from {}", path.display());

        // An empty file is a valid, all-defaults config
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("metadata.stale_after_secs", self.metadata.stale_after_secs)?;
        positive("metadata.fetch_timeout_secs", self.metadata.fetch_timeout_secs)?;
        positive("plugins.timeout_secs", self.plugins.timeout_secs)?;

        if self.metadata.url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "metadata.url",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn metadata_policy(&self) -> MetadataPolicy {
        MetadataPolicy {
            stale_after: Duration::from_secs(self.metadata.stale_after_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata.fetch_timeout_secs)
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugins.timeout_secs)
    }

    /// Cache root: configured dir, else the platform cache dir, else `./.stencil/cache`
    pub fn cache_root(&self) -> PathBuf {
        self.metadata
            .cache_dir
            .clone()
            .or_else(|| {
                directories::ProjectDirs::from("dev", "stencil", "stencil")
                    .map(|dirs| dirs.cache_dir().to_path_buf())
                    .or_else(|| dirs::cache_dir().map(|d| d.join("stencil")))
            })
            .unwrap_or_else(|| PathBuf::from(PROJECT_DIR).join("cache"))
    }

    /// Plugin directories: configured ones, then `<config dir>/plugins`
    pub fn plugin_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.plugins.dirs.clone();
        if let Some(global) = global_config_dir() {
            dirs.push(global.join("plugins"));
        }
        dirs
    }
}

fn global_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "stencil", "stencil")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .or_else(|| dirs::config_dir().map(|d| d.join("stencil")))
}

/// `<platform config dir>/stencil/config.yaml`
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join(CONFIG_FILE))
}

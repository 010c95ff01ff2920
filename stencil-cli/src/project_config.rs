//! Per-project key/value configuration (`.stencil/project.properties`)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use stencil_core::config::PROJECT_DIR;
use stencil_core::PropertySet;

pub const PROJECT_CONFIG_FILE: &str = "project.properties";

pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_DIR).join(PROJECT_CONFIG_FILE)
}

/// Load the project config, `None` when the project has none
pub fn load(project_dir: &Path) -> Result<Option<PropertySet>> {
    let path = project_config_path(project_dir);
    if !path.is_file() {
        return Ok(None);
    }

    let bytes =
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let properties = PropertySet::parse(&bytes)
        .with_context(|| format!("Invalid project config {}", path.display()))?;
    Ok(Some(properties))
}

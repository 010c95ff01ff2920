//! `stencil info` - print diagnostic information about the installation

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, warn};

use stencil_core::metadata::{source_for, LastUpdate, MetadataStore};
use stencil_core::plugin::{PluginError, GET_INFO_PLUGIN};
use stencil_core::{PluginBridge, PluginInvocation, PluginOutcome, PluginResolver, StencilConfig};

use crate::project_config;

/// Narrowest key column handed to the plugin
const MIN_WIDTH: usize = "plugin.build.revision".len();

const UPDATE_TIME_FORMAT: &str = "%m-%d-%Y %H:%M:%S %Z";

const METADATA_TITLE: &str = "Metadata";

/// Printed above whatever the `GetInfo` plugin writes
const PLUGIN_TITLE: &str = "Plugin Build";

#[derive(Debug, Clone)]
pub struct InfoOptions {
    pub verbose: bool,
    pub json: bool,
    /// Overrides the configured plugin timeout
    pub plugin_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub title: String,
    pub rows: Vec<(String, String)>,
}

impl Section {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            rows: Vec::new(),
        }
    }

    fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.rows.push((key.into(), value.into()));
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub sections: Vec<Section>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugin_output: Vec<String>,
}

impl Report {
    /// Width of the widest key, never below [`MIN_WIDTH`]
    ///
    /// Metadata keys are left out; archetype keys grow with the catalog.
    pub fn max_key_width(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.title != METADATA_TITLE)
            .flat_map(|s| s.rows.iter())
            .map(|(key, _)| key.chars().count())
            .max()
            .unwrap_or(0)
            .max(MIN_WIDTH)
    }
}

#[derive(Tabled)]
struct PropertyRow {
    #[tabled(rename = "Property")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

pub async fn execute(config: &StencilConfig, project_dir: &Path, options: InfoOptions) -> Result<()> {
    let source = source_for(&config.metadata.url, config.fetch_timeout())
        .with_context(|| format!("Invalid metadata location {}", config.metadata.url))?;
    let store = MetadataStore::new(source, config.cache_root(), config.metadata_policy())
        .context("Failed to open metadata cache")?;

    let mut report = build_report(config, project_dir, &store, options.verbose).await?;

    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }
    if !options.json {
        print!("{}", render(&report));
    }

    let bridge = PluginBridge::new(PluginResolver::new(config.plugin_dirs()));
    let timeout = options
        .plugin_timeout
        .unwrap_or_else(|| config.plugin_timeout());
    let json = options.json;
    if !json {
        print!("{}", header(PLUGIN_TITLE));
    }
    let mut plugin_output = Vec::new();
    run_get_info(&bridge, report.max_key_width(), timeout, |line| {
        if json {
            plugin_output.push(line.to_string());
        } else {
            println!("{line}");
        }
    })
    .await?;

    if json {
        report.plugin_output = plugin_output;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

/// Gather every section of the report
pub async fn build_report(
    config: &StencilConfig,
    project_dir: &Path,
    store: &MetadataStore,
    verbose: bool,
) -> Result<Report> {
    let mut report = Report::default();

    if let Some(properties) = project_config::load(project_dir)? {
        let mut section = Section::new("Project Config");
        for (key, value) in properties.iter() {
            section.push(key, value);
        }
        report.sections.push(section);
    }

    report.sections.push(build_section());

    // Only verbose runs touch the metadata store, so a plain `info` never
    // triggers a refresh
    if verbose {
        report
            .sections
            .push(metadata_section(store, &mut report.warnings).await);
        report.sections.push(runtime_section(config, store.cache_root(), project_dir));
        report.sections.push(environment_section(std::env::vars()));
    }

    Ok(report)
}

fn build_section() -> Section {
    let mut section = Section::new("Build");
    section.push("version", env!("CARGO_PKG_VERSION"));
    section.push("target.os", std::env::consts::OS);
    section.push("target.arch", std::env::consts::ARCH);
    section
}

async fn metadata_section(store: &MetadataStore, warnings: &mut Vec<String>) -> Section {
    let mut section = Section::new(METADATA_TITLE);

    let latest = match store.latest_version().await {
        Ok(resolved) => {
            if let Some(degraded) = &resolved.degraded {
                warnings.push(format!(
                    "Metadata could not be refreshed, showing data from {}: {}",
                    format_update_time(degraded.last_update),
                    degraded.reason
                ));
            }
            resolved.into_value()
        }
        Err(e) => {
            warn!("Metadata lookup failed: {}", e);
            warnings.push(e.to_string());
            section.push("last.update.time", format_update_time(store.last_update_time()));
            return section;
        }
    };

    section.push("last.update.time", format_update_time(store.last_update_time()));
    section.push("latest.version", latest.to_string());

    match store.properties_of(&latest).await {
        Ok(properties) => {
            for (key, value) in properties.iter() {
                section.push(key, value);
            }
        }
        Err(e) => warnings.push(format!("Properties for {latest} unavailable: {e}")),
    }

    match store.catalog_of(&latest).await {
        Ok(catalog) => {
            for (key, value) in catalog.flatten() {
                section.push(key, value);
            }
        }
        Err(e) => warnings.push(format!("Catalog for {latest} unavailable: {e}")),
    }

    section
}

fn runtime_section(config: &StencilConfig, cache_root: &Path, project_dir: &Path) -> Section {
    let mut section = Section::new("Runtime Properties");
    section.push("os.family", std::env::consts::FAMILY);
    section.push("process.id", std::process::id().to_string());
    if let Ok(exe) = std::env::current_exe() {
        section.push("process.executable", exe.display().to_string());
    }
    section.push("project.dir", project_dir.display().to_string());
    section.push("metadata.url", config.metadata.url.clone());
    section.push("metadata.cache", cache_root.display().to_string());
    section.push(
        "plugin.dirs",
        config
            .plugin_dirs()
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(","),
    );
    section
}

fn environment_section<I>(vars: I) -> Section
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut vars: Vec<_> = vars.into_iter().collect();
    vars.sort();

    let mut section = Section::new("Environment Variables");
    section.rows = vars;
    section
}

/// Render sections as titled tables
pub fn render(report: &Report) -> String {
    let mut out = String::new();
    for section in &report.sections {
        let rows: Vec<PropertyRow> = section
            .rows
            .iter()
            .map(|(key, value)| PropertyRow {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();

        out.push_str(&header(&section.title));
        out.push_str(&table);
        out.push('\n');
    }
    out
}

fn header(title: &str) -> String {
    format!("\n{title}\n")
}

pub fn format_update_time(last_update: LastUpdate) -> String {
    match last_update.time() {
        Some(time) => format_time(time, &Local),
        None => "never".to_string(),
    }
}

fn format_time<Tz>(time: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    time.with_timezone(tz).format(UPDATE_TIME_FORMAT).to_string()
}

/// Run the `GetInfo` plugin; a missing plugin is not an error
async fn run_get_info<S>(
    bridge: &PluginBridge,
    max_width: usize,
    timeout: Duration,
    sink: S,
) -> Result<()>
where
    S: FnMut(&str) + Send,
{
    let invocation = PluginInvocation::new(
        GET_INFO_PLUGIN,
        vec!["--maxWidth".to_string(), max_width.to_string()],
        timeout,
    );

    match bridge.execute(&invocation, sink).await {
        Ok(PluginOutcome::Success) => Ok(()),
        Ok(PluginOutcome::Failed { exit_code }) => {
            warn!("{} plugin exited with code {}", GET_INFO_PLUGIN, exit_code);
            Ok(())
        }
        Ok(PluginOutcome::TimedOut) => {
            eprintln!(
                "Warning: {} plugin did not finish within {}s",
                GET_INFO_PLUGIN,
                timeout.as_secs()
            );
            Ok(())
        }
        Err(PluginError::PluginNotFound { searched, .. }) => {
            debug!("No {} plugin installed (searched: {})", GET_INFO_PLUGIN, searched);
            Ok(())
        }
        Err(e) => Err(e).context("Failed to run plugin"),
    }
}

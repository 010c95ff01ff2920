//! Stencil - project scaffolding CLI
//!
//! Entry point for the `stencil` binary.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use stencil_core::StencilConfig;

mod info;
mod project_config;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(name = "stencil", about = "Project scaffolding toolkit", version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Use this configuration file instead of the project/global ones
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Project directory
    #[clap(long, default_value = ".", global = true)]
    project_dir: PathBuf,
}

#[derive(Parser, Debug)]
enum Command {
    /// Print information about this installation and the current project
    Info {
        /// Also print runtime properties and environment variables
        #[clap(short, long)]
        verbose: bool,

        /// Output results as JSON
        #[clap(long)]
        json: bool,

        /// Seconds the GetInfo plugin may run (overrides configuration)
        #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
        plugin_timeout: Option<u64>,
    },
}

/// Initialize tracing from --log-level; `RUST_LOG` directives are added on top
fn initialize_tracing(log_level: &LogLevel) {
    let mut filter = EnvFilter::new(log_level.to_filter_directive());
    if let Ok(env) = std::env::var("RUST_LOG") {
        for directive in env.split(',').filter(|d| !d.trim().is_empty()) {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout carries the report
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level);

    let config = StencilConfig::load(cli.config.as_deref(), &cli.project_dir)
        .context("Failed to load configuration")?;
    debug!("Effective configuration: {:?}", config);

    match cli.command {
        Command::Info {
            verbose,
            json,
            plugin_timeout,
        } => {
            let options = info::InfoOptions {
                verbose,
                json,
                plugin_timeout: plugin_timeout.map(Duration::from_secs),
            };
            info::execute(&config, &cli.project_dir, options).await
        }
    }
}

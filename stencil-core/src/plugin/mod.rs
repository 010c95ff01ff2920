//! Plugin bridge - run an external helper with a deadline and stream its output
//!
//! Plugins are ordinary executables. Their stdout and stderr are merged and
//! handed to a line sink as they arrive; the process (and anything it started)
//! is killed once the deadline passes.

mod process;
mod resolve;

pub use process::{PluginEvent, RunningPlugin, Spawner, TokioSpawner, MAX_LINE_BYTES};
pub use resolve::PluginResolver;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Plugin the `info` command asks for extra details
pub const GET_INFO_PLUGIN: &str = "GetInfo";

/// How long output may go quiet after exit before the streams are abandoned
const EXIT_DRAIN_QUIET: Duration = Duration::from_millis(150);

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin '{name}' not found (searched: {searched})")]
    PluginNotFound { name: String, searched: String },

    #[error("Failed to start plugin {}: {reason}", program.display())]
    Spawn { program: PathBuf, reason: String },

    #[error("I/O error while running plugin '{name}': {reason}")]
    Io { name: String, reason: String },

    #[error("Plugin timeout must be greater than zero")]
    InvalidTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInvocation {
    pub name: String,
    pub arguments: Vec<String>,
    pub timeout: Duration,
}

impl PluginInvocation {
    pub fn new(name: impl Into<String>, arguments: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            arguments,
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOutcome {
    Success,
    Failed { exit_code: i32 },
    TimedOut,
}

impl PluginOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PluginOutcome::Success => Some(0),
            PluginOutcome::Failed { exit_code } => Some(*exit_code),
            PluginOutcome::TimedOut => None,
        }
    }
}

pub struct PluginBridge {
    resolver: PluginResolver,
    spawner: Arc<dyn Spawner>,
}

impl PluginBridge {
    pub fn new(resolver: PluginResolver) -> Self {
        Self::with_spawner(resolver, Arc::new(TokioSpawner))
    }

    pub fn with_spawner(resolver: PluginResolver, spawner: Arc<dyn Spawner>) -> Self {
        Self { resolver, spawner }
    }

    pub fn resolver(&self) -> &PluginResolver {
        &self.resolver
    }

    /// Run a plugin, feeding each output line to `sink` in arrival order
    ///
    /// The deadline starts at launch. A plugin that overruns it is killed and
    /// reported as [`PluginOutcome::TimedOut`]; lines it printed before that
    /// have already reached the sink. The outcome follows the plugin's own
    /// exit, not the lifetime of processes it left running.
    pub async fn execute<S>(
        &self,
        invocation: &PluginInvocation,
        mut sink: S,
    ) -> Result<PluginOutcome, PluginError>
    where
        S: FnMut(&str) + Send,
    {
        if invocation.timeout.is_zero() {
            return Err(PluginError::InvalidTimeout);
        }

        let program = self.resolver.resolve(&invocation.name)?;
        debug!(
            "Running plugin {} as {} with {:?}",
            invocation.name,
            program.display(),
            invocation.arguments
        );

        let mut plugin = self.spawner.spawn(&program, &invocation.arguments).await?;
        let deadline = tokio::time::Instant::now() + invocation.timeout;

        let run = tokio::time::timeout_at(deadline, async {
            loop {
                match plugin.next_event().await? {
                    PluginEvent::Line(line) => sink(&line),
                    PluginEvent::Exited(code) => return Ok::<_, std::io::Error>(code),
                }
            }
        })
        .await;

        if let Ok(Ok(_)) = run {
            // Whatever the plugin wrote before exiting is still in flight. A
            // background process it left behind may hold the streams open, so
            // stop once they go quiet.
            loop {
                let quiet = (tokio::time::Instant::now() + EXIT_DRAIN_QUIET).min(deadline);
                match tokio::time::timeout_at(quiet, plugin.next_line()).await {
                    Ok(Some(line)) => sink(&line),
                    Ok(None) => break,
                    Err(_) => {
                        debug!(
                            "Plugin {} exited but its output is still open; not waiting",
                            invocation.name
                        );
                        break;
                    }
                }
            }
        }

        match run {
            Ok(Ok(Some(0))) => Ok(PluginOutcome::Success),
            Ok(Ok(Some(exit_code))) => {
                debug!("Plugin {} exited with {}", invocation.name, exit_code);
                Ok(PluginOutcome::Failed { exit_code })
            }
            Ok(Ok(None)) => {
                debug!("Plugin {} was killed by a signal", invocation.name);
                Ok(PluginOutcome::Failed { exit_code: -1 })
            }
            Ok(Err(e)) => Err(PluginError::Io {
                name: invocation.name.clone(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    "Plugin {} did not finish within {:?}, terminating",
                    invocation.name, invocation.timeout
                );
                if let Err(e) = plugin.terminate().await {
                    error!("Failed to terminate plugin {}: {}", invocation.name, e);
                }
                Ok(PluginOutcome::TimedOut)
            }
        }
    }
}

//! Subprocess capability used by the plugin bridge

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::PluginError;

/// Lines buffered between the output readers and the consumer
const LINE_BUFFER: usize = 64;

/// Longest line forwarded in one piece; longer lines arrive in chunks
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// What a running plugin did next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    Line(String),
    /// The process exited; `None` means it died from a signal
    Exited(Option<i32>),
}

/// Starts plugin processes
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<Box<dyn RunningPlugin>, PluginError>;
}

/// A started plugin process
#[async_trait]
pub trait RunningPlugin: Send {
    /// Next output line or the exit of the process, whichever comes first
    ///
    /// Exit is reported even while something the plugin started still holds
    /// its output streams open.
    async fn next_event(&mut self) -> io::Result<PluginEvent>;

    /// Next line of combined stdout/stderr, `None` once both streams close
    async fn next_line(&mut self) -> Option<String>;

    /// Kill the process and everything it started, then reap it
    async fn terminate(&mut self) -> io::Result<()>;
}

/// Spawns real processes with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

#[async_trait]
impl Spawner for TokioSpawner {
    async fn spawn(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<Box<dyn RunningPlugin>, PluginError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| PluginError::Spawn {
            program: program.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Spawned {} (pid {:?})", program.display(), child.id());

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }

        Ok(Box::new(TokioPlugin {
            child,
            lines: rx,
            output_closed: false,
            readers,
        }))
    }
}

struct TokioPlugin {
    child: Child,
    lines: mpsc::Receiver<String>,
    output_closed: bool,
    readers: Vec<JoinHandle<()>>,
}

#[async_trait]
impl RunningPlugin for TokioPlugin {
    async fn next_event(&mut self) -> io::Result<PluginEvent> {
        if !self.output_closed {
            tokio::select! {
                biased;
                line = self.lines.recv() => match line {
                    Some(line) => return Ok(PluginEvent::Line(line)),
                    None => self.output_closed = true,
                },
                status = self.child.wait() => return Ok(PluginEvent::Exited(status?.code())),
            }
        }
        Ok(PluginEvent::Exited(self.child.wait().await?.code()))
    }

    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: killpg only sends a signal; the group id is our child's pid
            // because it was started with process_group(0).
            let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                debug!(
                    "killpg({}) failed: {}",
                    pid,
                    io::Error::last_os_error()
                );
            }
        }

        match self.child.kill().await {
            Ok(()) => {}
            // Already reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        Ok(())
    }
}

impl Drop for TokioPlugin {
    fn drop(&mut self) {
        // Readers may be parked on pipes a leftover grandchild keeps open
        for reader in &self.readers {
            reader.abort();
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    forward_buffered(BufReader::new(reader), tx).await;
}

/// Split `reader` into lines of at most [`MAX_LINE_BYTES`] and send them
async fn forward_buffered<R>(mut reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut capped = false;
    loop {
        let available = match reader.fill_buf().await {
            Ok(bytes) if bytes.is_empty() => break,
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Stopped reading plugin output: {}", e);
                break;
            }
        };

        // A newline right after a capped chunk ends that line
        if capped && available[0] == b'\n' {
            reader.consume(1);
            capped = false;
            continue;
        }

        let room = MAX_LINE_BYTES - line.len();
        let window = &available[..available.len().min(room)];
        let (taken, newline) = match window.iter().position(|b| *b == b'\n') {
            Some(end) => (end + 1, true),
            None => (window.len(), false),
        };
        line.extend_from_slice(&window[..taken]);
        reader.consume(taken);

        capped = false;
        if newline || line.len() == MAX_LINE_BYTES {
            capped = !newline;
            if !send_line(&tx, &mut line).await {
                return;
            }
        }
    }

    if !line.is_empty() {
        send_line(&tx, &mut line).await;
    }
}

/// Send the buffered line without its terminator; false once nobody listens
async fn send_line(tx: &mpsc::Sender<String>, buf: &mut Vec<u8>) -> bool {
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    // A chunk boundary may split a multi-byte character; lossy decoding keeps it readable
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    tx.send(line).await.is_ok()
}

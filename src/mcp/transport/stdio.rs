//! Stdio transport for MCP child-process servers
//!
//! [`StdioTransport`] spawns a child process and talks to it over its
//! stdin/stdout pipes with newline-delimited JSON framing:
//!
//! - Outbound messages are written to the child's stdin followed by `\n`.
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line (newline stripped before delivery).
//! - The child's stderr is logged at `DEBUG` and forwarded to a diagnostic
//!   stream. It is never treated as an error. At most [`STDERR_BACKLOG`]
//!   unread lines are kept; later lines are dropped until the stream is
//!   polled again.
//!
//! [`Transport::close`] kills and reaps the child. Dropping the transport
//! without closing it sends a best-effort SIGTERM (Unix) or `start_kill`
//! (elsewhere).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Result;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::SessionError;
use crate::mcp::transport::Transport;

/// Unread stderr lines kept for [`Transport::receive_err`].
pub const STDERR_BACKLOG: usize = 256;

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcp_testkit::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(
///     "node",
///     &["dist/server.js".to_string()],
///     &HashMap::new(),
///     None,
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    stdin_tx: mpsc::UnboundedSender<String>,
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    stderr_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    child: Arc<Mutex<Child>>,
}

impl StdioTransport {
    /// Spawn `command` with `args` and wire up the stdio pipes.
    ///
    /// The child's environment is exactly `env`: inherited variables are
    /// cleared first, so callers pass an already merged map (see
    /// [`crate::config::ClientConfig::effective_env`]).
    ///
    /// # Errors
    ///
    /// [`SessionError::Transport`] if the process cannot be spawned or a
    /// pipe is unavailable.
    pub fn spawn(
        command: impl AsRef<Path>,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&PathBuf>,
    ) -> Result<Self> {
        let command = command.as_ref();
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(env)
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            SessionError::Transport(format!(
                "failed to spawn MCP server `{}`: {}",
                command.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Transport("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Transport("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SessionError::Transport("child stderr unavailable after spawn".into()))?;

        tracing::debug!(command = %command.display(), pid = ?child.id(), "spawned MCP server");

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::channel::<String>(STDERR_BACKLOG);

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if stdout_tx.send(line).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut dropped: u64 = 0;
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "mcp_testkit::server_stderr", "{}", line);
                match stderr_tx.try_send(line) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            if dropped > 0 {
                tracing::debug!(dropped, "stderr backlog was full; lines dropped");
            }
        });

        Ok(Self {
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Arc::new(Mutex::new(child)),
        })
    }

    /// OS process id of the child, or `None` once it has been reaped.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }
}

fn channel_stream(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(rx, |rx| async move {
        let item = rx.lock().await.recv().await?;
        Some((item, rx))
    }))
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.stdin_tx
            .send(message)
            .map_err(|e| SessionError::Transport(format!("stdin channel closed: {}", e)))?;
        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.stdout_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stderr_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await?;
            Some((item, rx))
        }))
    }

    async fn close(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(%status, "MCP server already exited");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                return Err(SessionError::Transport(format!("failed to poll child: {}", e)).into())
            }
        }

        child
            .kill()
            .await
            .map_err(|e| SessionError::Transport(format!("failed to kill child: {}", e)))?;
        tracing::debug!("MCP server terminated");
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Skip if another task holds the lock; kill_on_drop still applies
        // once the last handle to the child goes away.
        if let Ok(child) = self.child.try_lock() {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid belongs to a child we spawned and have not reaped.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let mut child = child;
                let _ = child.start_kill();
            }
        }
    }
}

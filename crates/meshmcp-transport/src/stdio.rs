//! Stdio transport: a child process speaking newline-delimited JSON.
//!
//! The child is spawned from the connection's launch spec. Stdout lines are
//! inbound JSON-RPC, stdin receives outbound messages, stderr is drained
//! into the log stream tagged with the connection id. Construction refuses
//! to run in production mode unless the unsafe override is set, so no
//! process is ever spawned for a blocked connection.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use meshmcp_core::MeshConfig;
use meshmcp_core::model::StdioCommand;

use crate::core::{Transport, TransportError, TransportKind, TransportMessage, TransportResult};

/// Configuration for the stdio transport
#[derive(Debug, Clone)]
pub struct StdioConfig {
    /// Connection the process belongs to; tags stderr log lines
    pub connection_id: String,

    /// Executable to spawn
    pub command: String,

    /// Arguments
    pub args: Vec<String>,

    /// Environment variables set for the child
    pub env: HashMap<String, String>,

    /// Working directory
    pub cwd: Option<String>,

    /// Maximum accepted line length in bytes
    pub max_message_size: usize,

    /// Timeout for graceful shutdown before the child is killed
    pub shutdown_timeout: Duration,
}

impl StdioConfig {
    /// Build a config from a connection's launch spec
    pub fn from_command(connection_id: impl Into<String>, spec: &StdioCommand) -> Self {
        Self {
            connection_id: connection_id.into(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            cwd: spec.cwd.clone(),
            max_message_size: meshmcp_core::MAX_MESSAGE_SIZE,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Child-process stdio transport
#[derive(Debug)]
pub struct StdioTransport {
    config: StdioConfig,
    child: Option<Child>,
    stdin_tx: Option<mpsc::Sender<String>>,
    stdout_rx: Option<mpsc::Receiver<String>>,
    closed: bool,
    _stdin_task: Option<tokio::task::JoinHandle<()>>,
    _stdout_task: Option<tokio::task::JoinHandle<()>>,
}

impl StdioTransport {
    /// Create a stdio transport, honoring the production gate.
    ///
    /// Returns [`TransportError::StdioDisallowed`] before anything is
    /// spawned when the configuration forbids stdio.
    pub fn new(config: StdioConfig, mesh: &MeshConfig) -> TransportResult<Self> {
        if !mesh.stdio_allowed() {
            return Err(TransportError::StdioDisallowed);
        }
        if config.command.is_empty() {
            return Err(TransportError::ConfigurationError(
                "command cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            config,
            child: None,
            stdin_tx: None,
            stdout_rx: None,
            closed: false,
            _stdin_task: None,
            _stdout_task: None,
        })
    }

    async fn spawn_process(&mut self) -> TransportResult<()> {
        info!(
            connection_id = %self.config.connection_id,
            command = %self.config.command,
            "Spawning stdio MCP server"
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = self.config.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::ConnectionFailed(format!("failed to spawn process: {e}"))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::ConnectionFailed("failed to get stdin handle".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::ConnectionFailed("failed to get stdout handle".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TransportError::ConnectionFailed("failed to get stderr handle".to_string())
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(64);
        let (stdout_tx, stdout_rx) = mpsc::channel::<String>(64);

        let stdin_task = tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(line) = stdin_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    error!("Failed to write to child stdin");
                    break;
                }
            }
            debug!("stdin writer task completed");
        });

        let max_size = self.config.max_message_size;
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.len() > max_size {
                    warn!(bytes = line.len(), "Dropping oversized message from child");
                    continue;
                }
                if stdout_tx.send(line).await.is_err() {
                    break;
                }
            }
            debug!("stdout reader task completed");
        });

        // Stderr is log output from the downstream server.
        let connection_id = self.config.connection_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(connection_id = %connection_id, "mcp-server: {line}");
            }
        });

        // Fail fast if the process died immediately.
        if let Ok(Some(status)) = child.try_wait() {
            return Err(TransportError::ConnectionFailed(format!(
                "process exited early: {status}"
            )));
        }

        self.child = Some(child);
        self.stdin_tx = Some(stdin_tx);
        self.stdout_rx = Some(stdout_rx);
        self._stdin_task = Some(stdin_task);
        self._stdout_task = Some(stdout_task);
        Ok(())
    }

    async fn stop_process(&mut self) {
        self.stdin_tx = None;
        self.stdout_rx = None;

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!("Failed to signal child process: {e}");
            }
            match timeout(self.config.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(
                        connection_id = %self.config.connection_id,
                        "Child process exited with status: {status}"
                    );
                }
                Ok(Err(e)) => error!("Failed to wait for child exit: {e}"),
                Err(_) => {
                    warn!("Child shutdown timed out, killing");
                    if let Err(e) = child.kill().await {
                        error!("Failed to kill child process: {e}");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn start(&mut self) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.child.is_some() {
            return Ok(());
        }
        self.spawn_process().await
    }

    async fn send(&mut self, message: TransportMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let line = String::from_utf8(message.payload.to_vec())
            .map_err(|e| TransportError::SerializationFailed(format!("non-UTF8 payload: {e}")))?;
        let Some(ref sender) = self.stdin_tx else {
            return Err(TransportError::Closed);
        };
        sender
            .send(line)
            .await
            .map_err(|_| TransportError::ConnectionLost("stdin channel closed".to_string()))
    }

    async fn receive(&mut self) -> TransportResult<Option<TransportMessage>> {
        let Some(ref mut receiver) = self.stdout_rx else {
            return Ok(None);
        };
        match receiver.recv().await {
            Some(line) => Ok(Some(TransportMessage::new(Bytes::from(line)))),
            None => {
                // EOF on stdout: the process is gone.
                self.stdout_rx = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stop_process().await;
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("stdio://{}", self.config.command))
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StdioConfig;
use crate::error::{McpError, Result};
use crate::protocol::McpTransport;

/// Poll window for `receive`.
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Newline-delimited JSON-RPC over a child process's stdin/stdout.
///
/// The child is killed when the transport is dropped, so abandoning a
/// half-established connection never leaks a process.
pub struct StdioTransport {
    config: StdioConfig,
    child: Option<Child>,
    stdin: Option<Mutex<ChildStdin>>,
    lines: Mutex<Option<mpsc::Receiver<String>>>,
    closed: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            child: None,
            stdin: None,
            lines: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
            readers: Vec::new(),
        }
    }

    fn stop_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn connect(&mut self) -> Result<()> {
        info!(
            "Starting MCP server process: {} {:?}",
            self.config.command, self.config.args
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        if !self.config.env.is_empty() {
            cmd.envs(&self.config.env);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn MCP server process: {}", e);
            McpError::Transport(format!("Failed to spawn {}: {}", self.config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdout".to_string()))?;

        let (line_tx, line_rx) = mpsc::channel(256);
        let closed = self.closed.clone();
        closed.store(false, Ordering::SeqCst);
        self.readers.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if line_tx.send(line.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!("MCP server stdout closed (EOF)");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read MCP server stdout: {}", e);
                        break;
                    }
                }
            }
            closed.store(true, Ordering::SeqCst);
        }));

        if let Some(stderr) = child.stderr.take() {
            let command = self.config.command.clone();
            self.readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{} stderr] {}", command, line);
                }
            }));
        }

        self.child = Some(child);
        self.stdin = Some(Mutex::new(stdin));
        *self.lines.lock().await = Some(line_rx);

        info!("MCP server process started successfully");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting MCP server process");

        // Closing stdin signals EOF to the server.
        self.stdin = None;
        self.closed.store(true, Ordering::SeqCst);

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => {
                    info!("MCP server process exited: {}", status);
                }
                _ => {
                    warn!("MCP server process did not exit gracefully, killing");
                    let _ = child.kill().await;
                }
            }
        }

        self.stop_readers();
        *self.lines.lock().await = None;
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let stdin = self.stdin.as_ref().ok_or(McpError::Disconnected)?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Disconnected);
        }

        let mut stdin = stdin.lock().await;
        stdin
            .write_all(format!("{}\n", message).as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("Failed to write: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("Failed to flush: {}", e)))?;

        debug!("Sent: {}", message);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>> {
        let mut lines = self.lines.lock().await;
        let lines = lines.as_mut().ok_or(McpError::Disconnected)?;

        match tokio::time::timeout(RECEIVE_POLL, lines.recv()).await {
            Ok(Some(line)) => Ok(Some(line)),
            // Reader finished and every buffered line was delivered.
            Ok(None) => Err(McpError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    fn is_connected(&self) -> bool {
        self.child.is_some() && !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.stop_readers();
    }
}

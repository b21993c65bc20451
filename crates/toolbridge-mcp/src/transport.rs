//! Transport layer for MCP communication.
//!
//! [`StdioTransport`] owns the child process and its three standard streams.
//! stdout is drained by a dedicated reader task into a bounded line queue so
//! reads can wait with a deadline instead of polling; stderr is drained by
//! the diagnostics task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::diagnostics::{self, DiagnosticsSink};
use crate::error::{millis, BridgeError, TransportError};

/// Maximum number of stdout lines buffered between the reader task and the router.
pub const LINE_QUEUE_CAPACITY: usize = 256;

/// Line-oriented transport to a tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one record. A trailing `\n` is appended when missing.
    async fn write_line(&self, line: &str) -> Result<(), TransportError>;

    /// Read the next record, waiting at most `timeout` when one is given.
    async fn read_line(&self, timeout: Option<Duration>) -> Result<String, TransportError>;

    /// Stop the peer and release every stream. Safe to call more than once.
    async fn terminate(&self) -> Result<(), TransportError>;
}

/// How to launch a tool server.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Display name used in logs.
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            name: command.clone(),
            command,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// The full command line, for messages.
    pub fn display(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

type LineResult = Result<String, std::io::Error>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Stdio transport for subprocess MCP servers.
pub struct StdioTransport {
    name: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<BoxedWriter>>,
    lines: Mutex<mpsc::Receiver<LineResult>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    terminated: AtomicBool,
}

impl StdioTransport {
    /// Spawn the server process with all three streams piped.
    ///
    /// The child is killed if the transport is dropped without `terminate`.
    pub async fn spawn(
        spec: &ProcessSpec,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self, BridgeError> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| BridgeError::Spawn {
            command: spec.display(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Process("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Process("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Process("Failed to capture stderr".to_string()))?;

        info!(
            server = %spec.name,
            pid = child.id().unwrap_or_default(),
            "Spawned tool server: {}",
            spec.display()
        );

        let transport = Self::build(&spec.name, stdout, Box::new(stdin), Some(child));
        transport
            .tasks
            .lock()
            .push(diagnostics::spawn_drain(spec.name.clone(), stderr, sink));
        Ok(transport)
    }

    /// Build a transport over an arbitrary byte stream pair, with no child process.
    ///
    /// Must be called within a Tokio runtime; the reader runs as a task.
    pub fn from_streams<R, W>(name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(name, reader, Box::new(writer), None)
    }

    fn build<R>(name: &str, reader: R, writer: BoxedWriter, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_QUEUE_CAPACITY);
        let reader_task = spawn_reader(name.to_string(), reader, tx);

        Self {
            name: name.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(Some(writer)),
            lines: Mutex::new(rx),
            tasks: parking_lot::Mutex::new(vec![reader_task]),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard.as_mut().ok_or(TransportError::Closed)?;

        stdin.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&self, timeout: Option<Duration>) -> Result<String, TransportError> {
        let mut lines = self.lines.lock().await;
        let next = match timeout {
            Some(limit) => tokio::time::timeout(limit, lines.recv()).await.map_err(|_| {
                TransportError::ReadTimeout {
                    timeout_ms: millis(limit),
                }
            })?,
            None => lines.recv().await,
        };

        match next {
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => Err(TransportError::Io(e)),
            None => Err(TransportError::Closed),
        }
    }

    async fn terminate(&self) -> Result<(), TransportError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Closing stdin first lets a well-behaved server see EOF.
        *self.stdin.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(server = %self.name, "Kill after exit: {}", e);
            }
            info!(server = %self.name, "Tool server terminated");
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Read one `\n`-terminated record, replacing invalid UTF-8.
///
/// Returns `Ok(None)` at end of stream.
pub(crate) async fn read_lossy_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(buf);
    Ok(Some(text.trim_end_matches(['\n', '\r']).to_string()))
}

fn spawn_reader<R>(name: String, reader: R, tx: mpsc::Sender<LineResult>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            match read_lossy_line(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    if tx.send(Ok(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(server = %name, "stdout closed");
                    break;
                }
                Err(e) => {
                    warn!(server = %name, "stdout read failed: {}", e);
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

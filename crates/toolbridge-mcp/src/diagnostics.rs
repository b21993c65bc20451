//! Draining of the tool server's stderr.
//!
//! A server that logs to stderr faster than anyone reads it will block once
//! the pipe buffer fills, so the drain runs for the whole life of the child.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::io::{AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::read_lossy_line;

/// Receives the tool server's free-form diagnostic output, one line at a time.
pub trait DiagnosticsSink: Send + Sync {
    fn line(&self, server: &str, line: &str);
}

/// Forwards each line to `tracing` under the `toolbridge::child` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn line(&self, server: &str, line: &str) {
        info!(target: "toolbridge::child", server = %server, "{}", line);
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    lines: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines received so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl DiagnosticsSink for CollectingSink {
    fn line(&self, _server: &str, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Spawn a task that forwards `stream` to `sink` until end of stream.
///
/// Read errors and sink panics end or skip quietly; nothing is raised to callers.
/// Must be called within a Tokio runtime.
pub fn spawn_drain<R>(server: String, stream: R, sink: Arc<dyn DiagnosticsSink>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            match read_lossy_line(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let forwarded = catch_unwind(AssertUnwindSafe(|| sink.line(&server, &line)));
                    if forwarded.is_err() {
                        warn!(server = %server, "Diagnostics sink panicked; line dropped");
                    }
                }
                Ok(None) => {
                    debug!(server = %server, "stderr closed");
                    break;
                }
                Err(e) => {
                    debug!(server = %server, "stderr read failed: {}", e);
                    break;
                }
            }
        }
    })
}

//! Error types for the bridge.

use std::time::Duration;

use crate::codec::CodecError;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process error: {0}")]
    Process(String),

    #[error("No line received within {timeout_ms}ms")]
    ReadTimeout { timeout_ms: u64 },

    /// The peer stopped draining its input; a partial record may be on the wire.
    #[error("Write did not complete within {timeout_ms}ms")]
    WriteTimeout { timeout_ms: u64 },

    #[error("Connection closed")]
    Closed,
}

impl TransportError {
    /// A read deadline passing leaves the stream usable; everything else does not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::ReadTimeout { .. })
    }
}

/// Everything that can go wrong between the caller and the tool server.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed message: {0}")]
    Malformed(#[from] CodecError),

    #[error("Request {id} ({method}) timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        id: u64,
        timeout_ms: u64,
    },

    #[error("Server error ({code}): {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Session closed")]
    SessionClosed,

    #[error("Cannot {operation} while session is {state}")]
    Lifecycle {
        operation: &'static str,
        state: crate::session::SessionState,
    },

    #[error("No pending request with id {id}")]
    UnknownRequest { id: u64 },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// Whether the session that produced this error can no longer be used.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Transport(e) => e.is_fatal(),
            BridgeError::Spawn { .. } | BridgeError::SessionClosed => true,
            _ => false,
        }
    }

    /// A one-line message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            BridgeError::Spawn { command, source } => {
                format!("Could not start the tool server ({}): {}", command, source)
            }
            BridgeError::Transport(TransportError::Closed) => {
                "The tool server stopped responding (its output stream closed).".to_string()
            }
            BridgeError::Transport(TransportError::ReadTimeout { timeout_ms }) => {
                format!("The tool server sent nothing for {}ms.", timeout_ms)
            }
            BridgeError::Transport(TransportError::WriteTimeout { timeout_ms }) => {
                format!("The tool server stopped reading its input ({}ms).", timeout_ms)
            }
            BridgeError::Transport(e) => format!("Lost connection to the tool server: {}", e),
            BridgeError::Malformed(e) => {
                format!("The tool server sent a message that could not be read: {}", e)
            }
            BridgeError::Timeout {
                method, timeout_ms, ..
            } => format!(
                "The tool server did not answer {} within {:.1}s.",
                method,
                *timeout_ms as f64 / 1000.0
            ),
            BridgeError::Remote { code, message, .. } => {
                format!("The tool reported an error: {} (code {})", message, code)
            }
            BridgeError::UnknownTool { name } => {
                format!("There is no tool named '{}'.", name)
            }
            BridgeError::SessionClosed => "The tool session has already been closed.".to_string(),
            BridgeError::Lifecycle { operation, state } => {
                format!("Cannot {} yet: the tool session is {}.", operation, state)
            }
            BridgeError::UnknownRequest { id } => {
                format!("Request {} is not pending.", id)
            }
            BridgeError::Protocol(msg) => {
                format!("The tool server replied with an unexpected payload: {}", msg)
            }
        }
    }
}

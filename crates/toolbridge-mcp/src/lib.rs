//! MCP (Model Context Protocol) stdio bridge.
//!
//! Launches a tool server as a child process, speaks line-delimited JSON-RPC
//! over its standard streams, performs the `initialize` handshake, discovers
//! the server's tools and correlates `tools/call` requests with their
//! responses by id.
//!
//! ```no_run
//! # async fn run() -> Result<(), toolbridge_mcp::BridgeError> {
//! use toolbridge_mcp::BridgeSession;
//!
//! let mut session = BridgeSession::builder("python3")
//!     .arg("server.py")
//!     .start()
//!     .await?;
//! let result = session
//!     .call_tool("subnet_calculator", serde_json::json!({"cidr": "10.0.0.0/24"}))
//!     .await?;
//! println!("{}", result.text().unwrap_or_default());
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod codec;
mod correlation;
mod diagnostics;
mod error;
mod protocol;
mod schema;
mod session;
mod tool;
mod transport;

pub use codec::{decode, encode, CodecError, Envelope};
pub use correlation::{Correlator, Shutdown};
pub use diagnostics::{spawn_drain, CollectingSink, DiagnosticsSink, TracingSink};
pub use error::{BridgeError, TransportError};
pub use protocol::{
    ClientInfo, McpMethod, RequestId, RpcError, RpcErrorResponse, RpcNotification, RpcRequest,
    RpcResponse, ServerInfo, DEFAULT_PROTOCOL_VERSION, JSONRPC_VERSION,
};
pub use schema::{to_caller_schema, to_caller_schemas, CallerToolSpec, FunctionSpec};
pub use session::{BridgeSession, SessionBuilder, SessionConfig, SessionState};
pub use tool::{parse_tool_list, McpContent, ParameterSpec, ToolCallResult, ToolDescriptor};
pub use transport::{ProcessSpec, StdioTransport, Transport, LINE_QUEUE_CAPACITY};

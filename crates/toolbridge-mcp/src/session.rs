//! Bridge session: one tool server process, from handshake to shutdown.
//!
//! ```text
//! Uninitialized -> Handshaking -> Ready -> Closed
//!        \______________\___________\____> Failed
//! ```
//!
//! Tool traffic is only accepted in `Ready`, which is entered after the
//! server has answered `initialize` and been sent `notifications/initialized`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::correlation::{Correlator, Shutdown};
use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::error::{BridgeError, TransportError};
use crate::protocol::{ClientInfo, McpMethod, ServerInfo, DEFAULT_PROTOCOL_VERSION};
use crate::schema::{to_caller_schemas, CallerToolSpec};
use crate::tool::{parse_tool_list, ToolCallResult, ToolDescriptor};
use crate::transport::{ProcessSpec, StdioTransport, Transport};

/// Lifecycle state of a [`BridgeSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-level settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_info: ClientInfo,
    pub protocol_version: String,
    pub capabilities: Value,
    /// Deadline for the `initialize` response.
    pub handshake_timeout: Duration,
    /// Deadline for `tools/list`.
    pub request_timeout: Duration,
    /// Deadline for `tools/call`; device commands can be slow.
    pub tool_call_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            tool_call_timeout: Duration::from_secs(180),
        }
    }
}

/// Builder for a [`BridgeSession`] over a spawned process.
pub struct SessionBuilder {
    spec: ProcessSpec,
    config: SessionConfig,
    sink: Arc<dyn DiagnosticsSink>,
}

impl SessionBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            spec: ProcessSpec::new(command),
            config: SessionConfig::default(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Display name for logs; defaults to the command.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: HashMap<String, String>) -> Self {
        self.spec.env.extend(vars);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec.working_dir = Some(dir.into());
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.config.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config.protocol_version = version.into();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn tool_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_call_timeout = timeout;
        self
    }

    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn process_spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Start the process. The session is left in `Handshaking`.
    pub async fn spawn(self) -> Result<BridgeSession, BridgeError> {
        let transport = StdioTransport::spawn(&self.spec, self.sink).await?;
        Ok(BridgeSession::from_transport(
            Arc::new(transport),
            &self.spec.name,
            self.config,
        ))
    }

    /// Start the process, complete the handshake and discover tools.
    pub async fn start(self) -> Result<BridgeSession, BridgeError> {
        let mut session = self.spawn().await?;
        if let Err(e) = session.initialize().await {
            session.teardown(Shutdown::TransportLost).await;
            return Err(e);
        }
        if let Err(e) = session.list_tools().await {
            session.teardown(Shutdown::TransportLost).await;
            return Err(e);
        }
        Ok(session)
    }
}

/// A live connection to one tool server.
pub struct BridgeSession {
    id: Uuid,
    name: String,
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    state: Arc<parking_lot::RwLock<SessionState>>,
    config: SessionConfig,
    server_info: Option<ServerInfo>,
    tools: Vec<ToolDescriptor>,
    router: Option<JoinHandle<()>>,
}

impl BridgeSession {
    pub fn builder(command: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(command)
    }

    /// Attach to an already started transport. The session is left in `Handshaking`.
    ///
    /// Must be called within a Tokio runtime; the output router runs as a task.
    pub fn from_transport(
        transport: Arc<dyn Transport>,
        name: &str,
        config: SessionConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        let state = Arc::new(parking_lot::RwLock::new(SessionState::Uninitialized));
        let correlator = Arc::new(
            Correlator::new(transport.clone()).with_write_timeout(config.request_timeout),
        );

        // The transport is already running; move on before the router can observe EOF.
        *state.write() = SessionState::Handshaking;
        debug!(session = %id, server = %name, "Session handshaking");
        let router = spawn_router(
            name.to_string(),
            transport.clone(),
            correlator.clone(),
            state.clone(),
        );

        Self {
            id,
            name: name.to_string(),
            transport,
            correlator,
            state,
            config,
            server_info: None,
            tools: Vec::new(),
            router: Some(router),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// What the server reported during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Tools cached by the last successful `list_tools`.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn caller_schemas(&self) -> Vec<CallerToolSpec> {
        to_caller_schemas(&self.tools)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != next && !state.is_terminal() {
            info!(session = %self.id, server = %self.name, "Session {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Map the current state to an error unless it is `expected`.
    fn require(&self, operation: &'static str, expected: SessionState) -> Result<(), BridgeError> {
        match self.state() {
            state if state == expected => Ok(()),
            SessionState::Closed => Err(BridgeError::SessionClosed),
            SessionState::Failed => Err(BridgeError::Transport(TransportError::Closed)),
            state => Err(BridgeError::Lifecycle { operation, state }),
        }
    }

    /// Record a fatal error as a `Failed` session.
    fn observe<T>(&self, result: Result<T, BridgeError>) -> Result<T, BridgeError> {
        if let Err(e) = &result {
            if e.is_fatal() && !matches!(e, BridgeError::SessionClosed) {
                error!(session = %self.id, server = %self.name, "Transport failure: {}", e);
                self.set_state(SessionState::Failed);
                self.correlator.fail_all(Shutdown::TransportLost);
            }
        }
        result
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    pub async fn initialize(&mut self) -> Result<&ServerInfo, BridgeError> {
        self.require("initialize", SessionState::Handshaking)?;

        let params = serde_json::json!({
            "protocolVersion": self.config.protocol_version,
            "capabilities": self.config.capabilities,
            "clientInfo": self.config.client_info,
        });

        let result = self
            .correlator
            .request(
                McpMethod::Initialize.as_str(),
                Some(params),
                self.config.handshake_timeout,
            )
            .await;
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                warn!(session = %self.id, server = %self.name, "Handshake failed: {}", e);
                self.teardown(Shutdown::TransportLost).await;
                return Err(e);
            }
        };

        let info = ServerInfo::from_result(&result);
        if let Some(version) = &info.protocol_version {
            if *version != self.config.protocol_version {
                warn!(
                    session = %self.id,
                    "Server negotiated protocol {} (requested {})",
                    version,
                    self.config.protocol_version
                );
            }
        }

        let notified = self
            .correlator
            .notify(McpMethod::Initialized.as_str(), None)
            .await;
        if let Err(e) = notified {
            self.teardown(Shutdown::TransportLost).await;
            return Err(e);
        }

        self.set_state(SessionState::Ready);
        info!(
            session = %self.id,
            server = %self.name,
            remote = info.name().unwrap_or("unknown"),
            "MCP connection initialized"
        );
        let info: &ServerInfo = self.server_info.insert(info);
        Ok(info)
    }

    /// Fetch the tool list and replace the cache.
    pub async fn list_tools(&mut self) -> Result<&[ToolDescriptor], BridgeError> {
        self.require("list tools", SessionState::Ready)?;

        let result = self
            .correlator
            .request(
                McpMethod::ListTools.as_str(),
                None,
                self.config.request_timeout,
            )
            .await;
        let result = self.observe(result)?;

        self.tools = parse_tool_list(&result);
        info!(
            session = %self.id,
            count = self.tools.len(),
            "Discovered tools: {:?}",
            self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );
        Ok(&self.tools)
    }

    /// Send a `tools/call` without waiting. Pair with [`await_response`](Self::await_response).
    pub async fn submit_tool_call(&self, name: &str, arguments: Value) -> Result<u64, BridgeError> {
        self.require("call tools", SessionState::Ready)?;
        if self.tool(name).is_none() {
            return Err(BridgeError::UnknownTool {
                name: name.to_string(),
            });
        }

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let submitted = self
            .correlator
            .submit_within(
                McpMethod::CallTool.as_str(),
                Some(params),
                self.config.tool_call_timeout,
            )
            .await;
        self.observe(submitted)
    }

    /// Wait for the response to a submitted call. On timeout the call stays pending.
    pub async fn await_response(&self, id: u64, timeout: Duration) -> Result<Value, BridgeError> {
        if self.state() == SessionState::Closed {
            return Err(BridgeError::SessionClosed);
        }
        let response = self.correlator.await_response(id, timeout).await;
        self.observe(response)
    }

    /// Give up on a submitted call; its reply will be discarded.
    pub fn abandon(&self, id: u64) -> bool {
        self.correlator.abandon(id)
    }

    /// Call a tool and wait for its result.
    ///
    /// An `error` envelope becomes [`BridgeError::Remote`]; a tool that ran and
    /// reported failure in its payload is an `Ok` result with
    /// [`ToolCallResult::is_failure`] set.
    ///
    /// The tool call timeout covers both sending the request and the reply.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, BridgeError> {
        let budget = self.config.tool_call_timeout;
        let deadline = tokio::time::Instant::now() + budget;
        let id = self.submit_tool_call(name, arguments).await?;
        debug!(session = %self.id, id, tool = name, "Calling tool");

        if self.state() == SessionState::Closed {
            return Err(BridgeError::SessionClosed);
        }
        let response = self.correlator.await_until(id, deadline, budget).await;
        match self.observe(response) {
            Ok(raw) => Ok(ToolCallResult::new(name, raw)),
            Err(e) => {
                if matches!(e, BridgeError::Timeout { .. }) {
                    self.correlator.abandon(id);
                }
                Err(e)
            }
        }
    }

    /// Number of calls submitted but not yet claimed.
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Shut the session down. Pending calls fail with `SessionClosed`.
    ///
    /// A `Failed` session stays `Failed`; its process is still released.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        {
            let mut state = self.state.write();
            match *state {
                SessionState::Closed => return Ok(()),
                SessionState::Failed => {}
                previous => {
                    info!(
                        session = %self.id,
                        server = %self.name,
                        "Session {} -> closed",
                        previous
                    );
                    *state = SessionState::Closed;
                }
            }
        }
        self.correlator.fail_all(Shutdown::Closed);
        let terminated = self.transport.terminate().await;
        if let Some(router) = self.router.take() {
            router.abort();
        }
        terminated.map_err(BridgeError::from)
    }

    /// Move to `Failed` and release the process.
    async fn teardown(&mut self, reason: Shutdown) {
        self.set_state(SessionState::Failed);
        self.correlator.fail_all(reason);
        if let Err(e) = self.transport.terminate().await {
            debug!(session = %self.id, "Terminate during teardown: {}", e);
        }
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

/// Read, decode and dispatch stdout lines until the stream ends.
fn spawn_router(
    name: String,
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    state: Arc<parking_lot::RwLock<SessionState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let line = match transport.read_line(None).await {
                Ok(line) => line,
                Err(e) => {
                    let closed = {
                        let mut state = state.write();
                        let closed = *state == SessionState::Closed;
                        if !state.is_terminal() {
                            error!(server = %name, "Tool server output ended: {}", e);
                            *state = SessionState::Failed;
                        }
                        closed
                    };
                    correlator.fail_all(if closed {
                        Shutdown::Closed
                    } else {
                        Shutdown::TransportLost
                    });
                    break;
                }
            };

            match codec::decode(&line) {
                Ok(Some(envelope)) => correlator.dispatch(envelope),
                Ok(None) => {}
                Err(e) => warn!(
                    server = %name,
                    "Skipping malformed line ({}): {}",
                    e,
                    preview(&line)
                ),
            }
        }
    })
}

fn preview(line: &str) -> String {
    const MAX: usize = 120;
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(MAX).collect::<String>())
    }
}

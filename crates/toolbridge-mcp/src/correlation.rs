//! Request/response correlation.
//!
//! Every outbound request gets the next integer id and a [`PendingCall`]
//! entry. Responses are parked in the entry's slot as they arrive, in any
//! order, and stay there until the owner of the id claims them. Ids are never
//! reused, so a late reply to an abandoned call can only ever be discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::codec::{self, Envelope};
use crate::error::{millis, BridgeError, TransportError};
use crate::protocol::{
    RequestId, RpcError, RpcErrorResponse, RpcNotification, RpcRequest, RpcResponse,
};
use crate::transport::Transport;

/// Write deadline used when the caller does not supply one.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Why pending calls were failed in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The owner closed the session.
    Closed,
    /// The server's output stream ended or broke.
    TransportLost,
}

impl Shutdown {
    fn to_error(self) -> BridgeError {
        match self {
            Shutdown::Closed => BridgeError::SessionClosed,
            Shutdown::TransportLost => BridgeError::Transport(TransportError::Closed),
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Result(Value),
    Error(RpcError),
    Failed(Shutdown),
}

impl Outcome {
    fn into_result(self) -> Result<Value, BridgeError> {
        match self {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(err) => Err(BridgeError::Remote {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            Outcome::Failed(reason) => Err(reason.to_error()),
        }
    }
}

/// One outstanding request.
#[derive(Debug)]
struct PendingCall {
    method: String,
    submitted_at: Instant,
    slot: Option<Outcome>,
    signal: Arc<Notify>,
}

impl PendingCall {
    fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            submitted_at: Instant::now(),
            slot: None,
            signal: Arc::new(Notify::new()),
        }
    }

    fn fill(&mut self, outcome: Outcome) {
        self.slot = Some(outcome);
        // notify_one stores a permit when nobody is waiting yet.
        self.signal.notify_one();
    }
}

/// Assigns ids, writes requests and matches responses back to them.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    /// Next id to hand out. Held across the write so requests hit the wire in id order.
    next_id: tokio::sync::Mutex<u64>,
    pending: parking_lot::Mutex<HashMap<u64, PendingCall>>,
    shutdown: parking_lot::Mutex<Option<Shutdown>>,
    write_timeout: Duration,
}

impl Correlator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: tokio::sync::Mutex::new(1),
            pending: parking_lot::Mutex::new(HashMap::new()),
            shutdown: parking_lot::Mutex::new(None),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Deadline for notifications, server replies and [`submit`](Self::submit).
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Write one line, giving up after `limit`.
    ///
    /// A timed-out write may leave half a record on the wire, so it shuts the
    /// correlator down: nothing written afterwards could be framed correctly.
    async fn write_bounded(&self, line: &str, limit: Duration) -> Result<(), TransportError> {
        match tokio::time::timeout(limit, self.transport.write_line(line)).await {
            Ok(written) => written,
            Err(_) => {
                warn!(timeout_ms = millis(limit), "Peer stopped reading its input");
                self.fail_all(Shutdown::TransportLost);
                Err(TransportError::WriteTimeout {
                    timeout_ms: millis(limit),
                })
            }
        }
    }

    fn check_open(&self) -> Result<(), BridgeError> {
        match *self.shutdown.lock() {
            Some(reason) => Err(reason.to_error()),
            None => Ok(()),
        }
    }

    /// Send a request and register it. Returns the id to await.
    pub async fn submit(&self, method: &str, params: Option<Value>) -> Result<u64, BridgeError> {
        self.submit_within(method, params, self.write_timeout).await
    }

    /// Like [`submit`](Self::submit), with the write bounded by `write_timeout`.
    pub async fn submit_within(
        &self,
        method: &str,
        params: Option<Value>,
        write_timeout: Duration,
    ) -> Result<u64, BridgeError> {
        let mut next_id = self.next_id.lock().await;
        self.check_open()?;

        let id = *next_id;
        *next_id += 1;

        let mut request = RpcRequest::new(id, method);
        if let Some(p) = params {
            request = request.with_params(p);
        }
        let line = codec::encode(&request.into())?;

        // Register before writing: the reply may be dispatched before write_line returns.
        self.pending.lock().insert(id, PendingCall::new(method));

        if let Err(e) = self.write_bounded(&line, write_timeout).await {
            self.pending.lock().remove(&id);
            warn!(id, method, "Failed to send request: {}", e);
            return Err(e.into());
        }

        debug!(id, method, "Sent request");
        Ok(id)
    }

    /// Send a notification. Nothing is registered and no reply is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BridgeError> {
        let _order = self.next_id.lock().await;
        self.check_open()?;

        let mut notification = RpcNotification::new(method);
        if let Some(p) = params {
            notification = notification.with_params(p);
        }
        let line = codec::encode(&notification.into())?;
        self.write_bounded(&line, self.write_timeout).await?;

        debug!(method, "Sent notification");
        Ok(())
    }

    /// Wait up to `timeout` for the response to `id`.
    ///
    /// On timeout the call stays registered, so the caller can wait again or
    /// [`abandon`](Self::abandon) it.
    pub async fn await_response(&self, id: u64, timeout: Duration) -> Result<Value, BridgeError> {
        self.await_until(id, tokio::time::Instant::now() + timeout, timeout).await
    }

    /// Wait for `id` until `deadline`; `budget` is what a timeout reports.
    pub(crate) async fn await_until(
        &self,
        id: u64,
        deadline: tokio::time::Instant,
        budget: Duration,
    ) -> Result<Value, BridgeError> {
        loop {
            let (signal, method) = {
                let mut pending = self.pending.lock();
                let Some(call) = pending.get_mut(&id) else {
                    return Err(match *self.shutdown.lock() {
                        Some(reason) => reason.to_error(),
                        None => BridgeError::UnknownRequest { id },
                    });
                };

                if let Some(outcome) = call.slot.take() {
                    debug!(
                        id,
                        method = %call.method,
                        elapsed_ms = millis(call.submitted_at.elapsed()),
                        "Request resolved"
                    );
                    pending.remove(&id);
                    return outcome.into_result();
                }

                (call.signal.clone(), call.method.clone())
            };

            if tokio::time::timeout_at(deadline, signal.notified())
                .await
                .is_err()
            {
                debug!(id, method = %method, "Timed out waiting for response");
                return Err(BridgeError::Timeout {
                    method,
                    id,
                    timeout_ms: millis(budget),
                });
            }
        }
    }

    /// Submit, await, and abandon the call if it times out.
    ///
    /// `timeout` covers both writing the request and waiting for the reply.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let id = self.submit_within(method, params, timeout).await?;
        let result = self.await_until(id, deadline, timeout).await;
        if matches!(result, Err(BridgeError::Timeout { .. })) {
            self.abandon(id);
        }
        result
    }

    /// Stop tracking `id`. A reply arriving later is discarded.
    pub fn abandon(&self, id: u64) -> bool {
        let removed = self.pending.lock().remove(&id).is_some();
        if removed {
            debug!(id, "Abandoned request");
        }
        removed
    }

    /// Route one inbound envelope. Never waits on the transport.
    pub fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response(resp) => self.resolve(resp.id, Outcome::Result(resp.result)),
            Envelope::ErrorResponse(resp) => self.resolve(resp.id, Outcome::Error(resp.error)),
            Envelope::Notification(note) => {
                debug!(method = %note.method, "Ignoring server notification");
            }
            Envelope::Request(req) => self.answer_server_request(req),
        }
    }

    fn resolve(&self, id: RequestId, outcome: Outcome) {
        let Some(numeric) = id.as_u64() else {
            warn!(id = %id, "Discarding response with an id this client never issued");
            return;
        };

        let mut pending = self.pending.lock();
        match pending.get_mut(&numeric) {
            Some(call) if call.slot.is_none() => {
                debug!(id = numeric, method = %call.method, "Response buffered");
                call.fill(outcome);
            }
            Some(_) => warn!(id = numeric, "Duplicate response ignored"),
            None => debug!(id = numeric, "Discarding response for abandoned or unknown request"),
        }
    }

    /// Servers may ping the client; everything else is politely refused.
    ///
    /// The reply is written from its own task so a stalled peer cannot hold
    /// up response routing.
    fn answer_server_request(&self, req: RpcRequest) {
        let reply: Envelope = if req.method == "ping" {
            RpcResponse::new(req.id, serde_json::json!({})).into()
        } else {
            warn!(id = %req.id, method = %req.method, "Refusing server-initiated request");
            RpcErrorResponse::new(req.id, RpcError::method_not_found()).into()
        };

        let line = match codec::encode(&reply) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode reply to server request: {}", e);
                return;
            }
        };

        let transport = self.transport.clone();
        let limit = self.write_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(limit, transport.write_line(&line)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to answer server request: {}", e),
                Err(_) => warn!(
                    timeout_ms = millis(limit),
                    "Timed out answering server request"
                ),
            }
        });
    }

    /// Fail every pending call and refuse new traffic.
    pub fn fail_all(&self, reason: Shutdown) {
        {
            let mut shutdown = self.shutdown.lock();
            if shutdown.is_none() {
                *shutdown = Some(reason);
            }
        }

        let mut pending = self.pending.lock();
        let mut failed = 0;
        for call in pending.values_mut() {
            if call.slot.is_none() {
                call.fill(Outcome::Failed(reason));
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, ?reason, "Failed pending requests");
        }
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
#[path = "correlation_tests.rs"]
mod tests;

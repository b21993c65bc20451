//! Line codec for JSON-RPC envelopes.
//!
//! Every message on the wire is a single JSON object terminated by `\n`.
//! `serde_json` escapes control characters inside strings, so an encoded
//! envelope can never contain an embedded record separator.

use serde_json::{Map, Value};

use crate::protocol::{
    RequestId, RpcError, RpcErrorResponse, RpcNotification, RpcRequest, RpcResponse,
    JSONRPC_VERSION,
};

/// One JSON-RPC message unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(RpcRequest),
    Notification(RpcNotification),
    Response(RpcResponse),
    ErrorResponse(RpcErrorResponse),
}

impl Envelope {
    /// The id carried by requests and responses.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Envelope::Request(r) => Some(&r.id),
            Envelope::Response(r) => Some(&r.id),
            Envelope::ErrorResponse(r) => Some(&r.id),
            Envelope::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            Envelope::Response(_) | Envelope::ErrorResponse(_) => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Envelope::Response(_) | Envelope::ErrorResponse(_))
    }
}

impl From<RpcRequest> for Envelope {
    fn from(r: RpcRequest) -> Self {
        Envelope::Request(r)
    }
}

impl From<RpcNotification> for Envelope {
    fn from(n: RpcNotification) -> Self {
        Envelope::Notification(n)
    }
}

impl From<RpcResponse> for Envelope {
    fn from(r: RpcResponse) -> Self {
        Envelope::Response(r)
    }
}

impl From<RpcErrorResponse> for Envelope {
    fn from(r: RpcErrorResponse) -> Self {
        Envelope::ErrorResponse(r)
    }
}

/// A line that could not be turned into an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("message has neither 'method' nor 'result'/'error'")]
    UnknownShape,
}

/// Encode an envelope as one line, including the trailing `\n`.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    let mut line = match envelope {
        Envelope::Request(r) => serde_json::to_string(r)?,
        Envelope::Notification(n) => serde_json::to_string(n)?,
        Envelope::Response(r) => serde_json::to_string(r)?,
        Envelope::ErrorResponse(r) => serde_json::to_string(r)?,
    };
    line.push('\n');
    Ok(line)
}

/// Decode one line.
///
/// Blank lines decode to `Ok(None)` and should simply be skipped.
pub fn decode(line: &str) -> Result<Option<Envelope>, CodecError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)?;
    let Value::Object(obj) = value else {
        return Err(CodecError::NotAnObject);
    };

    let jsonrpc = obj
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or(JSONRPC_VERSION)
        .to_string();

    if let Some(method) = obj.get("method") {
        let method = method
            .as_str()
            .ok_or_else(|| CodecError::InvalidField {
                field: "method",
                reason: "expected a string".to_string(),
            })?
            .to_string();
        let params = obj.get("params").cloned();

        let envelope = match obj.get("id") {
            None => Envelope::Notification(RpcNotification {
                jsonrpc,
                method,
                params,
            }),
            Some(id) => Envelope::Request(RpcRequest {
                jsonrpc,
                id: parse_id(id)?,
                method,
                params,
            }),
        };
        return Ok(Some(envelope));
    }

    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");
    if !has_result && !has_error {
        return Err(CodecError::UnknownShape);
    }
    if has_result && has_error {
        return Err(CodecError::InvalidField {
            field: "error",
            reason: "response carries both 'result' and 'error'".to_string(),
        });
    }

    let id = response_id(&obj)?;
    if has_error {
        let error: RpcError = serde_json::from_value(obj["error"].clone()).map_err(|e| {
            CodecError::InvalidField {
                field: "error",
                reason: e.to_string(),
            }
        })?;
        return Ok(Some(Envelope::ErrorResponse(RpcErrorResponse {
            jsonrpc,
            id,
            error,
        })));
    }

    Ok(Some(Envelope::Response(RpcResponse {
        jsonrpc,
        id,
        result: obj["result"].clone(),
    })))
}

fn response_id(obj: &Map<String, Value>) -> Result<RequestId, CodecError> {
    match obj.get("id") {
        None | Some(Value::Null) => Err(CodecError::MissingField("id")),
        Some(id) => parse_id(id),
    }
}

fn parse_id(id: &Value) -> Result<RequestId, CodecError> {
    match id {
        Value::Number(n) => n.as_u64().map(RequestId::Number).ok_or_else(|| {
            CodecError::InvalidField {
                field: "id",
                reason: format!("expected a non-negative integer, got {}", n),
            }
        }),
        Value::String(s) => Ok(RequestId::String(s.clone())),
        other => Err(CodecError::InvalidField {
            field: "id",
            reason: format!("expected a number or string, got {}", other),
        }),
    }
}

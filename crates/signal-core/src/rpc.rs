//! JSON-RPC 2.0 framing for the control channel.
//!
//! One JSON document per WebSocket text frame. Requests carry an `id` and are
//! always answered; notifications omit the `id`. The registry only ever sends
//! responses and notifications, so a client can route frames by shape alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// Protocol version string carried in every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request or notification frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Method name, see [`crate::message::methods`].
    pub method: String,
    /// Method parameters. Defaults to `null` when absent.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Correlation id. `None` marks a notification: no response expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Build a request that expects a response.
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    /// Build a notification: fire-and-forget, no response.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// True when no response is expected.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Serialize to a single-frame JSON string.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse from a frame's text.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// A response frame. Exactly one of `result` / `error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    /// Echo of the request's correlation id.
    pub id: Value,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(result: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Build an error response.
    pub fn failure(error: RpcErrorObject, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// True when the response carries a result rather than an error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Serialize to a single-frame JSON string.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse from a frame's text.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Error payload inside an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Build an error object without extra data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Build an error object with structured extra data.
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Any frame that can appear on the control channel.
///
/// Variant order matters: a request is distinguished by its required
/// `method` field, so it must be tried first. Responses have no `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcFrame {
    Request(RpcRequest),
    Response(RpcResponse),
}

impl RpcFrame {
    /// Parse a frame of either shape from text.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Serialize to a single-frame JSON string.
    pub fn to_json(&self) -> ProtocolResult<String> {
        match self {
            Self::Request(req) => req.to_json(),
            Self::Response(resp) => resp.to_json(),
        }
    }
}

/// Error codes used on the control channel.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The frame is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal registry error.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Relay target is not currently registered.
    pub const PEER_NOT_FOUND: i32 = -32000;
    /// The connection has not completed `registry.register`.
    pub const NOT_REGISTERED: i32 = -32001;
    /// The connection already holds a registered identity.
    pub const ALREADY_REGISTERED: i32 = -32002;
}

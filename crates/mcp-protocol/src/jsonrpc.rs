//! JSON-RPC 2.0 base types for MCP.

use serde::{Deserialize, Serialize};

use crate::error::McpError;
use crate::methods::Methods;

/// JSON-RPC 2.0 request ID, either a string or integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

/// An inbound JSON-RPC 2.0 message.
///
/// Requests and notifications share this shape; a message without an
/// `id` is a notification and never gets a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// How the transport treats an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `initialize` request, the only message that may open a session.
    Initialize,
    /// No id, no response expected.
    Notification,
    /// Any other request carrying an id.
    Request,
}

/// JSON-RPC 2.0 success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSuccessResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: serde_json::Value,
}

/// JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: McpError,
}

/// JSON-RPC 2.0 response (success or error).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpResponse {
    Success(McpSuccessResponse),
    Error(McpErrorResponse),
}

/// JSON-RPC 2.0 notification sent from the server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Result from a request handler.
pub type HandlerResult = Result<serde_json::Value, McpError>;

// ─────────────────────────────────────────────────────────────────────────────
// Helper constructors
// ─────────────────────────────────────────────────────────────────────────────

impl McpRequest {
    pub fn new(
        id: Option<RequestId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Validate that this is a well-formed JSON-RPC 2.0 message.
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == "2.0" && !self.method.is_empty()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn kind(&self) -> MessageKind {
        match &self.id {
            None => MessageKind::Notification,
            Some(_) if self.method == Methods::INITIALIZE => MessageKind::Initialize,
            Some(_) => MessageKind::Request,
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl McpSuccessResponse {
    pub fn new(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result,
        }
    }
}

impl McpErrorResponse {
    pub fn new(id: Option<RequestId>, error: McpError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            error,
        }
    }
}

impl McpNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        }
    }
}

impl McpResponse {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self::Success(McpSuccessResponse::new(id, result))
    }

    pub fn error(id: Option<RequestId>, error: McpError) -> Self {
        Self::Error(McpErrorResponse::new(id, error))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

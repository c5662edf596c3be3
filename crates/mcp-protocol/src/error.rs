//! MCP error types: standard JSON-RPC 2.0 codes plus the session
//! transport's own server-error range (-32000 to -32099).

use serde::{Deserialize, Serialize};

/// Standard JSON-RPC 2.0 error codes plus session transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpErrorCode {
    // JSON-RPC 2.0 standard errors
    ParseError,
    InvalidRequest,
    MethodNotFound,
    /// Also used for tool arguments that do not match the declared shape.
    InvalidParams,
    InternalError,

    // Session transport errors
    /// Session id missing on a non-handshake request, or not registered.
    UnknownSession,
    /// Message not valid for the session's current state.
    ProtocolState,
    UnknownCapability,
    SessionLimit,
    StreamConflict,

    // Custom code
    Custom(i32),
}

impl McpErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::UnknownSession => -32000,
            Self::ProtocolState => -32002,
            Self::UnknownCapability => -32003,
            Self::SessionLimit => -32004,
            Self::StreamConflict => -32005,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::UnknownSession,
            -32002 => Self::ProtocolState,
            -32003 => Self::UnknownCapability,
            -32004 => Self::SessionLimit,
            -32005 => Self::StreamConflict,
            c => Self::Custom(c),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("MCP Error [{code}]: {message}")]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl McpError {
    pub fn new(code: McpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(McpErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InternalError, message)
    }

    pub fn unknown_session(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::UnknownSession, message)
    }

    pub fn protocol_state(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::ProtocolState, message)
    }

    pub fn unknown_capability(name: &str) -> Self {
        Self::new(McpErrorCode::UnknownCapability, format!("Unknown tool: {name}"))
    }

    pub fn error_code(&self) -> McpErrorCode {
        McpErrorCode::from_code(self.code)
    }
}

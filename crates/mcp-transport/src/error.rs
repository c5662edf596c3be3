//! Transport-level failures and their wire representation.

use axum::http::StatusCode;
use mcp_protocol::{McpError, McpErrorCode};

/// Everything that can go wrong between the HTTP exchange and the dispatcher.
///
/// Each variant knows the HTTP status it is reported with and converts into
/// the JSON-RPC error object written to the body.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Non-handshake request without a session id.
    #[error("Bad Request: No valid session ID provided")]
    MissingSession,

    /// Session id was never issued or its session is closed.
    #[error("Session not found: {0}")]
    UnknownSession(String),

    #[error("{0}")]
    ProtocolState(String),

    #[error("Session limit reached ({0} active sessions)")]
    SessionLimit(usize),

    #[error("Session {0} already has an open event stream")]
    StreamConflict(String),

    /// A freshly generated id was already registered. Never overwritten.
    #[error("Session id already registered: {0}")]
    IdCollision(String),

    #[error("Invalid transport configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Rpc(#[from] McpError),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingSession | Self::ProtocolState(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::SessionLimit(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::StreamConflict(_) => StatusCode::CONFLICT,
            Self::IdCollision(_) | Self::Config(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Rpc(e) => match e.error_code() {
                McpErrorCode::ParseError | McpErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
                McpErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::OK,
            },
        }
    }

    /// JSON-RPC error object for the response body.
    pub fn to_rpc_error(&self) -> McpError {
        match self {
            Self::MissingSession | Self::UnknownSession(_) => {
                McpError::unknown_session(self.to_string())
            }
            Self::ProtocolState(_) => McpError::protocol_state(self.to_string()),
            Self::SessionLimit(_) => McpError::new(McpErrorCode::SessionLimit, self.to_string()),
            Self::StreamConflict(_) => {
                McpError::new(McpErrorCode::StreamConflict, self.to_string())
            }
            Self::IdCollision(_) | Self::Config(_) | Self::Io(_) => {
                McpError::internal(self.to_string())
            }
            Self::Rpc(e) => e.clone(),
        }
    }
}

//! MCP (Model Context Protocol) - Protocol Types
//!
//! JSON-RPC 2.0 messages as spoken over the Streamable HTTP transport.
//! This crate is the single source of truth for message shapes, method
//! names, notification names, and error codes shared by the transport,
//! the dispatcher, and the tool registry.

pub mod context;
pub mod error;
pub mod jsonrpc;
pub mod lifecycle;
pub mod methods;
pub mod tools;

pub use context::RequestContext;
pub use error::{McpError, McpErrorCode};
pub use jsonrpc::{
    HandlerResult, McpErrorResponse, McpNotification, McpRequest, McpResponse,
    McpSuccessResponse, MessageKind, RequestId,
};
pub use lifecycle::{
    Implementation, InitializeParams, InitializeResult, ServerCapabilities, ToolsCapability,
    LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS, negotiate_protocol_version,
};
pub use methods::{Methods, Notifications};
pub use tools::{CallToolParams, CallToolResult, Content, ToolDescriptor};

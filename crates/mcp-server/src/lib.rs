//! MCP Server: dispatches JSON-RPC methods for a session.
//!
//! The server owns the tool registry and the identity it reports during the
//! handshake, and provides the `RequestHandler` implementation for the
//! transport layer.

pub mod router;

pub use router::McpServer;

//! MCP Transport Layer
//!
//! Streamable HTTP binding with per-client sessions. The [`SessionRouter`]
//! maps `mcp-session-id` values to [`TransportInstance`]s; each instance runs
//! the `Pending -> Active -> Closed` lifecycle, serializes its own requests
//! and owns the push channel behind its event stream.

pub mod error;
pub mod instance;
pub mod server;
pub mod session;

pub use error::TransportError;
pub use instance::{CloseReason, EventStream, SessionState, TransportInstance};
pub use server::{RequestHandler, SESSION_ID_HEADER, TransportConfig, TransportServer, app};
pub use session::SessionRouter;

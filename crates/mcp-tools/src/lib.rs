//! MCP Tool Implementations
//!
//! Each tool implements the `Tool` trait: a name, a declared input schema,
//! a typed argument shape, and an async handler. Tools are collected into an
//! immutable [`ToolRegistry`] at startup which the dispatcher consults for
//! `tools/list` and `tools/call`.

pub mod calculator;
pub mod registry;

use mcp_protocol::CallToolResult;
use serde::de::DeserializeOwned;

pub use registry::{RegisteredTool, RegistryError, ToolRegistry, ToolRegistryBuilder};

/// A business-level failure reported by a tool handler.
///
/// The registry turns these into a `CallToolResult` with `isError: true`;
/// they never become JSON-RPC errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("{operation} overflowed for operands {a} and {b}")]
    Overflow {
        operation: &'static str,
        a: String,
        b: String,
    },
    #[error("{operation} produced a non-finite result")]
    NonFinite { operation: &'static str },
    #[error("{0}")]
    Failed(String),
}

/// Trait implemented by all tools.
pub trait Tool: Send + Sync {
    /// Argument shape. Deserializing into it is the argument validation step:
    /// a value that does not fit never reaches [`Tool::call`].
    type Args: DeserializeOwned + Send;

    /// Unique name clients use in `tools/call`.
    fn name(&self) -> &str;

    /// Human-readable description shown in `tools/list`.
    fn description(&self) -> &str;

    /// JSON schema advertised for the arguments. Must describe an object.
    fn input_schema(&self) -> serde_json::Value;

    /// Run the tool with validated arguments.
    fn call(
        &self,
        args: Self::Args,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ToolError>> + Send;
}

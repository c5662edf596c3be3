//! ToolRegistry: read-only map from tool name to handler.
//!
//! Built once at startup through [`ToolRegistryBuilder`]; duplicate names
//! fail the build. After `build()` nothing can be added or removed, so the
//! registry can be shared across sessions behind an `Arc` without locking.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use mcp_protocol::{CallToolResult, McpError, ToolDescriptor};
use serde_json::Value;
use tracing::{debug, info};

use crate::Tool;

/// Startup-time registry configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool registered twice: {0}")]
    DuplicateTool(String),
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("input schema for tool {name} is invalid: {reason}")]
    InvalidSchema { name: String, reason: String },
}

type CallFuture<'a> = Pin<Box<dyn Future<Output = CallToolResult> + Send + 'a>>;

/// Object-safe wrapper for the Tool trait.
trait ToolDyn: Send + Sync {
    fn prepare_dyn(&self, arguments: Value) -> Result<CallFuture<'_>, McpError>;
}

impl<T: Tool> ToolDyn for T {
    fn prepare_dyn(&self, arguments: Value) -> Result<CallFuture<'_>, McpError> {
        let args: T::Args = serde_json::from_value(arguments).map_err(|e| {
            McpError::invalid_params(format!("Invalid arguments for tool {}: {e}", self.name()))
        })?;

        Ok(Box::pin(async move {
            match self.call(args).await {
                Ok(result) => result,
                Err(e) => CallToolResult::error(e.to_string()),
            }
        }))
    }
}

/// A tool together with the descriptor advertised for it.
pub struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Box<dyn ToolDyn>,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Validate `arguments` against the tool's shape and run it.
    ///
    /// Shape mismatches return `InvalidParams` without touching the handler.
    /// Handler failures come back as `Ok` with `is_error` set.
    pub async fn invoke(&self, arguments: Option<Value>) -> Result<CallToolResult, McpError> {
        let arguments = arguments.unwrap_or_else(|| Value::Object(Default::default()));
        let call = self.tool.prepare_dyn(arguments)?;
        debug!("Invoking tool: {}", self.descriptor.name);
        Ok(call.await)
    }
}

/// Immutable set of tools keyed by unique name, in registration order.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Look up `name` and invoke it.
    pub async fn call(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult, McpError> {
        let tool = self
            .lookup(name)
            .ok_or_else(|| McpError::unknown_capability(name))?;
        tool.invoke(arguments).await
    }

    /// Descriptors for `tools/list`.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Collects tools before the registry is frozen.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails on a duplicate or empty name, or when the
    /// declared schema does not describe an object.
    pub fn register<T: Tool + 'static>(mut self, tool: T) -> Result<Self, RegistryError> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }

        let input_schema = tool.input_schema();
        if input_schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(RegistryError::InvalidSchema {
                name,
                reason: "top-level type must be \"object\"".into(),
            });
        }

        info!("Registering tool: {name}");
        let descriptor = ToolDescriptor {
            name: name.clone(),
            description: tool.description().to_string(),
            input_schema,
        };
        self.index.insert(name, self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            tool: Box::new(tool),
        });
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            index: self.index,
        }
    }
}

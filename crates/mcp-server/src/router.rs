//! MCP Server Router: dispatches JSON-RPC methods to lifecycle handling or
//! the tool registry.

use std::sync::Arc;

use mcp_protocol::{
    CallToolParams, HandlerResult, Implementation, InitializeParams, InitializeResult, McpError,
    Methods, Notifications, RequestContext, ServerCapabilities, ToolsCapability,
    negotiate_protocol_version,
};
use mcp_tools::ToolRegistry;
use mcp_transport::RequestHandler;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "calculator-server";
/// Version reported in `serverInfo`.
pub const SERVER_VERSION: &str = "1.0.0";

/// The MCP server: owns the tools and answers every method a session sends
/// once the transport has let it through.
pub struct McpServer {
    server_info: Implementation,
    instructions: Option<String>,
    tools: Arc<ToolRegistry>,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self::with_shared_tools(Arc::new(tools))
    }

    pub fn with_shared_tools(tools: Arc<ToolRegistry>) -> Self {
        info!("MCP server ready ({} tools)", tools.len());
        Self {
            server_info: Implementation::new(SERVER_NAME, SERVER_VERSION),
            instructions: None,
            tools,
        }
    }

    /// Override the identity reported in `serverInfo`.
    pub fn with_server_info(mut self, info: Implementation) -> Self {
        self.server_info = info;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    fn initialize(&self, ctx: &RequestContext, params: Option<Value>) -> HandlerResult {
        let params: InitializeParams = parse_params(params)?;
        let protocol_version = negotiate_protocol_version(&params.protocol_version);
        info!(
            "Session {} initializing: client {} {} (protocol {})",
            ctx.session_id, params.client_info.name, params.client_info.version, protocol_version
        );

        let result = InitializeResult {
            protocol_version: protocol_version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        };
        to_value(result)
    }

    fn list_tools(&self) -> HandlerResult {
        Ok(json!({ "tools": self.tools.list() }))
    }

    async fn call_tool(&self, ctx: &RequestContext, params: Option<Value>) -> HandlerResult {
        let params: CallToolParams = parse_params(params)?;
        debug!("Session {} calling tool {}", ctx.session_id, params.name);
        let result = self.tools.call(&params.name, params.arguments).await?;
        to_value(result)
    }
}

impl RequestHandler for McpServer {
    async fn handle_request(
        &self,
        ctx: &RequestContext,
        method: &str,
        params: Option<Value>,
    ) -> HandlerResult {
        match method {
            Methods::INITIALIZE => self.initialize(ctx, params),
            Methods::PING => Ok(json!({})),
            Methods::TOOLS_LIST => self.list_tools(),
            Methods::TOOLS_CALL => self.call_tool(ctx, params).await,
            _ => Err(McpError::method_not_found(method)),
        }
    }

    async fn handle_notification(&self, ctx: &RequestContext, method: &str, params: Option<Value>) {
        match method {
            Notifications::INITIALIZED => {
                info!("Session {} initialized", ctx.session_id);
            }
            Notifications::CANCELLED => {
                let request_id = params.as_ref().and_then(|p| p.get("requestId"));
                debug!("Session {} cancelled request {:?}", ctx.session_id, request_id);
            }
            other => {
                debug!("Session {} sent unhandled notification {other}", ctx.session_id);
            }
        }
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, McpError> {
    match params {
        Some(v) => serde_json::from_value(v)
            .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {e}"))),
        None => Err(McpError::invalid_params("Parameters required")),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| McpError::internal(format!("Failed to encode result: {e}")))
}

//! Calculator MCP Server
//!
//! Exposes `add` and `subtract` tools over the MCP Streamable HTTP
//! transport. Each client opens a session with `initialize`, then sends its
//! requests with the `mcp-session-id` header it was given.
//!
//! Usage:
//!   calculator-mcp                        # Default port 3001 (or $PORT)
//!   calculator-mcp --port 8080            # Custom port
//!   calculator-mcp --path /rpc --no-cors  # Different endpoint, no CORS

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mcp_server::McpServer;
use mcp_tools::calculator::calculator_tools;
use mcp_transport::{TransportConfig, TransportServer};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "calculator-mcp", about = "Calculator MCP server over Streamable HTTP")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, env = "PORT", default_value = "3001")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Endpoint path for MCP traffic
    #[arg(long, default_value = "/mcp")]
    path: String,

    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,

    /// Maximum concurrent sessions
    #[arg(long, default_value = "1024")]
    max_sessions: usize,

    /// Close sessions idle for this many seconds (0 disables)
    #[arg(long, default_value = "1800")]
    idle_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            port: self.port,
            hostname: self.hostname.clone(),
            path: self.path.clone(),
            enable_cors: !self.no_cors,
            max_sessions: Some(self.max_sessions),
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            ..TransportConfig::default()
        }
    }
}

fn init_tracing(cli: &Cli) -> Result<(), std::io::Error> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Failed to open log file: {e}");
        std::process::exit(1);
    }

    let tools = match calculator_tools() {
        Ok(tools) => tools,
        Err(e) => {
            error!("Failed to register tools: {e}");
            std::process::exit(1);
        }
    };
    let tool_names = tools.names().join(", ");
    let server = McpServer::new(tools);

    let config = cli.transport_config();
    let cors = config.enable_cors;
    let mut transport = match TransportServer::start(config, server).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport server: {e}");
            std::process::exit(1);
        }
    };

    println!();
    println!("  Calculator MCP Server");
    println!("────────────────────────────────────────────────────────────────");
    println!("  Endpoint:   {}", transport.url());
    println!("  Tools:      {tool_names}");
    println!("  CORS:       {}", if cors { "enabled" } else { "disabled" });
    println!("  Sessions:   up to {}", cli.max_sessions);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    println!();
    println!("  Shutting down...");
    transport.stop().await;
    println!("  Server stopped.");
}

//! Streamable HTTP transport server using Axum.
//!
//! One endpoint carries the whole session protocol: `POST` delivers a
//! JSON-RPC message, `GET` opens the session's push stream and `DELETE`
//! ends the session. The session id travels in the `mcp-session-id` header.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use futures_util::{StreamExt, stream};
use mcp_protocol::{McpError, McpRequest, McpResponse, RequestContext, RequestId};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::instance::CloseReason;
use crate::session::SessionRouter;

/// Header carrying the session id in both directions.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Trait implemented by the dispatcher to handle messages for a session.
/// The transport calls it only after the session's state gate has passed.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a JSON-RPC request and return its result.
    fn handle_request(
        &self,
        ctx: &RequestContext,
        method: &str,
        params: Option<Value>,
    ) -> impl std::future::Future<Output = mcp_protocol::HandlerResult> + Send;

    /// Handle a client notification. Nothing is sent back.
    fn handle_notification(
        &self,
        _ctx: &RequestContext,
        _method: &str,
        _params: Option<Value>,
    ) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Endpoint path for POST/GET/DELETE
    pub path: String,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum concurrent sessions
    pub max_sessions: Option<usize>,
    /// Sessions idle this long without a stream are closed. `None` disables reaping.
    pub idle_timeout: Option<Duration>,
    /// How often the idle reaper runs
    pub sweep_interval: Duration,
    /// Close a session when its event stream disconnects
    pub close_on_stream_disconnect: bool,
    /// Keep-alive comment interval on event streams
    pub keep_alive: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            hostname: "127.0.0.1".into(),
            path: "/mcp".into(),
            enable_cors: false,
            max_sessions: Some(1024),
            idle_timeout: Some(Duration::from_secs(30 * 60)),
            sweep_interval: Duration::from_secs(60),
            close_on_stream_disconnect: true,
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl TransportConfig {
    fn validate(&self) -> Result<(), TransportError> {
        if !self.path.starts_with('/') || self.path.len() < 2 {
            return Err(TransportError::Config(format!(
                "endpoint path must start with '/' and not be the root: {:?}",
                self.path
            )));
        }
        if self.path == "/health" {
            return Err(TransportError::Config("endpoint path collides with /health".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(TransportError::Config("sweep interval must be non-zero".into()));
        }
        if self.max_sessions == Some(0) {
            return Err(TransportError::Config("max sessions must be at least 1".into()));
        }
        Ok(())
    }
}

/// Shared state for the transport server.
struct AppState<H: RequestHandler> {
    handler: Arc<H>,
    sessions: SessionRouter,
    config: TransportConfig,
}

/// Build the axum router for `sessions`. Used by [`TransportServer::start`]
/// and directly by tests that drive the service without a socket.
pub fn app<H: RequestHandler>(
    config: TransportConfig,
    handler: Arc<H>,
    sessions: SessionRouter,
) -> Result<Router, TransportError> {
    config.validate()?;

    let path = config.path.clone();
    let enable_cors = config.enable_cors;
    let state = Arc::new(AppState {
        handler,
        sessions,
        config,
    });

    let router = Router::new()
        .route(
            &path,
            get(stream_handler::<H>)
                .post(message_handler::<H>)
                .delete(delete_handler::<H>),
        )
        .route("/health", get(health_handler::<H>))
        .with_state(state);

    if enable_cors {
        Ok(router.layer(cors_layer()))
    } else {
        Ok(router)
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)])
}

/// The transport server: owns the session router, the HTTP task and the
/// idle reaper.
pub struct TransportServer {
    sessions: SessionRouter,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    reaper: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
    hostname: String,
    path: String,
}

impl TransportServer {
    /// Start the transport server with the given request handler.
    pub async fn start<H: RequestHandler>(
        config: TransportConfig,
        handler: H,
    ) -> Result<Self, TransportError> {
        Self::start_with(config, Arc::new(handler)).await
    }

    /// Start with a shared handler.
    pub async fn start_with<H: RequestHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, TransportError> {
        let sessions = SessionRouter::new(config.max_sessions, config.close_on_stream_disconnect);
        let app = app(config.clone(), handler, sessions.clone())?;

        let listener =
            tokio::net::TcpListener::bind((config.hostname.as_str(), config.port)).await?;
        let actual_port = listener.local_addr()?.port();

        info!(
            "MCP transport listening on http://{}:{}{}",
            config.hostname, actual_port, config.path
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
            {
                warn!("MCP transport server error: {e}");
            }
        });

        let reaper = config
            .idle_timeout
            .map(|timeout| spawn_reaper(sessions.clone(), timeout, config.sweep_interval));

        Ok(Self {
            sessions,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            reaper,
            port: actual_port,
            hostname: config.hostname,
            path: config.path,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Full endpoint URL.
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.hostname, self.port, self.path)
    }

    pub fn sessions(&self) -> &SessionRouter {
        &self.sessions
    }

    /// Stop accepting, close every session, then drain connections.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        // Open event streams only end once their session closes.
        let mut closed = self.sessions.close_all();
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        // Handshakes still in flight when the listener stopped.
        closed += self.sessions.close_all();
        if closed > 0 {
            info!("Closed {closed} sessions on shutdown");
        }
        info!("MCP transport server stopped");
    }
}

fn spawn_reaper(
    sessions: SessionRouter,
    timeout: Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sessions.close_idle(timeout);
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn message_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let session_id = session_id(&headers);
    let sse = wants_event_stream(&headers);

    let request = match parse_message(&body) {
        Ok(request) => request,
        Err((id, e)) => return error_response(id, None, e),
    };
    let id = request.id.clone();

    let instance = match state.sessions.route(session_id.as_deref(), &request) {
        Ok(instance) => instance,
        Err(e) => {
            warn!("Rejected {}: {e}", request.method);
            return error_response(id, None, e);
        }
    };

    match instance.handle(request, state.handler.as_ref()).await {
        Ok(None) => with_session(StatusCode::ACCEPTED.into_response(), Some(instance.id())),
        Ok(Some(result)) => {
            // Notifications never reach here, so an id is always present.
            let id = id.unwrap_or(RequestId::Number(0));
            let response = McpResponse::success(id, result);
            with_session(reply(StatusCode::OK, &response, sse), Some(instance.id()))
        }
        Err(e) => {
            debug!("Session {} request failed: {e}", instance.id());
            let echo = instance.is_active().then(|| instance.id());
            let response = McpResponse::error(id, e.to_rpc_error());
            with_session(reply(e.status(), &response, sse), echo)
        }
    }
}

async fn stream_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
) -> Response {
    let session_id = session_id(&headers);
    let instance = match state.sessions.lookup(session_id.as_deref()) {
        Ok(instance) => instance,
        Err(e) => return error_response(None, None, e),
    };
    let events = match instance.open_stream() {
        Ok(events) => events,
        Err(e) => return error_response(None, Some(instance.id()), e),
    };
    info!("Event stream opened for session {}", instance.id());

    let events = events
        .map(|message| Ok::<_, Infallible>(Event::default().event("message").data(message)));
    let response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.config.keep_alive))
        .into_response();
    with_session(response, Some(instance.id()))
}

async fn delete_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
) -> Response {
    let session_id = session_id(&headers);
    match state.sessions.lookup(session_id.as_deref()) {
        Ok(instance) => {
            instance.close(CloseReason::ClientRequest);
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(None, None, e),
    }
}

async fn health_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.sessions.len(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// True when the client accepts only an event stream for the response.
fn wants_event_stream(headers: &HeaderMap) -> bool {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    accept.contains("text/event-stream") && !accept.contains("application/json")
}

/// Decode one JSON-RPC message. On failure returns the request id if one
/// could be recovered.
fn parse_message(body: &[u8]) -> Result<McpRequest, (Option<RequestId>, TransportError)> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| (None, TransportError::Rpc(McpError::parse_error("Failed to parse JSON"))))?;

    if value.is_array() {
        return Err((
            None,
            TransportError::Rpc(McpError::invalid_request("Batch requests are not supported")),
        ));
    }

    let id: Option<RequestId> = value
        .get("id")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());

    let invalid = || TransportError::Rpc(McpError::invalid_request("Invalid JSON-RPC 2.0 request"));
    // A null id is neither a request id nor an absent one.
    if value.get("id").is_some_and(Value::is_null) {
        return Err((None, invalid()));
    }
    let request: McpRequest =
        serde_json::from_value(value).map_err(|_| (id.clone(), invalid()))?;
    if !request.is_valid() {
        return Err((id, invalid()));
    }
    Ok(request)
}

fn reply(status: StatusCode, response: &McpResponse, sse: bool) -> Response {
    if !sse {
        return (status, Json(response)).into_response();
    }
    let data = match serde_json::to_string(response) {
        Ok(data) => data,
        Err(e) => {
            let fallback = McpResponse::error(None, McpError::internal(e.to_string()));
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(fallback)).into_response();
        }
    };
    let event = Event::default().event("message").data(data);
    (status, Sse::new(stream::once(async move { Ok::<_, Infallible>(event) }))).into_response()
}

fn error_response(id: Option<RequestId>, session: Option<&str>, e: TransportError) -> Response {
    let response = McpResponse::error(id, e.to_rpc_error());
    with_session((e.status(), Json(response)).into_response(), session)
}

fn with_session(mut response: Response, session: Option<&str>) -> Response {
    if let Some(value) = session.and_then(|id| HeaderValue::from_str(id).ok()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
    }
    response
}

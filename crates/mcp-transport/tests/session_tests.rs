//! Session router, transport instance and HTTP binding tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use mcp_protocol::{
    HandlerResult, McpError, McpErrorCode, McpNotification, McpRequest, RequestContext, RequestId,
};
use mcp_transport::{
    CloseReason, RequestHandler, SESSION_ID_HEADER, SessionRouter, SessionState, TransportConfig,
    TransportError, app,
};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Minimal dispatcher: accepts `initialize` unless asked to fail, echoes
/// `echo`, tracks the peak number of concurrent `slow` calls.
#[derive(Default)]
struct StubHandler {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    notifications: AtomicUsize,
}

impl RequestHandler for StubHandler {
    async fn handle_request(
        &self,
        ctx: &RequestContext,
        method: &str,
        params: Option<Value>,
    ) -> HandlerResult {
        match method {
            "initialize" => {
                let fail = params
                    .as_ref()
                    .and_then(|p| p.get("fail"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if fail {
                    Err(McpError::invalid_params("handshake refused"))
                } else {
                    Ok(json!({ "session": ctx.session_id }))
                }
            }
            "echo" => Ok(params.unwrap_or(Value::Null)),
            "slow" => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(json!({}))
            }
            other => Err(McpError::method_not_found(other)),
        }
    }

    async fn handle_notification(&self, _ctx: &RequestContext, _method: &str, _params: Option<Value>) {
        self.notifications.fetch_add(1, Ordering::SeqCst);
    }
}

fn initialize() -> McpRequest {
    McpRequest::new(Some(RequestId::Number(1)), "initialize", Some(json!({})))
}

fn request(method: &str) -> McpRequest {
    McpRequest::new(Some(RequestId::Number(2)), method, None)
}

async fn open_session(router: &SessionRouter, handler: &StubHandler) -> String {
    let instance = router.route(None, &initialize()).unwrap();
    instance.handle(initialize(), handler).await.unwrap();
    instance.id().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

mod routing {
    use super::*;

    #[tokio::test]
    async fn handshake_registers_only_on_success() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();

        let instance = router.route(None, &initialize()).unwrap();
        assert_eq!(instance.state(), SessionState::Pending);
        assert!(!router.contains(instance.id()));

        let result = instance.handle(initialize(), &handler).await.unwrap().unwrap();
        assert_eq!(result["session"], instance.id());
        assert_eq!(instance.state(), SessionState::Active);
        assert!(router.contains(instance.id()));
        assert_eq!(router.len(), 1);
    }

    #[tokio::test]
    async fn failed_handshake_leaves_registry_untouched() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let init = McpRequest::new(Some(RequestId::Number(1)), "initialize", Some(json!({"fail": true})));

        let instance = router.route(None, &init).unwrap();
        let err = instance.handle(init, &handler).await.unwrap_err();
        assert!(matches!(err, TransportError::Rpc(ref e) if e.error_code() == McpErrorCode::InvalidParams));
        assert_ne!(instance.state(), SessionState::Active);
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn routed_request_reaches_bound_instance() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;

        let echo = McpRequest::new(Some(RequestId::Number(7)), "echo", Some(json!({"x": 1})));
        let instance = router.route(Some(&id), &echo).unwrap();
        assert_eq!(instance.id(), id);
        let result = instance.handle(echo, &handler).await.unwrap().unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[test]
    fn missing_session_id_is_rejected() {
        let router = SessionRouter::default();
        let err = router.route(None, &request("tools/list")).unwrap_err();
        assert!(matches!(err, TransportError::MissingSession));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32000);
        assert_eq!(rpc.message, "Bad Request: No valid session ID provided");
    }

    #[test]
    fn never_issued_session_id_is_unknown() {
        let router = SessionRouter::default();
        let err = router.route(Some("not-a-session"), &request("ping")).unwrap_err();
        assert!(matches!(err, TransportError::UnknownSession(ref id) if id == "not-a-session"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_rpc_error().error_code(), McpErrorCode::UnknownSession);
    }

    #[tokio::test]
    async fn initialize_with_session_id_goes_to_that_session() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;

        let instance = router.route(Some(&id), &initialize()).unwrap();
        assert_eq!(instance.id(), id);
        let err = instance.handle(initialize(), &handler).await.unwrap_err();
        assert!(matches!(err, TransportError::ProtocolState(_)));
        assert_eq!(err.to_rpc_error().error_code(), McpErrorCode::ProtocolState);

        // Non-fatal: the session keeps working.
        assert!(instance.handle(request("echo"), &handler).await.is_ok());
        assert_eq!(router.len(), 1);
    }

    #[tokio::test]
    async fn pending_session_refuses_requests_and_notifications() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let instance = router.route(None, &initialize()).unwrap();

        let err = instance.handle(request("echo"), &handler).await.unwrap_err();
        assert!(matches!(err, TransportError::ProtocolState(_)));

        let note = McpRequest::new(None, "notifications/initialized", None);
        let err = instance.handle(note, &handler).await.unwrap_err();
        assert!(matches!(err, TransportError::ProtocolState(_)));
        assert_eq!(handler.notifications.load(Ordering::SeqCst), 0);

        // The handshake can still complete afterwards.
        instance.handle(initialize(), &handler).await.unwrap();
        assert!(router.contains(instance.id()));
    }

    #[tokio::test]
    async fn notification_produces_no_result() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;

        let note = McpRequest::new(None, "notifications/initialized", None);
        let instance = router.route(Some(&id), &note).unwrap();
        assert!(instance.handle(note, &handler).await.unwrap().is_none());
        assert_eq!(handler.notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_limit_refuses_handshakes() {
        let router = SessionRouter::new(Some(1), true);
        let handler = StubHandler::default();
        open_session(&router, &handler).await;

        let err = router.route(None, &initialize()).unwrap_err();
        assert!(matches!(err, TransportError::SessionLimit(1)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_handshakes_never_collide() {
        const N: usize = 10_000;
        let router = SessionRouter::default();
        let handler = Arc::new(StubHandler::default());

        let tasks: Vec<_> = (0..N)
            .map(|_| {
                let router = router.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let instance = router.route(None, &initialize()).unwrap();
                    instance.handle(initialize(), handler.as_ref()).await.unwrap();
                    instance.id().to_string()
                })
            })
            .collect();

        let mut ids = HashSet::with_capacity(N);
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
        assert_eq!(ids.len(), N);
        assert_eq!(router.len(), N);
        for id in ids.iter().take(100) {
            assert!(router.lookup(Some(id)).is_ok());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn requests_for_one_session_are_serialized() {
        let router = SessionRouter::default();
        let handler = Arc::new(StubHandler::default());
        let id = open_session(&router, &handler).await;

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let instance = router.lookup(Some(&id)).unwrap();
                let handler = handler.clone();
                tokio::spawn(async move { instance.handle(request("slow"), handler.as_ref()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn close_removes_session_and_is_idempotent() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;
        let instance = router.lookup(Some(&id)).unwrap();

        assert!(instance.close(CloseReason::ClientRequest));
        assert!(!instance.close(CloseReason::ClientRequest));
        assert_eq!(instance.state(), SessionState::Closed);
        assert!(!router.contains(&id));

        let err = router.route(Some(&id), &request("echo")).unwrap_err();
        assert!(matches!(err, TransportError::UnknownSession(_)));

        // A handle obtained before close is refused too.
        let err = instance.handle(request("echo"), &handler).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn close_idle_skips_sessions_with_streams() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let idle = open_session(&router, &handler).await;
        let streaming = open_session(&router, &handler).await;

        let _stream = router.lookup(Some(&streaming)).unwrap().open_stream().unwrap();

        assert_eq!(router.close_idle(Duration::ZERO), 1);
        assert!(!router.contains(&idle));
        assert!(router.contains(&streaming));
    }

    #[tokio::test]
    async fn close_idle_keeps_recent_sessions() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;

        assert_eq!(router.close_idle(Duration::from_secs(3600)), 0);
        assert!(router.contains(&id));
    }

    #[tokio::test]
    async fn close_all_empties_router() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        for _ in 0..5 {
            open_session(&router, &handler).await;
        }
        assert_eq!(router.close_all(), 5);
        assert!(router.is_empty());
        assert!(router.session_ids().is_empty());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event streams
// ─────────────────────────────────────────────────────────────────────────────

mod streams {
    use super::*;

    #[tokio::test]
    async fn notify_reaches_attached_stream() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;

        let note = McpNotification::new("notifications/message", Some(json!({"level": "info"})));
        assert!(!router.notify(&id, &note), "no stream attached yet");

        let mut stream = router.lookup(Some(&id)).unwrap().open_stream().unwrap();
        assert!(router.notify(&id, &note));

        let message = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["method"], "notifications/message");
        assert_eq!(value["params"]["level"], "info");
    }

    #[tokio::test]
    async fn second_stream_conflicts() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;
        let instance = router.lookup(Some(&id)).unwrap();

        let _first = instance.open_stream().unwrap();
        let err = instance.open_stream().unwrap_err();
        assert!(matches!(err, TransportError::StreamConflict(_)));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn dropping_stream_closes_session() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;

        let stream = router.lookup(Some(&id)).unwrap().open_stream().unwrap();
        drop(stream);
        assert!(!router.contains(&id));
    }

    #[tokio::test]
    async fn stream_can_reattach_when_disconnect_keeps_session() {
        let router = SessionRouter::new(None, false);
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;
        let instance = router.lookup(Some(&id)).unwrap();

        drop(instance.open_stream().unwrap());
        assert!(router.contains(&id));
        assert!(!instance.has_stream());
        assert!(instance.open_stream().is_ok());
    }

    #[tokio::test]
    async fn close_ends_stream() {
        let router = SessionRouter::default();
        let handler = StubHandler::default();
        let id = open_session(&router, &handler).await;
        let instance = router.lookup(Some(&id)).unwrap();

        let mut stream = instance.open_stream().unwrap();
        instance.close(CloseReason::ClientRequest);
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP binding
// ─────────────────────────────────────────────────────────────────────────────

mod http {
    use super::*;

    fn service() -> (axum::Router, SessionRouter) {
        let sessions = SessionRouter::default();
        let router = app(
            TransportConfig::default(),
            Arc::new(StubHandler::default()),
            sessions.clone(),
        )
        .unwrap();
        (router, sessions)
    }

    fn post(session: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream");
        if let Some(id) = session {
            builder = builder.header(SESSION_ID_HEADER, id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn handshake(router: &axum::Router) -> String {
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        let response = router.clone().oneshot(post(None, &init.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn handshake_returns_session_header() {
        let (router, sessions) = service();
        let id = handshake(&router).await;
        assert!(sessions.contains(&id));
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn routed_request_echoes_session_header() {
        let (router, _) = service();
        let id = handshake(&router).await;

        let body = json!({"jsonrpc": "2.0", "id": "a", "method": "echo", "params": [1, 2]});
        let response = router.oneshot(post(Some(&id), &body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[SESSION_ID_HEADER], id.as_str());

        let value = body_json(response).await;
        assert_eq!(value["id"], "a");
        assert_eq!(value["result"], json!([1, 2]));
    }

    #[tokio::test]
    async fn missing_session_is_bad_request() {
        let (router, _) = service();
        let body = json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"});
        let response = router.oneshot(post(None, &body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let value = body_json(response).await;
        assert_eq!(value["error"]["code"], -32000);
        assert_eq!(value["id"], 3);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (router, _) = service();
        let body = json!({"jsonrpc": "2.0", "id": 3, "method": "ping"});
        let response = router.oneshot(post(Some("gone"), &body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let (router, _) = service();
        let response = router.oneshot(post(None, "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert_eq!(value["error"]["code"], -32700);
        assert!(value["id"].is_null());
    }

    #[tokio::test]
    async fn wrong_version_is_invalid_request() {
        let (router, _) = service();
        let body = json!({"jsonrpc": "1.0", "id": 9, "method": "initialize"});
        let response = router.oneshot(post(None, &body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert_eq!(value["error"]["code"], -32600);
        assert_eq!(value["id"], 9);
    }

    #[tokio::test]
    async fn batch_is_invalid_request() {
        let (router, _) = service();
        let response = router.oneshot(post(None, "[]")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn null_id_is_invalid_request() {
        let (router, sessions) = service();
        let id = handshake(&router).await;

        let body = json!({"jsonrpc": "2.0", "id": null, "method": "tools/call", "params": {}});
        let response = router.oneshot(post(Some(&id), &body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let value = body_json(response).await;
        assert_eq!(value["error"]["code"], -32600);
        assert!(value["id"].is_null());
        assert!(sessions.contains(&id));
    }

    #[tokio::test]
    async fn notification_is_accepted() {
        let (router, _) = service();
        let id = handshake(&router).await;
        let body = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let response = router.oneshot(post(Some(&id), &body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn event_stream_only_accept_gets_sse_reply() {
        let (router, _) = service();
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .body(Body::from(init.to_string()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(SESSION_ID_HEADER));
        let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: message"));
        assert!(text.contains("\"result\""));
    }

    #[tokio::test]
    async fn delete_closes_session() {
        let (router, sessions) = service();
        let id = handshake(&router).await;

        let delete = |id: &str| {
            Request::builder()
                .method("DELETE")
                .uri("/mcp")
                .header(SESSION_ID_HEADER, id)
                .body(Body::empty())
                .unwrap()
        };
        let response = router.clone().oneshot(delete(&id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!sessions.contains(&id));

        let response = router.oneshot(delete(&id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_without_session_is_bad_request() {
        let (router, _) = service();
        let request = Request::builder().uri("/mcp").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_session_count() {
        let (router, _) = service();
        handshake(&router).await;
        handshake(&router).await;

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let value = body_json(router.oneshot(request).await.unwrap()).await;
        assert_eq!(value["status"], "ok");
        assert_eq!(value["sessions"], 2);
    }

    #[test]
    fn endpoint_path_must_be_absolute() {
        let config = TransportConfig {
            path: "mcp".into(),
            ..TransportConfig::default()
        };
        let err = app(config, Arc::new(StubHandler::default()), SessionRouter::default()).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn zero_session_limit_is_rejected() {
        let config = TransportConfig {
            max_sessions: Some(0),
            ..TransportConfig::default()
        };
        let err = app(config, Arc::new(StubHandler::default()), SessionRouter::default()).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }
}

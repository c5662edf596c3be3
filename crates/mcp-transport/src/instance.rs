//! TransportInstance: one client session.
//!
//! An instance owns its session id, the `Pending -> Active -> Closed` state
//! machine, the broadcast sender behind the session's push stream and the
//! async lock that serializes its requests. It registers itself with the
//! router when the handshake succeeds and unregisters itself on close.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, ready};
use std::time::{Duration, Instant};

use futures_util::Stream;
use mcp_protocol::{McpNotification, McpRequest, MessageKind, RequestContext};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::server::RequestHandler;
use crate::session::RouterShared;

/// Capacity of a session's push channel.
const PUSH_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created for a handshake that has not completed yet. Not routable.
    Pending,
    /// Handshake succeeded; registered with the router.
    Active,
    /// Terminal.
    Closed,
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent DELETE.
    ClientRequest,
    /// The attached event stream went away.
    StreamDisconnected,
    IdleTimeout,
    Shutdown,
    /// The router refused to register the session.
    RegistrationFailed,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientRequest => "client request",
            Self::StreamDisconnected => "stream disconnected",
            Self::IdleTimeout => "idle timeout",
            Self::Shutdown => "shutdown",
            Self::RegistrationFailed => "registration failed",
        }
    }
}

pub struct TransportInstance {
    id: String,
    state: parking_lot::Mutex<SessionState>,
    /// Held for the whole dispatch of one message.
    turn: tokio::sync::Mutex<()>,
    created_at: Instant,
    last_activity: parking_lot::Mutex<Instant>,
    /// Dropped on close, which ends every subscribed stream.
    push_tx: parking_lot::Mutex<Option<broadcast::Sender<String>>>,
    stream_attached: AtomicBool,
    close_on_stream_disconnect: bool,
    router: Weak<RouterShared>,
}

impl std::fmt::Debug for TransportInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportInstance")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("stream_attached", &self.has_stream())
            .finish()
    }
}

impl TransportInstance {
    pub(crate) fn pending(
        id: String,
        router: Weak<RouterShared>,
        close_on_stream_disconnect: bool,
    ) -> Arc<Self> {
        let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let now = Instant::now();
        Arc::new(Self {
            id,
            state: parking_lot::Mutex::new(SessionState::Pending),
            turn: tokio::sync::Mutex::new(()),
            created_at: now,
            last_activity: parking_lot::Mutex::new(now),
            push_tx: parking_lot::Mutex::new(Some(push_tx)),
            stream_attached: AtomicBool::new(false),
            close_on_stream_disconnect,
            router,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn has_stream(&self) -> bool {
        self.stream_attached.load(Ordering::Acquire)
    }

    /// Gate, dispatch and (for a successful `initialize`) activate.
    ///
    /// Returns `Ok(None)` for notifications. Messages for this instance are
    /// handled one at a time in arrival order.
    pub async fn handle<H: RequestHandler>(
        self: &Arc<Self>,
        request: McpRequest,
        handler: &H,
    ) -> Result<Option<Value>, TransportError> {
        let _turn = self.turn.lock().await;
        self.touch();

        let kind = request.kind();
        self.check_state(kind, &request.method)?;

        let ctx = RequestContext::new(self.id.as_str());
        debug!("Session {} <- {}", self.id, request.method);

        match kind {
            MessageKind::Notification => {
                handler
                    .handle_notification(&ctx, &request.method, request.params)
                    .await;
                Ok(None)
            }
            MessageKind::Initialize => {
                let result = handler
                    .handle_request(&ctx, &request.method, request.params)
                    .await?;
                self.activate()?;
                Ok(Some(result))
            }
            MessageKind::Request => {
                let result = handler
                    .handle_request(&ctx, &request.method, request.params)
                    .await?;
                Ok(Some(result))
            }
        }
    }

    fn check_state(&self, kind: MessageKind, method: &str) -> Result<(), TransportError> {
        match (self.state(), kind) {
            (SessionState::Pending, MessageKind::Initialize) => Ok(()),
            (SessionState::Active, MessageKind::Request | MessageKind::Notification) => Ok(()),
            (SessionState::Active, MessageKind::Initialize) => Err(TransportError::ProtocolState(
                format!("Session {} is already initialized", self.id),
            )),
            (SessionState::Pending, _) => Err(TransportError::ProtocolState(format!(
                "Session {} is not initialized; {method} is not allowed yet",
                self.id
            ))),
            (SessionState::Closed, _) => Err(TransportError::UnknownSession(self.id.clone())),
        }
    }

    /// `Pending -> Active`, registering with the router under the state lock
    /// so a concurrent close observes either state but never a half-registered
    /// session.
    fn activate(self: &Arc<Self>) -> Result<(), TransportError> {
        let Some(router) = self.router.upgrade() else {
            return Err(TransportError::Rpc(mcp_protocol::McpError::internal(
                "Session router is shut down",
            )));
        };

        let registered = {
            let mut state = self.state.lock();
            if *state != SessionState::Pending {
                return Err(TransportError::ProtocolState(format!(
                    "Session {} is already initialized",
                    self.id
                )));
            }
            let registered = router.register(self.clone());
            *state = if registered.is_ok() {
                SessionState::Active
            } else {
                SessionState::Closed
            };
            registered
        };

        match registered {
            Ok(()) => {
                info!("Session opened: {} (total: {})", self.id, router.len());
                Ok(())
            }
            Err(e) => {
                self.push_tx.lock().take();
                warn!("Session {} closed: {} ({e})", self.id, CloseReason::RegistrationFailed.as_str());
                Err(e)
            }
        }
    }

    /// Enter `Closed`. Unregisters first, then releases the push channel.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return false;
            }
            *state = SessionState::Closed;
        }
        self.touch();

        if let Some(router) = self.router.upgrade() {
            router.unregister(&self.id);
        }
        self.push_tx.lock().take();

        info!(
            "Session closed: {} ({}, open {:?})",
            self.id,
            reason.as_str(),
            self.created_at.elapsed()
        );
        true
    }

    /// Push a server-initiated notification to the attached stream.
    ///
    /// Returns whether any stream received it.
    pub fn notify(&self, notification: &McpNotification) -> bool {
        let Ok(json) = serde_json::to_string(notification) else {
            return false;
        };
        match self.push_tx.lock().as_ref() {
            Some(tx) => tx.send(json).is_ok(),
            None => false,
        }
    }

    /// Attach the session's single standalone event stream.
    pub fn open_stream(self: &Arc<Self>) -> Result<EventStream, TransportError> {
        if !self.is_active() {
            return Err(TransportError::UnknownSession(self.id.clone()));
        }
        if self
            .stream_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::StreamConflict(self.id.clone()));
        }

        let rx = match self.push_tx.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                self.stream_attached.store(false, Ordering::Release);
                return Err(TransportError::UnknownSession(self.id.clone()));
            }
        };
        self.touch();
        debug!("Event stream attached: {}", self.id);

        Ok(EventStream {
            inner: BroadcastStream::new(rx),
            guard: StreamGuard {
                instance: self.clone(),
            },
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event stream
// ─────────────────────────────────────────────────────────────────────────────

/// Serialized JSON-RPC messages pushed to one session.
///
/// Ends when the session closes. Dropping it detaches the stream and, unless
/// disabled in the config, closes the session.
pub struct EventStream {
    inner: BroadcastStream<String>,
    guard: StreamGuard,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("session", &self.guard.instance.id)
            .finish()
    }
}

impl Stream for EventStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(message)) => return Poll::Ready(Some(message)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(
                        "Event stream for {} lagged, {skipped} messages dropped",
                        self.guard.instance.id
                    );
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

struct StreamGuard {
    instance: Arc<TransportInstance>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.instance.stream_attached.store(false, Ordering::Release);
        debug!("Event stream detached: {}", self.instance.id);
        if self.instance.close_on_stream_disconnect {
            self.instance.close(CloseReason::StreamDisconnected);
        }
    }
}

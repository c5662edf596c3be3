//! SessionRouter: session id -> transport instance.
//!
//! The map holds an entry exactly while its instance is `Active`. Entries are
//! inserted by the instance itself when its handshake succeeds and removed by
//! its close transition; the router never mutates instance state directly
//! except through `close`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mcp_protocol::{McpNotification, McpRequest, MessageKind};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::instance::{CloseReason, TransportInstance};

/// State shared by every router handle. Instances keep a `Weak` to it.
pub(crate) struct RouterShared {
    sessions: DashMap<String, Arc<TransportInstance>>,
    max_sessions: Option<usize>,
    close_on_stream_disconnect: bool,
}

impl RouterShared {
    /// Insert into a vacant slot only.
    pub(crate) fn register(&self, instance: Arc<TransportInstance>) -> Result<(), TransportError> {
        if let Some(max) = self.max_sessions {
            if self.sessions.len() >= max {
                return Err(TransportError::SessionLimit(max));
            }
        }
        match self.sessions.entry(instance.id().to_string()) {
            Entry::Occupied(_) => Err(TransportError::IdCollision(instance.id().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(instance);
                Ok(())
            }
        }
    }

    /// Idempotent removal, driven by an instance's close transition.
    pub(crate) fn unregister(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Cheaply cloneable handle to the session map.
#[derive(Clone)]
pub struct SessionRouter {
    shared: Arc<RouterShared>,
}

impl Default for SessionRouter {
    fn default() -> Self {
        Self::new(None, true)
    }
}

impl SessionRouter {
    pub fn new(max_sessions: Option<usize>, close_on_stream_disconnect: bool) -> Self {
        Self {
            shared: Arc::new(RouterShared {
                sessions: DashMap::new(),
                max_sessions,
                close_on_stream_disconnect,
            }),
        }
    }

    /// Pick the instance for an inbound message.
    ///
    /// A message carrying a session id always goes to that session, even an
    /// `initialize`. Without an id only `initialize` is accepted; it gets a
    /// new `Pending` instance that is not yet visible to other requests.
    pub fn route(
        &self,
        session_id: Option<&str>,
        request: &McpRequest,
    ) -> Result<Arc<TransportInstance>, TransportError> {
        match session_id {
            Some(_) => self.lookup(session_id),
            None if request.kind() == MessageKind::Initialize => self.begin_handshake(),
            None => Err(TransportError::MissingSession),
        }
    }

    /// Resolve a session id for requests without a JSON-RPC body.
    pub fn lookup(&self, session_id: Option<&str>) -> Result<Arc<TransportInstance>, TransportError> {
        let id = session_id.ok_or(TransportError::MissingSession)?;
        self.shared
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::UnknownSession(id.to_string()))
    }

    fn begin_handshake(&self) -> Result<Arc<TransportInstance>, TransportError> {
        if let Some(max) = self.shared.max_sessions {
            if self.shared.len() >= max {
                warn!("Handshake rejected: session limit reached ({max})");
                return Err(TransportError::SessionLimit(max));
            }
        }
        let id = uuid::Uuid::new_v4().to_string();
        debug!("Handshake started for {id}");
        Ok(TransportInstance::pending(
            id,
            Arc::downgrade(&self.shared),
            self.shared.close_on_stream_disconnect,
        ))
    }

    /// Push a notification to one session's stream.
    pub fn notify(&self, session_id: &str, notification: &McpNotification) -> bool {
        match self.shared.sessions.get(session_id) {
            Some(entry) => entry.value().notify(notification),
            None => false,
        }
    }

    /// Close sessions idle for at least `timeout` that have no attached
    /// stream. Returns how many were closed.
    pub fn close_idle(&self, timeout: Duration) -> usize {
        let stale: Vec<Arc<TransportInstance>> = self
            .shared
            .sessions
            .iter()
            .filter(|entry| !entry.value().has_stream() && entry.value().idle_for() >= timeout)
            .map(|entry| entry.value().clone())
            .collect();

        let closed = stale
            .iter()
            .filter(|instance| instance.close(CloseReason::IdleTimeout))
            .count();
        if closed > 0 {
            info!("Closed {closed} idle sessions");
        }
        closed
    }

    pub fn close_all(&self) -> usize {
        let all: Vec<Arc<TransportInstance>> = self
            .shared
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.iter()
            .filter(|instance| instance.close(CloseReason::Shutdown))
            .count()
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.shared.sessions.contains_key(session_id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.shared.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

//! Request context: per-session state threaded through request handling.

/// Context for a single request, built by the transport instance that owns
/// the session.
///
/// During `initialize` the `session_id` is the identifier that will be
/// handed to the client once the handshake succeeds.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Identifier of the session this request belongs to.
    pub session_id: String,
}

impl RequestContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

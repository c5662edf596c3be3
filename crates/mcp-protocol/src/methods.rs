//! MCP method and notification name constants.
//!
//! Each constant is the exact string sent over the wire as the `method`
//! field of a JSON-RPC message.

/// Request method names handled by the server.
pub struct Methods;

impl Methods {
    // ── Lifecycle ───────────────────────────────────────────────────────
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";

    // ── Tools ───────────────────────────────────────────────────────────
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Notification names, in both directions.
pub struct Notifications;

impl Notifications {
    // ── Client → Server ─────────────────────────────────────────────────
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";

    // ── Server → Client ─────────────────────────────────────────────────
    pub const MESSAGE: &str = "notifications/message";
}

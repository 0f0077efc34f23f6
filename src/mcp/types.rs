// Wire-independent MCP coordinator types: server specs, connection
// lifecycle state, tool catalogue entries and the coordinator's
// broadcast event/alert vocabulary.

use crate::json::JsonValue;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How to reach one MCP server. `id` is unique within a coordinator
/// instance and is the key every other coordinator call addresses the
/// server by.
#[derive(Debug, Clone)]
pub enum ServerSpec {
    Stdio {
        id: String,
        display_name: String,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Http {
        id: String,
        display_name: String,
        url: String,
        headers: HashMap<String, String>,
    },
}

impl ServerSpec {
    pub fn id(&self) -> &str {
        match self {
            ServerSpec::Stdio { id, .. } => id,
            ServerSpec::Http { id, .. } => id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ServerSpec::Stdio { display_name, .. } => display_name,
            ServerSpec::Http { display_name, .. } => display_name,
        }
    }
}

/// One remote tool, as discovered from a `tools/list` handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub server_id: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: JsonValue,
}

impl ToolInfo {
    /// `"<serverID>.<name>"`, used by [`crate::mcp::filter::ToolFilter::ToolIds`].
    pub fn qualified_id(&self) -> String {
        format!("{}.{}", self.server_id, self.name)
    }
}

/// A flattened, filterable view of one server's one tool, as returned
/// by `MCPCoordinator::available_tools`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolEntry {
    pub server_id: String,
    pub name: String,
    pub description: Option<String>,
    pub definition: JsonValue,
}

impl ToolEntry {
    pub fn qualified_id(&self) -> String {
        format!("{}.{}", self.server_id, self.name)
    }
}

/// Lifecycle state of one server connection. All states are reachable
/// from `Idle`; `Disconnected` is terminal for a lifecycle pass, but a
/// fresh `connect()` restarts the machine at `Connecting`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected { tools: Vec<ToolInfo> },
    Failed { message: String, retry_count: u32 },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        next_retry_at: Option<Instant>,
    },
    Disconnected,
}

impl ConnectionState {
    pub fn tools(&self) -> &[ToolInfo] {
        match self {
            ConnectionState::Connected { tools } => tools,
            _ => &[],
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// Short tag, used for event/alert payloads that need to name a
    /// state transition without carrying its (possibly large) payload.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Failed { .. } => "failed",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Policy governing automatic reconnection after a connection enters
/// `Failed`.
#[derive(Debug, Clone)]
pub enum ReconnectPolicy {
    Never,
    ExponentialBackoff {
        max_attempts: u32,
        base_delay: Duration,
        jitter: bool,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Never
    }
}

/// One server's point-in-time view inside a [`CoordinatorSnapshot`].
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub id: String,
    pub display_name: String,
    pub state: ConnectionState,
}

/// Consistent, read-only, point-in-time view of every server the
/// coordinator knows about. Obtained by a single lock acquisition, so
/// two calls without an intervening mutation compare equal.
#[derive(Debug, Clone)]
pub struct CoordinatorSnapshot {
    pub servers: HashMap<String, ServerSnapshot>,
}

/// Result of `startAllAndWait`: which servers reached `Connected` and
/// which reached `Failed`, with the failure detail. `startAll`/
/// `startAllAndWait` never throw even if every spec fails — that
/// judgment is left to the caller inspecting this value.
#[derive(Debug, Clone, Default)]
pub struct StartResult {
    pub connected: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Fine-grained per-connection events, broadcast across every server.
/// There is no ordering guarantee *across* servers, only within one.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    StateChanged {
        server_id: String,
        from: &'static str,
        to: &'static str,
    },
    /// Additive: a server-initiated notification republished onto the
    /// coordinator's event bus. Never required reading.
    ServerNotification {
        server_id: String,
        notification: crate::mcp::notifications::McpNotification,
    },
}

/// Coarser-grained operator-facing signals, broadcast separately from
/// `events`. Emitted in addition to, never instead of, the error a
/// caller observes from the call that triggered it.
#[derive(Debug, Clone)]
pub enum Alert {
    ConnectionFailed { server_id: String, message: String },
    ConnectionLost { server_id: String },
    Reconnecting {
        server_id: String,
        attempt: u32,
        next_retry_at: Option<Instant>,
    },
    Reconnected { server_id: String },
    ReconnectGaveUp { server_id: String },
    ToolTimedOut {
        server_id: String,
        tool_name: String,
        timeout: Duration,
    },
    ServerUnhealthy { server_id: String },
}

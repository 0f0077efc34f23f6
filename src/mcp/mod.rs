// Model Context Protocol (MCP) coordinator: connects to a fleet of
// tool servers over stdio or HTTP, tracks each connection's lifecycle,
// supervises reconnection, and exposes a filtered, aggregated tool
// catalogue to callers.

pub mod coordinator;
pub mod filter;
pub mod health;
pub mod notifications;
pub mod protocol;
pub mod sampling;
pub mod transport;
pub mod types;

pub use coordinator::{MCPCoordinator, MCPToolProxy, ToolResult};
pub use filter::{ToolFilter, ToolMode};
pub use health::{HealthMonitor, ServerHealth, TransportConfig};
pub use notifications::{DefaultNotificationHandler, McpNotification, NotificationHandler};
pub use sampling::{
    DenyAllSamplingHandler, SamplingApproval, SamplingApprovalHandler, SamplingRequest,
    SamplingResponse,
};
pub use types::{
    Alert, ConnectionState, CoordinatorEvent, CoordinatorSnapshot, ReconnectPolicy, ServerSnapshot,
    ServerSpec, StartResult, ToolEntry, ToolInfo,
};

// Supervises a fleet of MCP server connections: connects them
// concurrently, tracks each one's lifecycle in a single lock so a
// snapshot is never a torn read, and restarts failed connections under
// an exponential-backoff policy.
//
// Network IO for one connection (handshake, tool discovery, tool
// calls) runs against that connection's own `ConnectionRuntime` and
// never holds the coordinator's top-level lock, so a slow server can't
// stall `startAll`/`snapshot` for the others.

use super::notifications::McpNotification;
use super::protocol::{JsonRpcRequest, JsonRpcResponse, McpCapabilities, McpTool};
use super::transport::{HttpTransport, McpTransport, StdioTransport};
use super::types::{
    Alert, ConnectionState, CoordinatorEvent, CoordinatorSnapshot, ReconnectPolicy, ServerSnapshot,
    ServerSpec, StartResult, ToolEntry, ToolInfo,
};
use crate::clock::{Clock, SystemClock};
use crate::error::McpError;
use crate::json::JsonValue;
use crate::mcp::filter::ToolFilter;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Per-connection IO state. Lives independently of the coordinator's
/// `servers` lock so concurrent connects/tool calls against different
/// servers never block on each other.
struct ConnectionRuntime {
    spec: ServerSpec,
    transport: Mutex<Option<Box<dyn McpTransport + Send + Sync>>>,
    request_id: AtomicI64,
    capabilities: Mutex<Option<McpCapabilities>>,
}

impl ConnectionRuntime {
    fn new(spec: ServerSpec) -> Self {
        Self {
            spec,
            transport: Mutex::new(None),
            request_id: AtomicI64::new(0),
            capabilities: Mutex::new(None),
        }
    }

    fn next_id(&self) -> i64 {
        self.request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn connect_transport(&self) -> Result<(), McpError> {
        let transport: Box<dyn McpTransport + Send + Sync> = match &self.spec {
            ServerSpec::Stdio { command, args, env, .. } => {
                let stdio = StdioTransport::spawn(command, args, env)
                    .await
                    .map_err(|e| McpError::HandshakeFailed(self.spec.id().to_string(), e.to_string()))?;
                Box::new(stdio)
            }
            ServerSpec::Http { url, .. } => Box::new(HttpTransport::new(url)),
        };
        *self.transport.lock().await = Some(transport);
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Option<JsonValue>) -> Result<JsonValue, McpError> {
        self.send_request_with_id(self.next_id(), method, params).await
    }

    /// Like `send_request`, but takes an already-reserved request id
    /// rather than minting its own, so a caller (`call_tool`) can learn
    /// the id before the request resolves and use it to cancel the
    /// call if it runs past a deadline.
    async fn send_request_with_id(
        &self,
        id: i64,
        method: &str,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, McpError> {
        let params_serde = params.map(|p| p.to_serde_value());
        let request = JsonRpcRequest::new(id, method, params_serde);
        let request_json = serde_json::to_string(&request)?;

        let guard = self.transport.lock().await;
        let transport = guard
            .as_ref()
            .ok_or_else(|| McpError::NotConnected(self.spec.id().to_string()))?;
        let response_json = transport
            .send(&request_json)
            .await
            .map_err(|e| McpError::Other(e.to_string()))?;
        drop(guard);

        let response: JsonRpcResponse = serde_json::from_str(&response_json)?;
        if let Some(error) = response.error {
            return Err(McpError::Rpc { code: error.code, message: error.message });
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(JsonValue::from_serde(result))
    }

    async fn send_notification(&self, method: &str, params: Option<JsonValue>) -> Result<(), McpError> {
        let params_serde = params.map(|p| p.to_serde_value());
        let notif = JsonRpcRequest::notification(method, params_serde);
        let notif_json = serde_json::to_string(&notif)?;
        let guard = self.transport.lock().await;
        if let Some(transport) = guard.as_ref() {
            let _ = transport.send(&notif_json).await;
        }
        Ok(())
    }

    async fn handshake_and_discover(&self) -> Result<Vec<ToolInfo>, McpError> {
        self.connect_transport().await?;

        let init_params = JsonValue::object(vec![
            ("protocolVersion".to_string(), JsonValue::from("2024-11-05")),
            (
                "capabilities".to_string(),
                JsonValue::object(vec![("roots".to_string(), JsonValue::object(vec![(
                    "listChanged".to_string(),
                    JsonValue::from(true),
                )]))]),
            ),
            (
                "clientInfo".to_string(),
                JsonValue::object(vec![
                    ("name".to_string(), JsonValue::from("agentwire")),
                    ("version".to_string(), JsonValue::from("0.1.0")),
                ]),
            ),
        ]);

        let result = self.send_request("initialize", Some(init_params)).await?;
        if let Some(caps_value) = result.get("capabilities") {
            let caps_serde = caps_value.to_serde_value();
            if let Ok(caps) = serde_json::from_value::<McpCapabilities>(caps_serde) {
                *self.capabilities.lock().await = Some(caps);
            }
        }

        self.send_notification("notifications/initialized", None).await?;

        let tools_result = self.send_request("tools/list", None).await?;
        let mut tools = Vec::new();
        if let Some(JsonValue::Array(items)) = tools_result.get("tools") {
            for item in items {
                let serde_item = item.to_serde_value();
                if let Ok(tool) = serde_json::from_value::<McpTool>(serde_item) {
                    tools.push(ToolInfo {
                        server_id: self.spec.id().to_string(),
                        name: tool.name,
                        description: tool.description,
                        input_schema: tool
                            .input_schema
                            .map(JsonValue::from_serde)
                            .unwrap_or(JsonValue::Null),
                    });
                }
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, tool_name: &str, arguments: JsonValue) -> Result<JsonValue, McpError> {
        self.call_tool_with_id(self.next_id(), tool_name, arguments).await
    }

    /// Same wire call as `call_tool`, but against a caller-reserved
    /// request id so the caller can issue `notifications/cancelled`
    /// against this exact call if it decides to give up on it.
    async fn call_tool_with_id(
        &self,
        id: i64,
        tool_name: &str,
        arguments: JsonValue,
    ) -> Result<JsonValue, McpError> {
        let params = JsonValue::object(vec![
            ("name".to_string(), JsonValue::from(tool_name)),
            ("arguments".to_string(), arguments),
        ]);
        self.send_request_with_id(id, "tools/call", Some(params)).await
    }

    /// Cheap liveness probe for the health-check loop: re-list tools
    /// rather than open a second connection.
    async fn probe(&self) -> Result<(), McpError> {
        self.send_request("tools/list", None).await.map(|_| ())
    }

    async fn disconnect(&self) {
        *self.transport.lock().await = None;
    }
}

struct ServerRecord {
    spec: ServerSpec,
    state: ConnectionState,
    runtime: Arc<ConnectionRuntime>,
}

struct Inner {
    servers: RwLock<HashMap<String, ServerRecord>>,
    events_tx: broadcast::Sender<CoordinatorEvent>,
    alerts_tx: broadcast::Sender<Alert>,
    reconnect_policy: ReconnectPolicy,
    clock: Arc<dyn Clock>,
}

/// Cheaply-clonable handle to the MCP coordinator. Every clone shares
/// the same connection state and event buses.
#[derive(Clone)]
pub struct MCPCoordinator {
    inner: Arc<Inner>,
}

impl MCPCoordinator {
    pub fn new(reconnect_policy: ReconnectPolicy) -> Self {
        Self::with_clock(reconnect_policy, Arc::new(SystemClock))
    }

    pub fn with_clock(reconnect_policy: ReconnectPolicy, clock: Arc<dyn Clock>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                servers: RwLock::new(HashMap::new()),
                events_tx,
                alerts_tx,
                reconnect_policy,
                clock,
            }),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.inner.alerts_tx.subscribe()
    }

    async fn transition(&self, server_id: &str, new_state: ConnectionState) {
        let from_kind;
        let to_kind = new_state.kind();
        {
            let mut servers = self.inner.servers.write().await;
            let Some(record) = servers.get_mut(server_id) else { return };
            from_kind = record.state.kind();
            record.state = new_state;
        }
        let _ = self.inner.events_tx.send(CoordinatorEvent::StateChanged {
            server_id: server_id.to_string(),
            from: from_kind,
            to: to_kind,
        });
    }

    /// Register a server spec (idempotent) without connecting it yet.
    async fn register(&self, spec: ServerSpec) {
        let id = spec.id().to_string();
        let mut servers = self.inner.servers.write().await;
        servers.entry(id).or_insert_with(|| ServerRecord {
            runtime: Arc::new(ConnectionRuntime::new(spec.clone())),
            spec,
            state: ConnectionState::Idle,
        });
    }

    /// Connect one server. Safe to call concurrently for different
    /// server ids; each connection's IO is independent.
    pub async fn connect_one(&self, spec: ServerSpec) -> Result<(), McpError> {
        self.register(spec.clone()).await;
        let id = spec.id().to_string();
        self.transition(&id, ConnectionState::Connecting).await;

        let runtime = {
            let servers = self.inner.servers.read().await;
            servers.get(&id).map(|r| r.runtime.clone())
        };
        let Some(runtime) = runtime else {
            return Err(McpError::UnknownServer(id));
        };

        match runtime.handshake_and_discover().await {
            Ok(tools) => {
                info!("mcp server '{}' connected with {} tools", id, tools.len());
                self.transition(&id, ConnectionState::Connected { tools }).await;
                Ok(())
            }
            Err(err) => {
                self.transition(
                    &id,
                    ConnectionState::Failed { message: err.to_string(), retry_count: 0 },
                )
                .await;
                let _ = self.inner.alerts_tx.send(Alert::ConnectionFailed {
                    server_id: id.clone(),
                    message: err.to_string(),
                });
                self.maybe_schedule_reconnect(id);
                Err(err)
            }
        }
    }

    /// Connect every spec concurrently; returns once all attempts
    /// settle (success or failure), never early-exiting on one error.
    pub async fn start_all_and_wait(&self, specs: Vec<ServerSpec>) -> StartResult {
        let handles: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let this = self.clone();
                let id = spec.id().to_string();
                tokio::spawn(async move {
                    let result = this.connect_one(spec).await;
                    (id, result)
                })
            })
            .collect();

        let mut result = StartResult::default();
        for handle in handles {
            match handle.await {
                Ok((id, Ok(()))) => result.connected.push(id),
                Ok((id, Err(err))) => result.failed.push((id, err.to_string())),
                Err(join_err) => result.failed.push(("unknown".to_string(), join_err.to_string())),
            }
        }
        result
    }

    /// Fire-and-forget variant: connections proceed in the background
    /// and can be observed via `subscribe_events`/`snapshot`.
    pub fn start_all(&self, specs: Vec<ServerSpec>) {
        for spec in specs {
            let this = self.clone();
            tokio::spawn(async move {
                let _ = this.connect_one(spec).await;
            });
        }
    }

    fn maybe_schedule_reconnect(&self, server_id: String) {
        let ReconnectPolicy::ExponentialBackoff { max_attempts, base_delay, jitter } =
            self.inner.reconnect_policy.clone()
        else {
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            this.reconnect_loop(server_id, 1, max_attempts, base_delay, jitter).await;
        });
    }

    async fn reconnect_loop(
        &self,
        server_id: String,
        attempt: u32,
        max_attempts: u32,
        base_delay: Duration,
        jitter: bool,
    ) {
        if attempt > max_attempts {
            let _ = self.inner.alerts_tx.send(Alert::ReconnectGaveUp { server_id: server_id.clone() });
            self.transition(&server_id, ConnectionState::Disconnected).await;
            return;
        }

        let exp = base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt - 1);
        let delay_ms = if jitter {
            let spread = (exp as f64 * 0.2) as i64;
            let offset = rand::rng().random_range(-spread..=spread);
            (exp as i64 + offset).max(0) as u64
        } else {
            exp
        };
        let delay = Duration::from_millis(delay_ms);

        self.mark_reconnecting(&server_id, attempt, max_attempts, None).await;

        self.inner.clock.sleep(delay).await;

        let spec = {
            let servers = self.inner.servers.read().await;
            servers.get(&server_id).map(|r| r.spec.clone())
        };
        let Some(spec) = spec else { return };

        match self.connect_one(spec).await {
            Ok(()) => {
                let _ = self.inner.alerts_tx.send(Alert::Reconnected { server_id });
            }
            Err(_) => {
                Box::pin(self.reconnect_loop(server_id, attempt + 1, max_attempts, base_delay, jitter)).await;
            }
        }
    }

    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: JsonValue,
        timeout: Duration,
    ) -> Result<JsonValue, McpError> {
        let runtime = {
            let servers = self.inner.servers.read().await;
            let record = servers.get(server_id).ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;
            if !record.state.is_connected() {
                return Err(McpError::NotConnected(server_id.to_string()));
            }
            record.runtime.clone()
        };

        let request_id = runtime.next_id();

        tokio::select! {
            result = runtime.call_tool_with_id(request_id, tool_name, arguments) => result,
            _ = self.inner.clock.sleep(timeout) => {
                // Best-effort and fire-and-forget: the cancellation
                // notification shares the transport with whatever is
                // still in flight, so it must not hold up this error
                // return while it waits its turn.
                let this = self.clone();
                let server_id_owned = server_id.to_string();
                tokio::spawn(async move {
                    let _ = this.cancel_tool_call(&server_id_owned, request_id).await;
                });
                let _ = self.inner.alerts_tx.send(Alert::ToolTimedOut {
                    server_id: server_id.to_string(),
                    tool_name: tool_name.to_string(),
                    timeout,
                });
                Err(McpError::ToolTimeout {
                    server: server_id.to_string(),
                    name: tool_name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Named transition for entering backoff, so callers other than
    /// the internal reconnect loop (tests, a supervisor UI) can drive
    /// or observe it without duplicating the transition+alert pair.
    pub async fn mark_reconnecting(
        &self,
        server_id: &str,
        attempt: u32,
        max_attempts: u32,
        next_retry_at: Option<std::time::Instant>,
    ) {
        self.transition(
            server_id,
            ConnectionState::Reconnecting { attempt, max_attempts, next_retry_at },
        )
        .await;
        let _ = self.inner.alerts_tx.send(Alert::Reconnecting {
            server_id: server_id.to_string(),
            attempt,
            next_retry_at,
        });
    }

    /// Best-effort cancellation of an in-flight tool call: sends MCP's
    /// `notifications/cancelled` and returns immediately. The server
    /// may ignore it or the call may already have completed; this
    /// never blocks on a reply since cancellation notifications don't
    /// get one.
    pub async fn cancel_tool_call(&self, server_id: &str, request_id: i64) -> Result<(), McpError> {
        let runtime = {
            let servers = self.inner.servers.read().await;
            servers
                .get(server_id)
                .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?
                .runtime
                .clone()
        };
        let params = JsonValue::object(vec![("requestId".to_string(), JsonValue::from(request_id))]);
        runtime.send_notification("notifications/cancelled", Some(params)).await
    }

    /// Spawns a background loop that re-probes every currently
    /// connected server every `interval`, marking a server `Failed`
    /// and firing `Alert::ServerUnhealthy` the moment a probe errors
    /// rather than waiting for its next real tool call to discover it.
    pub fn start_health_checks(&self, interval: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                this.inner.clock.sleep(interval).await;
                let connected: Vec<(String, Arc<ConnectionRuntime>)> = {
                    let servers = this.inner.servers.read().await;
                    servers
                        .iter()
                        .filter(|(_, record)| record.state.is_connected())
                        .map(|(id, record)| (id.clone(), record.runtime.clone()))
                        .collect()
                };
                for (id, runtime) in connected {
                    if let Err(err) = runtime.probe().await {
                        warn!("mcp server '{}' failed health probe: {}", id, err);
                        this.transition(
                            &id,
                            ConnectionState::Failed { message: err.to_string(), retry_count: 0 },
                        )
                        .await;
                        let _ = this.inner.alerts_tx.send(Alert::ServerUnhealthy { server_id: id.clone() });
                        this.maybe_schedule_reconnect(id);
                    }
                }
            }
        });
    }

    pub async fn disconnect(&self, server_id: &str) {
        let runtime = {
            let servers = self.inner.servers.read().await;
            servers.get(server_id).map(|r| r.runtime.clone())
        };
        if let Some(runtime) = runtime {
            runtime.disconnect().await;
        }
        self.transition(server_id, ConnectionState::Disconnected).await;
        let _ = self.inner.alerts_tx.send(Alert::ConnectionLost { server_id: server_id.to_string() });
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.inner.servers.read().await.keys().cloned().collect();
        for id in ids {
            self.disconnect(&id).await;
        }
    }

    /// Publish a notification received off-band (e.g. from a transport
    /// listener loop) onto the coordinator's event bus.
    pub fn publish_notification(&self, server_id: &str, notification: McpNotification) {
        let _ = self.inner.events_tx.send(CoordinatorEvent::ServerNotification {
            server_id: server_id.to_string(),
            notification,
        });
    }

    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        let servers = self.inner.servers.read().await;
        let mut out = HashMap::with_capacity(servers.len());
        for (id, record) in servers.iter() {
            out.insert(
                id.clone(),
                ServerSnapshot {
                    id: id.clone(),
                    display_name: record.spec.display_name().to_string(),
                    state: record.state.clone(),
                },
            );
        }
        CoordinatorSnapshot { servers: out }
    }

    pub async fn available_tools(&self, filter: &ToolFilter) -> Vec<ToolEntry> {
        let servers = self.inner.servers.read().await;
        let mut catalogue = Vec::new();
        for record in servers.values() {
            for tool in record.state.tools() {
                catalogue.push(ToolEntry {
                    server_id: tool.server_id.clone(),
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    definition: tool.input_schema.clone(),
                });
            }
        }
        filter.apply(&catalogue)
    }

    pub async fn server_count(&self) -> usize {
        self.inner.servers.read().await.len()
    }

    /// A weak-referencing proxy bound to one server+tool pair, usable
    /// from a tool-calling surface without keeping the coordinator
    /// alive past its own lifetime.
    pub fn tool_proxy(&self, server_id: &str, tool_name: &str) -> MCPToolProxy {
        MCPToolProxy {
            server_id: server_id.to_string(),
            tool_name: tool_name.to_string(),
            coordinator: Arc::downgrade(&self.inner),
        }
    }
}

/// Outcome of one [`MCPToolProxy`] invocation, distinguishing a
/// transient failure (worth retrying) from a terminal one.
#[derive(Debug)]
pub enum ToolResult {
    Success(JsonValue),
    Retry(McpError),
    Failure(McpError),
    /// The server accepted the call but deferred completion to a later,
    /// out-of-band notification rather than answering inline.
    Deferred,
}

/// A handle to one remote tool that does not keep the coordinator
/// alive; if the coordinator has been dropped, calls resolve to
/// [`ToolResult::Failure`] rather than panicking.
pub struct MCPToolProxy {
    server_id: String,
    tool_name: String,
    coordinator: Weak<Inner>,
}

impl MCPToolProxy {
    fn upgrade(&self) -> Option<MCPCoordinator> {
        self.coordinator.upgrade().map(|inner| MCPCoordinator { inner })
    }

    pub async fn call(&self, arguments: JsonValue, timeout: Duration) -> ToolResult {
        let Some(coordinator) = self.upgrade() else {
            return ToolResult::Failure(McpError::Other("coordinator dropped".to_string()));
        };
        match coordinator.call_tool(&self.server_id, &self.tool_name, arguments, timeout).await {
            Ok(value) => ToolResult::Success(value),
            Err(err @ McpError::ToolTimeout { .. }) => ToolResult::Retry(err),
            Err(err) => ToolResult::Failure(err),
        }
    }

    pub async fn call_with_retry(&self, arguments: JsonValue, timeout: Duration, max_retries: u32) -> ToolResult {
        let mut attempt = 0;
        loop {
            match self.call(arguments.clone(), timeout).await {
                ToolResult::Retry(err) if attempt < max_retries => {
                    attempt += 1;
                    warn!("mcp tool '{}.{}' retrying (attempt {})", self.server_id, self.tool_name, attempt);
                    continue;
                }
                other => return other,
            }
        }
    }
}

impl Default for MCPCoordinator {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[tokio::test]
    async fn snapshot_is_empty_before_any_registration() {
        let coordinator = MCPCoordinator::default();
        let snapshot = coordinator.snapshot().await;
        assert!(snapshot.servers.is_empty());
    }

    #[tokio::test]
    async fn connect_one_to_unreachable_http_server_reaches_failed() {
        let coordinator = MCPCoordinator::default();
        let spec = ServerSpec::Http {
            id: "bad".to_string(),
            display_name: "bad".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            headers: StdHashMap::new(),
        };
        let result = coordinator.connect_one(spec).await;
        assert!(result.is_err());
        let snapshot = coordinator.snapshot().await;
        let state = &snapshot.servers["bad"].state;
        assert!(matches!(state, ConnectionState::Failed { .. }));
    }

    #[tokio::test]
    async fn tool_proxy_fails_gracefully_once_coordinator_dropped() {
        let coordinator = MCPCoordinator::default();
        let proxy = coordinator.tool_proxy("s1", "search");
        drop(coordinator);
        let result = proxy.call(JsonValue::Null, Duration::from_millis(10)).await;
        assert!(matches!(result, ToolResult::Failure(_)));
    }

    #[tokio::test]
    async fn mark_reconnecting_transitions_and_alerts() {
        let coordinator = MCPCoordinator::default();
        coordinator
            .register(ServerSpec::Http {
                id: "s1".to_string(),
                display_name: "s1".to_string(),
                url: "http://127.0.0.1:1".to_string(),
                headers: StdHashMap::new(),
            })
            .await;
        let mut alerts = coordinator.subscribe_alerts();

        coordinator.mark_reconnecting("s1", 2, 5, None).await;

        let snapshot = coordinator.snapshot().await;
        assert!(matches!(
            snapshot.servers["s1"].state,
            ConnectionState::Reconnecting { attempt: 2, max_attempts: 5, .. }
        ));
        let alert = alerts.try_recv().expect("expected a Reconnecting alert");
        assert!(matches!(alert, Alert::Reconnecting { attempt: 2, .. }));
    }

    #[tokio::test]
    async fn cancel_tool_call_on_unknown_server_errors() {
        let coordinator = MCPCoordinator::default();
        let result = coordinator.cancel_tool_call("missing", 1).await;
        assert!(matches!(result, Err(McpError::UnknownServer(_))));
    }

    struct HangingTransport;

    #[async_trait::async_trait]
    impl McpTransport for HangingTransport {
        async fn send(&self, _message: &str) -> anyhow::Result<String> {
            std::future::pending::<()>().await;
            unreachable!()
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn call_tool_times_out_under_a_test_clock() {
        let clock = crate::clock::TestClock::new();
        let coordinator = MCPCoordinator::with_clock(ReconnectPolicy::Never, clock.clone());
        let spec = ServerSpec::Http {
            id: "hangs".to_string(),
            display_name: "hangs".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            headers: StdHashMap::new(),
        };
        coordinator.register(spec.clone()).await;
        {
            let mut servers = coordinator.inner.servers.write().await;
            let record = servers.get_mut("hangs").unwrap();
            record.state = ConnectionState::Connected { tools: vec![] };
            *record.runtime.transport.lock().await = Some(Box::new(HangingTransport));
        }
        let mut alerts = coordinator.subscribe_alerts();

        let call = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .call_tool("hangs", "search", JsonValue::Null, Duration::from_millis(50))
                    .await
            }
        });
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(50)).await;

        let result = call.await.unwrap();
        assert!(matches!(result, Err(McpError::ToolTimeout { timeout, .. }) if timeout == Duration::from_millis(50)));
        let alert = alerts.try_recv().expect("expected a ToolTimedOut alert");
        assert!(matches!(alert, Alert::ToolTimedOut { tool_name, .. } if tool_name == "search"));
    }

    #[tokio::test]
    async fn start_all_and_wait_reports_every_failure() {
        let coordinator = MCPCoordinator::default();
        let specs = vec![
            ServerSpec::Http {
                id: "a".to_string(),
                display_name: "a".to_string(),
                url: "http://127.0.0.1:1".to_string(),
                headers: StdHashMap::new(),
            },
            ServerSpec::Http {
                id: "b".to_string(),
                display_name: "b".to_string(),
                url: "http://127.0.0.1:2".to_string(),
                headers: StdHashMap::new(),
            },
        ];
        let result = coordinator.start_all_and_wait(specs).await;
        assert_eq!(result.connected.len(), 0);
        assert_eq!(result.failed.len(), 2);
    }
}

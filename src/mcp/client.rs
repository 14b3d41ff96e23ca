//! MCP client implementation.
//!
//! Owns the connection lifecycle state, JSON-RPC request id generation,
//! request/response correlation, and the protocol handshake (`initialize`,
//! `notifications/initialized`, tool listing).

use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{oneshot, watch};

use super::protocol::{
    ClientCapabilities, ClientInfo, ConnectionState, CallToolResult, InitializeParams,
    InitializeResult, JsonRpcRequest, JsonRpcResponse, McpError, McpTool, RootsCapability,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolsListResult, MCP_PROTOCOL_VERSION,
};
use super::transport::{
    HttpTransport, McpConfig, StdioTransport, Transport, TransportKind, WebSocketTransport,
};
use crate::tools::{Parameters, Property, Tool, ToolFunction};

/// Name reported in the `initialize` client info.
const CLIENT_NAME: &str = "opsagent-mcp-client";

type PendingMap = StdMutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>;

/// MCP client for discovering and invoking remotely-hosted tools.
///
/// One live connection per client. Construct with [`McpClient::new`], then
/// [`connect`](Self::connect); callers must re-check
/// [`is_connected`](Self::is_connected) after mid-session failures and
/// re-connect explicitly; no automatic retry happens at this layer.
///
/// # Example
///
/// ```ignore
/// use opsagent::mcp::{McpClient, McpConfig};
///
/// let config = McpConfig::stdio(vec!["npx".into(), "-y".into(), "mcp-server".into()]);
/// let client = McpClient::new(config);
/// client.connect().await?;
/// let tools = client.list_tools().await?;
/// ```
pub struct McpClient {
    config: McpConfig,
    state: Arc<RwLock<ConnectionState>>,
    server_info: RwLock<Option<ServerInfo>>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    tools: RwLock<Vec<McpTool>>,
    next_id: AtomicU64,
    pending: Arc<PendingMap>,
    transport: StdMutex<Option<Arc<dyn Transport>>>,
    transport_override: StdMutex<Option<Arc<dyn Transport>>>,
    shutdown: StdMutex<Option<watch::Sender<bool>>>,
}

impl McpClient {
    /// Create a new client for `config`. The transport is built on connect.
    #[must_use]
    pub fn new(config: McpConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            server_info: RwLock::new(None),
            capabilities: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            transport: StdMutex::new(None),
            transport_override: StdMutex::new(None),
            shutdown: StdMutex::new(None),
        })
    }

    /// Create a client that uses `transport` instead of building one from
    /// the config's descriptor. The config still selects the request path
    /// (synchronous for [`TransportKind::Http`], correlated otherwise).
    #[must_use]
    pub fn with_transport(config: McpConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let client = Self::new(config);
        *client.transport_override.lock().expect("transport lock") = Some(transport);
        client
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().expect("state lock") = state;
    }

    /// True once the handshake completed and the client was not torn down.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.read().expect("state lock") == ConnectionState::Connected
    }

    /// Server info captured from the `initialize` handshake.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().expect("server info lock").clone()
    }

    /// Server capabilities captured from the `initialize` handshake.
    #[must_use]
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().expect("capabilities lock").clone()
    }

    /// Establish the connection and run the protocol handshake.
    ///
    /// Rejected unless the client is in the Disconnected state. A failure at
    /// any step reverts the state to Disconnected; the caller retries
    /// explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::AlreadyConnected`] when not Disconnected, a
    /// connection error if the transport cannot be built or dialed, or the
    /// handshake failure.
    pub async fn connect(&self) -> Result<(), McpError> {
        {
            let mut state = self.state.write().expect("state lock");
            if *state != ConnectionState::Disconnected {
                return Err(McpError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        let transport = match self.build_transport() {
            Ok(transport) => transport,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        if let Err(e) = transport.connect().await {
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        *self.transport.lock().expect("transport lock") = Some(Arc::clone(&transport));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock().expect("shutdown lock") = Some(shutdown_tx);

        // HTTP correlates implicitly (one request, one response); the async
        // transports multiplex and need the dispatcher.
        if self.config.transport != TransportKind::Http {
            self.spawn_dispatcher(Arc::clone(&transport), shutdown_rx);
        }

        if let Err(e) = self.initialize().await {
            let _ = transport.disconnect().await;
            self.teardown();
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        self.set_state(ConnectionState::Connected);

        // Best-effort catalog refresh; a failure is logged, not fatal.
        if let Err(e) = self.refresh_tools().await {
            warn!("failed to refresh tool catalog: {e}");
        }

        Ok(())
    }

    /// Tear down the connection.
    ///
    /// Unblocks every pending call with a cancellation error and stops the
    /// transport loops. Idempotent; safe from any state.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close cleanly.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        {
            let mut state = self.state.write().expect("state lock");
            if matches!(
                *state,
                ConnectionState::Disconnected | ConnectionState::Closed
            ) {
                return Ok(());
            }
            *state = ConnectionState::Closed;
        }

        let transport = {
            if let Some(shutdown) = self.shutdown.lock().expect("shutdown lock").take() {
                let _ = shutdown.send(true);
            }
            self.transport.lock().expect("transport lock").take()
        };
        if let Some(transport) = transport {
            transport.disconnect().await?;
        }
        drain_pending(&self.pending);
        Ok(())
    }

    /// List the server's tools. Always issues a fresh `tools/list`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotConnected`] unless connected, or the protocol
    /// error the server answered with.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        let request = self.new_request("tools/list", None);
        let response = self.send_request(request).await?;
        let result: ToolsListResult = parse_result(response)?;
        Ok(result.tools)
    }

    /// Re-fetch the tool catalog and cache it.
    ///
    /// # Errors
    ///
    /// Returns the `tools/list` failure.
    pub async fn refresh_tools(&self) -> Result<(), McpError> {
        let tools = self.list_tools().await?;
        *self.tools.write().expect("tools lock") = tools;
        Ok(())
    }

    /// Invoke a tool by name.
    ///
    /// The result envelope is returned as-is; content is not interpreted
    /// here beyond deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotConnected`] unless connected, or the protocol
    /// error the server answered with.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        let params = ToolCallParams {
            name: name.to_string(),
            arguments: Some(serde_json::Value::Object(arguments)),
        };
        let request = self.new_request("tools/call", Some(serde_json::to_value(&params)?));
        let response = self.send_request(request).await?;
        parse_result(response)
    }

    /// Last-known discovered tool catalog.
    #[must_use]
    pub fn cached_tools(&self) -> Vec<McpTool> {
        self.tools.read().expect("tools lock").clone()
    }

    /// Cached catalog re-shaped into the invocation-ready serialization:
    /// an array of `{type:"function", function:{...}}` entries with the
    /// schema translated one level deep.
    #[must_use]
    pub fn available_tools_json(&self) -> Vec<u8> {
        let converted: Vec<Tool> = self
            .tools
            .read()
            .expect("tools lock")
            .iter()
            .map(convert_tool)
            .collect();

        serde_json::to_vec(&converted).unwrap_or_else(|e| {
            warn!("failed to serialize tool catalog: {e}");
            b"[]".to_vec()
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn build_transport(&self) -> Result<Arc<dyn Transport>, McpError> {
        if let Some(transport) = self
            .transport_override
            .lock()
            .expect("transport lock")
            .clone()
        {
            return Ok(transport);
        }

        match self.config.transport {
            TransportKind::Http => {
                if self.config.server_url.is_empty() {
                    return Err(McpError::InvalidEndpoint(
                        "server URL required for HTTP transport".to_string(),
                    ));
                }
                Ok(Arc::new(HttpTransport::new(
                    self.config.server_url.clone(),
                    self.config.headers.clone(),
                    self.config.timeout,
                )))
            }
            TransportKind::WebSocket => {
                if self.config.server_url.is_empty() {
                    return Err(McpError::InvalidEndpoint(
                        "server URL required for WebSocket transport".to_string(),
                    ));
                }
                Ok(Arc::new(WebSocketTransport::new(
                    self.config.server_url.clone(),
                )))
            }
            TransportKind::Stdio => {
                if self.config.command.is_empty() {
                    return Err(McpError::InvalidEndpoint(
                        "command required for stdio transport".to_string(),
                    ));
                }
                Ok(Arc::new(StdioTransport::new(
                    self.config.command.clone(),
                    self.config.env.clone(),
                )))
            }
        }
    }

    fn spawn_dispatcher(
        &self,
        transport: Arc<dyn Transport>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let state = Arc::clone(&self.state);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = transport.receive() => match received {
                        Ok(response) => route_frame(&pending, response),
                        // Idle deadline on the transport queue; keep polling.
                        Err(McpError::Timeout(_)) => {}
                        Err(e) => {
                            debug!("dispatcher stopping: {e}");
                            break;
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
            // Mid-session failure degrades the client to disconnected; an
            // explicit disconnect already moved it to Closed.
            {
                let mut state = state.write().expect("state lock");
                if *state != ConnectionState::Closed {
                    *state = ConnectionState::Disconnected;
                }
            }
            drain_pending(&pending);
        });
    }

    fn teardown(&self) {
        if let Some(shutdown) = self.shutdown.lock().expect("shutdown lock").take() {
            let _ = shutdown.send(true);
        }
        self.transport.lock().expect("transport lock").take();
        drain_pending(&self.pending);
    }

    fn next_request_id(&self) -> u64 {
        // Process-local, monotonically increasing, never reused.
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn new_request(&self, method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(method, params, self.next_request_id())
    }

    fn current_transport(&self) -> Result<Arc<dyn Transport>, McpError> {
        self.transport
            .lock()
            .expect("transport lock")
            .clone()
            .ok_or(McpError::NotConnected)
    }

    fn shutdown_receiver(&self) -> Option<watch::Receiver<bool>> {
        self.shutdown
            .lock()
            .expect("shutdown lock")
            .as_ref()
            .map(watch::Sender::subscribe)
    }

    async fn initialize(&self) -> Result<(), McpError> {
        self.set_state(ConnectionState::Initializing);

        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities {
                roots: Some(RootsCapability { list_changed: true }),
                sampling: None,
            },
            client_info: ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let request = self.new_request("initialize", Some(serde_json::to_value(&params)?));
        let response = self.send_request(request).await?;
        let result: InitializeResult = parse_result(response)?;

        *self.server_info.write().expect("server info lock") = Some(result.server_info);
        *self.capabilities.write().expect("capabilities lock") = Some(result.capabilities);

        // Fire-and-forget; no response expected.
        let notification = JsonRpcRequest::notification("notifications/initialized", None);
        if let Err(e) = self.send_notification(notification).await {
            debug!("initialized notification not delivered: {e}");
        }

        Ok(())
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let transport = self.current_transport()?;
        let response = match self.config.transport {
            TransportKind::Http => transport.send_request(request).await?,
            TransportKind::WebSocket | TransportKind::Stdio => {
                self.send_correlated_request(&transport, request).await?
            }
        };

        if let Some(error) = response.error {
            return Err(McpError::Protocol {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response)
    }

    /// Async-transport request path: register a waiter keyed by the request
    /// id, send the frame, then block on the private response channel, the
    /// per-call timeout, or the client's own cancellation, whichever
    /// resolves first. The map entry is removed on every exit path.
    async fn send_correlated_request(
        &self,
        transport: &Arc<dyn Transport>,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = request.request_id().ok_or_else(|| {
            McpError::Transport("correlated request requires a numeric id".to_string())
        })?;

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().expect("pending lock").insert(id, sender);
        let _cleanup = PendingGuard {
            pending: &*self.pending,
            id,
        };

        let mut shutdown = self.shutdown_receiver();
        transport.send(request).await?;

        let timeout = self.config.timeout;
        tokio::select! {
            received = receiver => received.map_err(|_| McpError::Cancelled),
            () = tokio::time::sleep(timeout) => Err(McpError::Timeout(timeout)),
            () = async {
                match shutdown.as_mut() {
                    Some(receiver) => {
                        let _ = receiver.changed().await;
                    }
                    None => std::future::pending().await,
                }
            } => Err(McpError::Cancelled),
        }
    }

    async fn send_notification(&self, notification: JsonRpcRequest) -> Result<(), McpError> {
        let transport = self.current_transport()?;
        match self.config.transport {
            TransportKind::Http => {
                let _ = transport.send_request(notification).await?;
                Ok(())
            }
            TransportKind::WebSocket | TransportKind::Stdio => transport.send(notification).await,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }
}

/// Removes the pending-map entry when the request future exits, no matter
/// which path completed.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

/// Route one inbound frame to the waiter registered for its id. Frames
/// whose id has no waiter (already timed out, or unexpected) are dropped.
fn route_frame(pending: &PendingMap, response: JsonRpcResponse) {
    let Some(id) = response.request_id() else {
        debug!("dropping response without numeric id");
        return;
    };
    let sender = pending.lock().expect("pending lock").remove(&id);
    match sender {
        Some(sender) => {
            let _ = sender.send(response);
        }
        None => debug!("dropping response for unknown request id {id}"),
    }
}

/// Unblock every waiter with a cancellation by dropping its sender.
fn drain_pending(pending: &PendingMap) {
    let drained: Vec<_> = {
        let mut pending = pending.lock().expect("pending lock");
        pending.drain().collect()
    };
    drop(drained);
}

fn parse_result<T: DeserializeOwned>(response: JsonRpcResponse) -> Result<T, McpError> {
    let value = response.result.ok_or_else(|| McpError::Protocol {
        code: super::protocol::error_codes::INTERNAL_ERROR,
        message: "response missing result".to_string(),
    })?;
    Ok(serde_json::from_value(value)?)
}

/// Translate one remote tool descriptor into the invocation catalog form.
/// The schema is mapped one level deep: nested or array schemas flatten to
/// their declared type string, description, and enum.
fn convert_tool(tool: &McpTool) -> Tool {
    Tool::function(ToolFunction {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: Some(convert_schema(&tool.input_schema)),
    })
}

fn convert_schema(schema: &super::protocol::ToolSchema) -> Parameters {
    let mut properties = std::collections::BTreeMap::new();
    for (name, raw) in &schema.properties {
        let Some(map) = raw.as_object() else { continue };
        let property = Property {
            kind: map
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: map
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            enum_values: map
                .get("enum")
                .and_then(serde_json::Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(serde_json::Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };
        properties.insert(name.clone(), property);
    }

    Parameters {
        kind: schema.kind.clone(),
        required: schema.required.clone(),
        properties,
    }
}

//! MCP transport implementations.
//!
//! Three interchangeable byte channels carry JSON-RPC frames:
//!
//! - [`HttpTransport`]: stateless request/response; only the synchronous
//!   [`Transport::send_request`] path is supported.
//! - [`WebSocketTransport`]: duplex socket with a send loop and a receive
//!   loop over bounded internal queues.
//! - [`StdioTransport`]: a spawned subprocess with its stdin/stdout bound as
//!   the write/read ends; many logical requests are multiplexed over the one
//!   stream, so correlation happens one layer up in the client.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::protocol::{JsonRpcRequest, JsonRpcResponse, McpError};

/// Deadline for enqueueing one outbound WebSocket frame.
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for one inbound WebSocket frame to arrive.
const WS_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);
/// Depth of the internal WebSocket queues.
const WS_QUEUE_DEPTH: usize = 10;
/// Depth of the stdio inbound queue.
const STDIO_QUEUE_DEPTH: usize = 32;

/// Default request timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Which concrete transport a client uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Subprocess stdin/stdout.
    Stdio,
    /// Synchronous HTTP request/response.
    Http,
    /// Duplex WebSocket.
    WebSocket,
}

impl TransportKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::WebSocket => "websocket",
        }
    }
}

/// Connection configuration for an MCP client.
///
/// Immutable once the client is constructed; selects and parameterizes the
/// concrete transport.
#[derive(Clone, Debug)]
pub struct McpConfig {
    /// Transport selector.
    pub transport: TransportKind,
    /// Command and arguments (stdio transport).
    pub command: Vec<String>,
    /// Extra environment for the spawned server (stdio transport).
    pub env: HashMap<String, String>,
    /// Server URL (HTTP and WebSocket transports).
    pub server_url: String,
    /// Extra request headers (HTTP transport).
    pub headers: HashMap<String, String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl McpConfig {
    /// Configuration for a stdio server spawned from `command`.
    #[must_use]
    pub fn stdio(command: Vec<String>) -> Self {
        Self {
            transport: TransportKind::Stdio,
            command,
            env: HashMap::new(),
            server_url: String::new(),
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Configuration for an HTTP server at `server_url`.
    #[must_use]
    pub fn http(server_url: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Http,
            command: Vec::new(),
            env: HashMap::new(),
            server_url: server_url.into(),
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Configuration for a WebSocket server at `server_url`.
    #[must_use]
    pub fn websocket(server_url: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::WebSocket,
            command: Vec::new(),
            env: HashMap::new(),
            server_url: server_url.into(),
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Add an environment variable for the spawned stdio server.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add an HTTP request header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Override the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-level channel carrying JSON-RPC frames to an MCP server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid or the dial/spawn fails;
    /// the transport stays disconnected.
    async fn connect(&self) -> Result<(), McpError>;

    /// Tear the connection down. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close cleanly.
    async fn disconnect(&self) -> Result<(), McpError>;

    /// Queue one frame for delivery (asynchronous transports).
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Unsupported`] on synchronous transports, a
    /// timeout error when the outbound queue stays full past its deadline.
    async fn send(&self, request: JsonRpcRequest) -> Result<(), McpError>;

    /// Take the next inbound frame (asynchronous transports).
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Unsupported`] on synchronous transports, a
    /// timeout error when nothing arrives within the deadline.
    async fn receive(&self) -> Result<JsonRpcResponse, McpError>;

    /// Whether the transport currently considers itself connected.
    fn is_connected(&self) -> bool;

    /// Synchronous round trip (HTTP only).
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Unsupported`] unless the transport overrides it.
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let _ = request;
        Err(McpError::Unsupported)
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Stateless HTTP transport: every request is one POST of the JSON-RPC
/// envelope.
pub struct HttpTransport {
    base_url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Create an HTTP transport for `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, headers: HashMap<String, String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into(),
            headers,
            client,
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<(), McpError> {
        // No persistent connection; just validate the URL.
        Url::parse(&self.base_url)
            .map_err(|e| McpError::InvalidEndpoint(format!("{}: {e}", self.base_url)))?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, _request: JsonRpcRequest) -> Result<(), McpError> {
        Err(McpError::Unsupported)
    }

    async fn receive(&self) -> Result<JsonRpcResponse, McpError> {
        Err(McpError::Unsupported)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        let mut builder = self
            .client
            .post(&self.base_url)
            .header("Accept", "application/json")
            .json(&request);
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Transport(format!(
                "HTTP request failed with status {status}"
            )));
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| McpError::Transport(format!("failed to decode HTTP response: {e}")))
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// Duplex WebSocket transport.
///
/// `connect` starts two background loops: one drains the outbound queue
/// onto the socket, the other decodes inbound text frames into the inbound
/// queue. A socket error on either loop degrades the transport to
/// disconnected.
pub struct WebSocketTransport {
    url: String,
    connected: Arc<AtomicBool>,
    outbound: StdMutex<Option<mpsc::Sender<JsonRpcRequest>>>,
    inbound: Mutex<Option<mpsc::Receiver<JsonRpcResponse>>>,
    close: StdMutex<Option<watch::Sender<bool>>>,
}

/// Rewrite http(s) URLs to their ws(s) equivalents.
#[must_use]
pub fn normalize_ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        url.to_string()
    }
}

impl WebSocketTransport {
    /// Create a WebSocket transport for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connected: Arc::new(AtomicBool::new(false)),
            outbound: StdMutex::new(None),
            inbound: Mutex::new(None),
            close: StdMutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<(), McpError> {
        let url = normalize_ws_url(&self.url);
        Url::parse(&url).map_err(|e| McpError::InvalidEndpoint(format!("{url}: {e}")))?;

        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| McpError::Connect(format!("failed to dial {url}: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<JsonRpcRequest>(WS_QUEUE_DEPTH);
        let (in_tx, in_rx) = mpsc::channel::<JsonRpcResponse>(WS_QUEUE_DEPTH);
        let (close_tx, close_rx) = watch::channel(false);

        *self.outbound.lock().expect("outbound lock") = Some(out_tx);
        *self.inbound.lock().await = Some(in_rx);
        *self.close.lock().expect("close lock") = Some(close_tx);
        self.connected.store(true, Ordering::SeqCst);

        // Send loop: outbound queue -> socket.
        let connected = Arc::clone(&self.connected);
        let mut close_send = close_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = out_rx.recv() => {
                        let Some(request) = request else { break };
                        let frame = match serde_json::to_string(&request) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("skipping unserializable frame: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            warn!("websocket send failed: {e}");
                            connected.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    _ = close_send.changed() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Receive loop: socket -> inbound queue.
        let connected = Arc::clone(&self.connected);
        let mut close_recv = close_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = source.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<JsonRpcResponse>(&text) {
                                    Ok(response) => {
                                        if in_tx.send(response).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => warn!("dropping undecodable websocket frame: {e}"),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                connected.store(false, Ordering::SeqCst);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("websocket receive failed: {e}");
                                connected.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                    _ = close_recv.changed() => break,
                }
            }
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(close) = self.close.lock().expect("close lock").take() {
            let _ = close.send(true);
        }
        self.outbound.lock().expect("outbound lock").take();
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let sender = self
            .outbound
            .lock()
            .expect("outbound lock")
            .clone()
            .ok_or(McpError::NotConnected)?;

        sender
            .send_timeout(request, WS_SEND_TIMEOUT)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => McpError::Timeout(WS_SEND_TIMEOUT),
                SendTimeoutError::Closed(_) => McpError::Closed,
            })
    }

    async fn receive(&self) -> Result<JsonRpcResponse, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let mut guard = self.inbound.lock().await;
        let receiver = guard.as_mut().ok_or(McpError::NotConnected)?;

        match tokio::time::timeout(WS_RECEIVE_TIMEOUT, receiver.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(McpError::Closed),
            Err(_) => Err(McpError::Timeout(WS_RECEIVE_TIMEOUT)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Stdio
// ============================================================================

/// Subprocess transport: one JSON-RPC frame per line over the child's
/// stdin/stdout.
pub struct StdioTransport {
    command: Vec<String>,
    env: HashMap<String, String>,
    connected: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
    writer: Mutex<Option<BufWriter<ChildStdin>>>,
    inbound: Mutex<Option<mpsc::Receiver<JsonRpcResponse>>>,
}

impl StdioTransport {
    /// Create a stdio transport that will spawn `command` on connect.
    #[must_use]
    pub fn new(command: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command,
            env,
            connected: Arc::new(AtomicBool::new(false)),
            child: Mutex::new(None),
            writer: Mutex::new(None),
            inbound: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<(), McpError> {
        let program = self.command.first().ok_or_else(|| {
            McpError::InvalidEndpoint("stdio transport requires a command".to_string())
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Connect(format!("failed to spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connect("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connect("child stdout unavailable".to_string()))?;

        let (in_tx, in_rx) = mpsc::channel::<JsonRpcResponse>(STDIO_QUEUE_DEPTH);

        // Reader task: child stdout -> inbound queue, one frame per line.
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break, // EOF or error
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(response) => {
                                if in_tx.send(response).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("dropping undecodable stdio line: {e}"),
                        }
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        *self.writer.lock().await = Some(BufWriter::new(stdin));
        *self.child.lock().await = Some(child);
        *self.inbound.lock().await = Some(in_rx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the writer closes the child's stdin.
        self.writer.lock().await.take();
        self.inbound.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            // The process may already have exited; termination races are fine.
            if let Err(e) = child.start_kill() {
                debug!("stdio child kill: {e}");
            }
            let _ = child.wait().await;
        }
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let frame = serde_json::to_string(&request)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(McpError::NotConnected)?;

        let write = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        write.await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            McpError::Transport(format!("stdio write failed: {e}"))
        })
    }

    async fn receive(&self) -> Result<JsonRpcResponse, McpError> {
        let mut guard = self.inbound.lock().await;
        let receiver = guard.as_mut().ok_or(McpError::NotConnected)?;

        match receiver.recv().await {
            Some(response) => Ok(response),
            None => {
                self.connected.store(false, Ordering::SeqCst);
                Err(McpError::Closed)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

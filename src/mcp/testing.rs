//! In-memory transport for exercising the client without a server.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpError, RequestId, JSONRPC_VERSION,
};
use super::transport::Transport;

type Responder = dyn Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync;

/// Duplex mock transport: records every outbound request, answers through a
/// responder closure, and lets tests push extra inbound frames by hand.
pub(crate) struct MockTransport {
    connected: StdMutex<bool>,
    requests: StdMutex<Vec<JsonRpcRequest>>,
    responder: Box<Responder>,
    inbound_tx: mpsc::Sender<JsonRpcResponse>,
    inbound_rx: Mutex<mpsc::Receiver<JsonRpcResponse>>,
}

impl MockTransport {
    pub(crate) fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Arc::new(Self {
            connected: StdMutex::new(false),
            requests: StdMutex::new(Vec::new()),
            responder: Box::new(responder),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
        })
    }

    pub(crate) async fn push_response(&self, response: JsonRpcResponse) {
        self.inbound_tx.send(response).await.expect("push response");
    }

    pub(crate) fn recorded_methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    fn recorded_with_method(&self, method: &str) -> Vec<JsonRpcRequest> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Poll until `count` requests with `method` have been sent.
    pub(crate) async fn wait_for_method_count(
        &self,
        method: &str,
        count: usize,
    ) -> Vec<JsonRpcRequest> {
        for _ in 0..200 {
            let matching = self.recorded_with_method(method);
            if matching.len() >= count {
                return matching;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("never saw {count} '{method}' requests");
    }

    /// Last `tools/call` request params, if any.
    pub(crate) fn last_call_params(&self) -> Option<Value> {
        self.recorded_with_method("tools/call")
            .last()
            .and_then(|r| r.params.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), McpError> {
        *self.connected.lock().expect("connected lock") = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        *self.connected.lock().expect("connected lock") = false;
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let response = (self.responder)(&request);
        self.requests.lock().expect("requests lock").push(request);
        if let Some(response) = response {
            self.push_response(response).await;
        }
        Ok(())
    }

    async fn receive(&self) -> Result<JsonRpcResponse, McpError> {
        let mut guard = self.inbound_rx.lock().await;
        guard.recv().await.ok_or(McpError::Closed)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().expect("connected lock")
    }
}

/// Success envelope with `result`.
pub(crate) fn result_response(id: u64, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(RequestId::Number(id)),
        result: Some(result),
        error: None,
    }
}

/// Error envelope.
pub(crate) fn error_response(id: u64, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(RequestId::Number(id)),
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_string(),
            data: None,
        }),
    }
}

/// Answers the handshake (`initialize`, empty `tools/list`); notifications
/// and everything else get no response.
pub(crate) fn handshake_responder(request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
    let id = request.request_id()?;
    match request.method.as_str() {
        "initialize" => Some(result_response(
            id,
            json!({
                "protocolVersion": super::protocol::MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": "mock", "version": "0.1.0"}
            }),
        )),
        "tools/list" => Some(result_response(id, json!({"tools": []}))),
        _ => None,
    }
}

/// Handshake responder advertising the given tools.
pub(crate) fn catalog_responder(
    tools: Value,
) -> impl Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync + 'static {
    move |request| {
        let id = request.request_id()?;
        match request.method.as_str() {
            "tools/list" => Some(result_response(id, json!({"tools": tools.clone()}))),
            _ => handshake_responder(request),
        }
    }
}

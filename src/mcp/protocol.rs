//! MCP JSON-RPC protocol types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version negotiated during the handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request or notification.
///
/// A notification carries no `id` and no response is expected for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID. Absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Request method name.
    pub method: String,
    /// Request parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request with a numeric id.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(id)),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, no response expected).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Numeric request id, if this request carries one.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self.id {
            Some(RequestId::Number(n)) => Some(n),
            _ => None,
        }
    }
}

/// JSON-RPC request ID.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric ID.
    Number(u64),
    /// String ID.
    String(String),
}

/// JSON-RPC response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID this response corresponds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Response result (success case).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Response error (error case).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Check if this response is an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Numeric request id this response answers, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self.id {
            Some(RequestId::Number(n)) => Some(n),
            _ => None,
        }
    }
}

/// JSON-RPC error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes.
pub mod error_codes {
    /// Parse error - Invalid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Invalid Request - JSON is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Errors produced by the MCP client and its transports.
#[derive(Debug, Error)]
pub enum McpError {
    /// `connect` was called while the client is not in the Disconnected state.
    #[error("client already connected or connecting")]
    AlreadyConnected,

    /// The operation requires a connected client or transport.
    #[error("client not connected")]
    NotConnected,

    /// The configured endpoint or command is unusable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Mid-session transport I/O failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport or its queues were closed underneath the caller.
    #[error("transport closed")]
    Closed,

    /// The server answered with a JSON-RPC error envelope.
    #[error("protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code.
        code: i64,
        /// Server-supplied message.
        message: String,
    },

    /// A bounded send/receive deadline or the per-call timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The call was abandoned because the client disconnected.
    #[error("request cancelled: client disconnected")]
    Cancelled,

    /// The operation is not supported by this transport.
    #[error("operation not supported by this transport")]
    Unsupported,

    /// Envelope or payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Connection lifecycle state of an MCP client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; the only state `connect` accepts.
    #[default]
    Disconnected,
    /// Transport is being established.
    Connecting,
    /// Transport is up, protocol handshake in flight.
    Initializing,
    /// Handshake complete; requests may be issued.
    Connected,
    /// Explicitly disconnected; terminal.
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool descriptor advertised by an MCP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct McpTool {
    /// Tool name, unique within the server's catalog.
    pub name: String,
    /// Tool description.
    #[serde(default)]
    pub description: String,
    /// Input schema (JSON-Schema-like).
    #[serde(rename = "inputSchema")]
    pub input_schema: ToolSchema,
}

/// JSON-Schema-like input schema. Property values are kept raw; only one
/// level is interpreted when converting to the invocation catalog.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Schema type, normally "object".
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Property name to raw schema value.
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
    /// Required property names.
    #[serde(default)]
    pub required: Vec<String>,
}

/// One content item of a tool call result.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    /// Text content.
    #[serde(rename = "text")]
    Text {
        /// The text payload.
        text: String,
    },
    /// Image content (base64 encoded).
    #[serde(rename = "image")]
    Image {
        /// Base64 encoded image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Resource reference.
    #[serde(rename = "resource")]
    Resource {
        /// Resource URI.
        uri: String,
        /// Resource MIME type.
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
        /// Optional inline text.
        #[serde(default)]
        text: Option<String>,
    },
}

/// Result envelope of `tools/call`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Content items returned by the tool.
    #[serde(default)]
    pub content: Vec<ToolContent>,
    /// Whether the tool reported an error.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// `initialize` request params.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities.
    pub capabilities: ClientCapabilities,
    /// Client info.
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// Client capabilities.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Roots capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    /// Sampling capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,
}

/// Roots capability.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RootsCapability {
    /// Whether the roots list can change.
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Sampling capability.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SamplingCapability {}

/// Client info.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// `initialize` response result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server info.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP server capabilities.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool capabilities.
    #[serde(default)]
    pub tools: Option<ToolsCapability>,
    /// Resource capabilities.
    #[serde(default)]
    pub resources: Option<ResourcesCapability>,
    /// Prompt capabilities.
    #[serde(default)]
    pub prompts: Option<PromptsCapability>,
}

/// Tool capabilities.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Whether the tools list can change.
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Resource capabilities.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourcesCapability {
    /// Whether subscriptions are supported.
    #[serde(default)]
    pub subscribe: bool,
    /// Whether the resource list can change.
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Prompt capabilities.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PromptsCapability {
    /// Whether the prompt list can change.
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Server info.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    #[serde(default)]
    pub version: Option<String>,
}

/// `tools/list` response result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsListResult {
    /// List of available tools.
    pub tools: Vec<McpTool>,
}

/// `tools/call` request params.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new("tools/list", None, 7);

        let json = serde_json::to_string(&request).expect("serialize");
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("tools/list"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let notification = JsonRpcRequest::notification("notifications/initialized", None);

        let json = serde_json::to_string(&notification).expect("serialize");
        assert!(!json.contains("\"id\""));
        assert_eq!(notification.request_id(), None);
    }

    #[test]
    fn test_response_error_envelope() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .expect("deserialize");

        assert!(response.is_error());
        assert_eq!(response.request_id(), Some(3));
        assert_eq!(
            response.error.as_ref().map(|e| e.code),
            Some(error_codes::METHOD_NOT_FOUND)
        );
    }

    #[test]
    fn test_request_id_variants() {
        let num = serde_json::to_string(&RequestId::Number(42)).expect("serialize");
        let text = serde_json::to_string(&RequestId::String("req-1".into())).expect("serialize");

        assert_eq!(num, "42");
        assert_eq!(text, "\"req-1\"");
    }

    #[test]
    fn test_tool_descriptor_deserialization() {
        let tool: McpTool = serde_json::from_str(
            r#"{
                "name": "get_pods",
                "description": "List pods",
                "inputSchema": {
                    "type": "object",
                    "properties": {"namespace": {"type": "string"}},
                    "required": ["namespace"]
                }
            }"#,
        )
        .expect("deserialize");

        assert_eq!(tool.name, "get_pods");
        assert_eq!(tool.input_schema.kind, "object");
        assert_eq!(tool.input_schema.required, vec!["namespace"]);
    }

    #[test]
    fn test_call_result_defaults() {
        let result: CallToolResult =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"ok"}]}"#)
                .expect("deserialize");

        assert!(!result.is_error);
        assert!(matches!(result.content[0], ToolContent::Text { .. }));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}

//! Model Context Protocol (MCP) client support.
//!
//! MCP is the JSON-RPC-based protocol used to discover and invoke
//! remotely-hosted tools. This module provides:
//!
//! - [`McpClient`] - connection lifecycle, handshake, and request correlation
//! - [`Transport`] - byte-channel trait with stdio, HTTP, and WebSocket
//!   implementations
//! - [`McpToolRegistry`] - merged local/remote catalog and call routing
//!
//! # Example
//!
//! ```ignore
//! use opsagent::mcp::{McpClient, McpConfig, McpToolRegistry};
//! use std::sync::Arc;
//!
//! let config = McpConfig::stdio(vec![
//!     "npx".into(), "-y".into(), "@modelcontextprotocol/server-filesystem".into(),
//! ]);
//! let client = McpClient::new(config);
//! client.connect().await?;
//!
//! let registry = Arc::new(McpToolRegistry::new());
//! registry.set_client(Some(client));
//! ```
//!
//! Only tool discovery (`tools/list`) and invocation (`tools/call`) are
//! implemented; resources, prompts, and subscriptions are out of scope.

pub mod client;
pub mod protocol;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::McpClient;
pub use protocol::{
    CallToolResult, ConnectionState, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpError,
    McpTool, ServerCapabilities, ServerInfo, ToolContent, ToolSchema, MCP_PROTOCOL_VERSION,
};
pub use registry::{render_tool_content, McpToolRegistry};
pub use transport::{
    HttpTransport, McpConfig, StdioTransport, Transport, TransportKind, WebSocketTransport,
};

/// Sample configuration for the filesystem MCP server (stdio).
#[must_use]
pub fn filesystem_server_config(root: &str) -> McpConfig {
    McpConfig::stdio(vec![
        "npx".to_string(),
        "-y".to_string(),
        "@modelcontextprotocol/server-filesystem".to_string(),
        root.to_string(),
    ])
}

/// Sample configuration for the brave-search MCP server (stdio).
#[must_use]
pub fn brave_search_server_config(api_key: &str) -> McpConfig {
    McpConfig::stdio(vec![
        "npx".to_string(),
        "-y".to_string(),
        "@modelcontextprotocol/server-brave-search".to_string(),
    ])
    .with_env("BRAVE_API_KEY", api_key)
}

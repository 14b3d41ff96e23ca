//! Merged local/remote tool catalog and call routing.
//!
//! Presents one catalog to the LLM-facing orchestration layer and routes a
//! named call to the backend that owns it. Remote entries shadow local
//! entries of the same name; the shadowing is logged, never silent.

use log::{error, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::client::McpClient;
use super::protocol::ToolContent;
use crate::tools::{serialize_catalog, FunctionCall, Tool, ToolExecutor};

/// Registry over statically-registered tools, local executors, and an
/// optional MCP client. Internally locked; share via `Arc`.
#[derive(Default)]
pub struct McpToolRegistry {
    inner: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    client: Option<Arc<McpClient>>,
    local_tools: Vec<Tool>,
    local_serialized: Vec<u8>,
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl McpToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach or detach the MCP client. Idempotent.
    pub fn set_client(&self, client: Option<Arc<McpClient>>) {
        self.inner.write().expect("registry lock").client = client;
    }

    /// The attached MCP client, if any.
    #[must_use]
    pub fn client(&self) -> Option<Arc<McpClient>> {
        self.inner.read().expect("registry lock").client.clone()
    }

    /// Replace the statically-registered catalog. Idempotent.
    pub fn set_local_tools(&self, tools: Vec<Tool>) {
        let serialized = serialize_catalog(&tools);
        let mut state = self.inner.write().expect("registry lock");
        state.local_tools = tools;
        state.local_serialized = serialized;
    }

    /// Register a local executor for one catalog name.
    pub fn register_executor(&self, executor: Arc<dyn ToolExecutor>) {
        self.inner
            .write()
            .expect("registry lock")
            .executors
            .insert(executor.name().to_string(), executor);
    }

    fn local_executor(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.inner
            .read()
            .expect("registry lock")
            .executors
            .get(name)
            .cloned()
    }

    /// JSON-serialized merged catalog. Remote tools are included when a
    /// client is attached and connected, and take precedence over local
    /// entries of the same name. Falls back to the local catalog unmodified
    /// if serialization of the merge fails.
    #[must_use]
    pub fn get_all_tools(&self) -> Vec<u8> {
        let (client, local_tools, local_serialized) = {
            let state = self.inner.read().expect("registry lock");
            (
                state.client.clone(),
                state.local_tools.clone(),
                state.local_serialized.clone(),
            )
        };

        let mut merged: Vec<Tool> = Vec::new();
        let mut remote_names: HashSet<String> = HashSet::new();

        if let Some(client) = client {
            if client.is_connected() {
                let remote_bytes = client.available_tools_json();
                match serde_json::from_slice::<Vec<Tool>>(&remote_bytes) {
                    Ok(remote) => {
                        for tool in remote {
                            remote_names.insert(tool.function.name.clone());
                            merged.push(tool);
                        }
                    }
                    Err(e) => warn!("failed to decode remote tool catalog: {e}"),
                }
            }
        }

        for tool in local_tools {
            if remote_names.contains(&tool.function.name) {
                warn!(
                    "local tool '{}' is shadowed by a remote tool of the same name",
                    tool.function.name
                );
                continue;
            }
            merged.push(tool);
        }

        match serde_json::to_vec(&merged) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to serialize merged tool catalog: {e}");
                local_serialized
            }
        }
    }

    /// Whether `name` is owned by the remote server. Consults a fresh
    /// `tools/list`, not the cache; any listing error yields false.
    pub async fn is_tool_from_mcp(&self, name: &str) -> bool {
        let Some(client) = self.client() else {
            return false;
        };
        if !client.is_connected() {
            return false;
        }
        match client.list_tools().await {
            Ok(tools) => tools.iter().any(|tool| tool.name == name),
            Err(e) => {
                warn!("failed to list remote tools: {e}");
                false
            }
        }
    }

    /// Execute a remote tool and render its result to text. Never raises:
    /// connection and call failures come back as error strings.
    pub async fn execute_mcp_tool(&self, call: &FunctionCall) -> String {
        let Some(client) = self.client() else {
            return "Error: MCP client not connected".to_string();
        };
        if !client.is_connected() {
            return "Error: MCP client not connected".to_string();
        }

        match client.call_tool(&call.name, call.arguments.clone()).await {
            Ok(result) if result.is_error => format!(
                "MCP tool {} returned error: {}",
                call.name,
                render_tool_content(&result.content)
            ),
            Ok(result) => render_tool_content(&result.content),
            Err(e) => format!("Error calling MCP tool {}: {e}", call.name),
        }
    }

    /// Execute a locally-registered tool, if one answers to the call's name.
    pub async fn execute_local_tool(&self, call: &FunctionCall) -> Option<String> {
        let executor = self.local_executor(&call.name)?;
        Some(executor.execute(call).await)
    }
}

/// Render result content items to plain text. Text entries are joined with
/// newlines; other kinds render a bracketed placeholder.
#[must_use]
pub fn render_tool_content(content: &[ToolContent]) -> String {
    let mut parts = Vec::with_capacity(content.len());
    for item in content {
        match item {
            ToolContent::Text { text } => parts.push(text.clone()),
            ToolContent::Image { mime_type, .. } => parts.push(format!("[image: {mime_type}]")),
            ToolContent::Resource { uri, text, .. } => match text {
                Some(text) => parts.push(text.clone()),
                None => parts.push(format!("[resource: {uri}]")),
            },
        }
    }
    parts.join("\n")
}

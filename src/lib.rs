//! opsagent - an LLM-driven operations agent library.
//!
//! A language model invokes external tools (shell commands, a discoverable
//! remote toolset) and reasons over their results in multi-turn fashion.
//! The crate provides:
//!
//! - An MCP client ([`mcp`]) speaking JSON-RPC 2.0 tool discovery and
//!   invocation over stdio, HTTP, or WebSocket transports
//! - A merged tool catalog ([`mcp::McpToolRegistry`]) routing calls between
//!   remote and local backends, remote taking priority on name collisions
//! - The agentic orchestration loop ([`agent`]): one turn's tool calls run
//!   as a batch, their results feed back as a single synthetic follow-up
//!   turn, and recursion is bounded to one extra round trip
//! - A confirmation state machine for model recommendations awaiting an
//!   explicit y/n before execution
//! - Vendor chat adapters ([`providers`]) for llama.cpp, Ollama, and Gemini
//!   sharing one [`ChatClient`] contract
//!
//! # Example
//!
//! ```ignore
//! use opsagent::{config, profiles, providers, Session};
//! use opsagent::mcp::{McpClient, McpConfig, McpToolRegistry};
//! use std::sync::Arc;
//!
//! let client = McpClient::new(McpConfig::http("http://localhost:8080/mcp"));
//! client.connect().await?;
//!
//! let registry = Arc::new(McpToolRegistry::new());
//! registry.set_client(Some(client));
//!
//! let mut session = Session::new(
//!     "qwen2.5:1.5b",
//!     profiles::load_profile("default")?,
//!     registry.get_all_tools(),
//!     false,
//!     config::default_config(),
//! );
//! session.set_registry(Some(registry));
//!
//! let chat = providers::get_provider("ollama")?;
//! chat.generate_chat("how many pods are running?", &mut session).await?;
//! ```

#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod profiles;
pub mod providers;
pub mod session;
pub mod tools;

pub use agent::{
    check_for_recommendations, extract_recommendation, handle_confirmation, process_tool_calls,
    record_assistant_turn, ConfirmationOutcome,
};
pub use llm::ChatClient;
pub use mcp::{ConnectionState, McpClient, McpConfig, McpError, McpToolRegistry, TransportKind};
pub use session::{
    HistoryEntry, PendingAction, PendingActionKind, Role, Session, SessionState,
};
pub use tools::{FunctionCall, ShellTool, Tool, ToolExecutor, ToolFunction};

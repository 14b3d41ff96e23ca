//! Ollama adapter (native `/api/chat` REST interface).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{parse_tool_arguments, session_tools};
use crate::agent;
use crate::llm::ChatClient;
use crate::session::{Role, Session};
use crate::tools::{FunctionCall, Tool};

/// Environment variable naming the Ollama host.
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

/// Host used when `OLLAMA_HOST` is unset.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// A small default model suited to local tool-calling experiments.
pub const DEFAULT_MODEL: &str = "qwen2.5:1.5b";

const CHAT_PATH: &str = "api/chat";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Adapter for a local or remote Ollama server.
pub struct OllamaProvider {
    endpoint: Url,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Build the adapter from `OLLAMA_HOST`, falling back to the default
    /// local host.
    #[must_use]
    pub fn from_env() -> Self {
        let raw = std::env::var(OLLAMA_HOST_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let base = Url::parse(&raw)
            .unwrap_or_else(|_| Url::parse(DEFAULT_HOST).expect("default host URL"));
        Self::new(base)
    }

    /// Build the adapter for an explicit base URL.
    #[must_use]
    pub fn new(mut base: Url) -> Self {
        base.set_path(CHAT_PATH);
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: base,
            client,
        }
    }
}

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    message: ApiResponseMessage,
    #[serde(default)]
    #[allow(dead_code)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    function: ApiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[async_trait]
impl ChatClient for OllamaProvider {
    async fn generate_chat(&self, input: &str, session: &mut Session) -> Result<()> {
        if session.history().is_empty() {
            session.update_context();
        }
        session.push(Role::User, input);

        let tools = session_tools(session);
        let messages: Vec<ApiMessage> = session
            .history()
            .iter()
            .map(|entry| ApiMessage {
                role: entry.role.as_str().to_string(),
                content: entry.content.clone(),
            })
            .collect();

        let request = ApiChatRequest {
            model: &session.model,
            messages: &messages,
            stream: false,
            tools: tools.as_deref(),
        };

        debug!(
            "ollama request endpoint={} model={} num_messages={} num_tools={}",
            self.endpoint,
            session.model,
            messages.len(),
            tools.as_ref().map_or(0, Vec::len)
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .context("ollama request failed")?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("failed to read ollama response body")?;
        if !status.is_success() {
            bail!(
                "ollama returned status {status}: {}",
                String::from_utf8_lossy(&body)
            );
        }

        let chat: ApiChatResponse =
            serde_json::from_slice(&body).context("failed to parse ollama response")?;

        let text = chat.message.content;
        let mut calls = Vec::with_capacity(chat.message.tool_calls.len());
        for tool_call in chat.message.tool_calls {
            let arguments =
                parse_tool_arguments(&tool_call.function.name, tool_call.function.arguments)?;
            calls.push(FunctionCall::new(tool_call.function.name, arguments));
        }

        agent::record_assistant_turn(session, &text, !calls.is_empty());
        agent::check_for_recommendations(session, &text);
        agent::process_tool_calls(self, session, calls).await
    }
}

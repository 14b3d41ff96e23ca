//! llama.cpp server adapter (OpenAI-compatible chat completions API).

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

/// Environment variable naming the llama.cpp server base URL.
pub const LLAMA_HOST_ENV: &str = "LLAMA_HOST";

const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Adapter for a llama.cpp server's OpenAI-compatible endpoint.
pub struct LlamaCppProvider {
    endpoint: Url,
    client: reqwest::Client,
}

impl LlamaCppProvider {
    /// Build the adapter from the `LLAMA_HOST` environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or not a valid URL.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(LLAMA_HOST_ENV)
            .with_context(|| format!("{LLAMA_HOST_ENV} environment variable is not set"))?;
        let base = Url::parse(&raw).with_context(|| format!("malformed {LLAMA_HOST_ENV} URL"))?;
        Ok(Self::new(base))
    }

    /// Build the adapter for an explicit base URL.
    #[must_use]
    pub fn new(mut base: Url) -> Self {
        base.set_path(CHAT_COMPLETIONS_PATH);
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
struct ApiChatCompletion {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
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
    /// Object from llama.cpp; some OpenAI-compatible servers send a
    /// JSON-encoded string instead.
    #[serde(default)]
    arguments: Value,
}

#[async_trait]
impl ChatClient for LlamaCppProvider {
    async fn generate_chat(&self, input: &str, session: &mut Session) -> Result<()> {
        // First message: seed the history with the profile.
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
            "llamacpp request endpoint={} model={} num_messages={} num_tools={}",
            self.endpoint,
            session.model,
            messages.len(),
            tools.as_ref().map_or(0, Vec::len)
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .context("llamacpp request failed")?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("failed to read llamacpp response body")?;
        if !status.is_success() {
            bail!(
                "llamacpp returned status {status}: {}",
                String::from_utf8_lossy(&body)
            );
        }
        if body.is_empty() {
            bail!("empty response from llamacpp server");
        }

        let completion: ApiChatCompletion =
            serde_json::from_slice(&body).context("failed to parse llamacpp response")?;

        let Some(choice) = completion.choices.into_iter().next() else {
            agent::record_assistant_turn(session, "", false);
            return Ok(());
        };

        let text = choice.message.content;
        let mut calls = Vec::with_capacity(choice.message.tool_calls.len());
        for tool_call in choice.message.tool_calls {
            let arguments =
                parse_tool_arguments(&tool_call.function.name, tool_call.function.arguments)?;
            calls.push(FunctionCall::new(tool_call.function.name, arguments));
        }

        agent::record_assistant_turn(session, &text, !calls.is_empty());
        agent::check_for_recommendations(session, &text);
        agent::process_tool_calls(self, session, calls).await
    }
}

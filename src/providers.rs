//! LLM vendor adapters.
//!
//! Each adapter implements [`ChatClient`](crate::llm::ChatClient) for one
//! wire format and delegates tool execution to the shared orchestration
//! loop in [`crate::agent`]. Adapters differ only in encoding; none of them
//! interprets tool results.

pub mod gemini;
pub mod llamacpp;
pub mod ollama;

pub use gemini::GeminiProvider;
pub use llamacpp::LlamaCppProvider;
pub use ollama::OllamaProvider;

use anyhow::{bail, Result};
use log::warn;
use serde_json::{Map, Value};

use crate::llm::ChatClient;
use crate::session::Session;
use crate::tools::Tool;

/// Provider id for the llama.cpp server adapter.
pub const LLAMACPP_PROVIDER: &str = "llamacpp";
/// Provider id for the Ollama adapter.
pub const OLLAMA_PROVIDER: &str = "ollama";
/// Provider id for the Gemini adapter.
pub const GEMINI_PROVIDER: &str = "gemini";

/// Construct the adapter registered under `id`.
///
/// # Errors
///
/// Returns an error for unknown ids or when the adapter's environment
/// (endpoint/API key variables) is incomplete.
pub fn get_provider(id: &str) -> Result<Box<dyn ChatClient>> {
    match id {
        LLAMACPP_PROVIDER => Ok(Box::new(LlamaCppProvider::from_env()?)),
        OLLAMA_PROVIDER => Ok(Box::new(OllamaProvider::from_env())),
        GEMINI_PROVIDER => Ok(Box::new(GeminiProvider::from_env()?)),
        other => bail!(
            "unknown LLM provider '{other}' (available: {LLAMACPP_PROVIDER}, {OLLAMA_PROVIDER}, {GEMINI_PROVIDER})"
        ),
    }
}

/// Tool declarations for the next request, or `None` while the
/// collective-processing guard is set: the nested follow-up turn must not
/// be able to request further tool calls.
pub(crate) fn session_tools(session: &Session) -> Option<Vec<Tool>> {
    if session.is_processing_collective() {
        return None;
    }
    if session.tools.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Vec<Tool>>(&session.tools) {
        Ok(tools) if !tools.is_empty() => Some(tools),
        Ok(_) => None,
        Err(e) => {
            warn!("failed to decode session tool catalog: {e}");
            None
        }
    }
}

/// Normalize a wire-format arguments value into the call's argument map.
/// Accepts an object, a JSON-encoded object string, or null.
pub(crate) fn parse_tool_arguments(name: &str, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => bail!("arguments for tool '{name}' are not an object: {other}"),
            Err(e) => bail!("arguments for tool '{name}' are not valid JSON: {e}"),
        },
        Value::Null => Ok(Map::new()),
        other => bail!("arguments for tool '{name}' are not an object: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with_tools(tools: Vec<u8>) -> Session {
        Session::new(
            "test-model",
            "profile",
            tools,
            false,
            crate::config::default_config(),
        )
    }

    #[test]
    fn test_session_tools_omitted_during_collective_round() {
        let catalog = br#"[{"type":"function","function":{"name":"echo"}}]"#.to_vec();
        let mut session = session_with_tools(catalog);

        assert!(session_tools(&session).is_some());
        session.begin_collective();
        assert!(session_tools(&session).is_none());
        session.end_collective();
        assert!(session_tools(&session).is_some());
    }

    #[test]
    fn test_session_tools_empty_catalog() {
        let session = session_with_tools(Vec::new());
        assert!(session_tools(&session).is_none());

        let session = session_with_tools(b"[]".to_vec());
        assert!(session_tools(&session).is_none());
    }

    #[test]
    fn test_parse_tool_arguments_shapes() {
        let map = parse_tool_arguments("t", json!({"a": 1})).expect("object");
        assert_eq!(map["a"], json!(1));

        let map = parse_tool_arguments("t", json!("{\"a\":2}")).expect("string");
        assert_eq!(map["a"], json!(2));

        assert!(parse_tool_arguments("t", json!(null)).expect("null").is_empty());
        assert!(parse_tool_arguments("t", json!([1])).is_err());
        assert!(parse_tool_arguments("t", json!("not json")).is_err());
    }

    #[test]
    fn test_get_provider_unknown_id() {
        assert!(get_provider("mystery").is_err());
    }
}

//! Gemini adapter (`generateContent` REST interface).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::session_tools;
use crate::agent;
use crate::llm::ChatClient;
use crate::session::{Role, Session};
use crate::tools::{FunctionCall, Tool};

/// Environment variable holding the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Model used unless the session specifies another.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Adapter for the Gemini `generateContent` API.
pub struct GeminiProvider {
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Build the adapter from the `GEMINI_API_KEY` environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(GEMINI_API_KEY_ENV)
            .with_context(|| format!("{GEMINI_API_KEY_ENV} environment variable is not set"))?;
        Ok(Self::new(api_key))
    }

    /// Build the adapter for an explicit API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.into(),
            client,
        }
    }

    fn model_for(session: &Session) -> &str {
        if session.model.is_empty() {
            DEFAULT_MODEL
        } else {
            &session.model
        }
    }
}

#[derive(Serialize)]
struct ApiGenerateRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiToolDeclarations>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(
        default,
        rename = "functionCall",
        skip_serializing_if = "Option::is_none"
    )]
    function_call: Option<ApiFunctionCall>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Serialize)]
struct ApiToolDeclarations {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<ApiFunctionDeclaration>,
}

#[derive(Serialize)]
struct ApiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<ApiSchema>,
}

#[derive(Serialize)]
struct ApiSchema {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, ApiPropertySchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    required: Vec<String>,
}

#[derive(Serialize)]
struct ApiPropertySchema {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    enum_values: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
}

/// Gemini role names: assistant turns are "model"; there is no system role,
/// so profile turns are sent as user content.
fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    }
}

/// Gemini schema type names are uppercase.
fn gemini_type(kind: &str) -> String {
    match kind {
        "integer" => "INTEGER",
        "number" => "NUMBER",
        "boolean" => "BOOLEAN",
        "array" => "ARRAY",
        "object" => "OBJECT",
        _ => "STRING",
    }
    .to_string()
}

/// Convert catalog entries into Gemini function declarations.
fn to_function_declarations(tools: &[Tool]) -> Vec<ApiFunctionDeclaration> {
    tools
        .iter()
        .map(|tool| {
            let parameters = tool.function.parameters.as_ref().map(|params| ApiSchema {
                kind: "OBJECT".to_string(),
                properties: params
                    .properties
                    .iter()
                    .map(|(name, property)| {
                        (
                            name.clone(),
                            ApiPropertySchema {
                                kind: gemini_type(&property.kind),
                                description: property.description.clone(),
                                enum_values: property.enum_values.clone(),
                            },
                        )
                    })
                    .collect(),
                required: params.required.clone(),
            });
            ApiFunctionDeclaration {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                parameters,
            }
        })
        .collect()
}

#[async_trait]
impl ChatClient for GeminiProvider {
    async fn generate_chat(&self, input: &str, session: &mut Session) -> Result<()> {
        if session.history().is_empty() {
            session.update_context();
        }
        session.push(Role::User, input);

        let tools = session_tools(session).map(|tools| {
            vec![ApiToolDeclarations {
                function_declarations: to_function_declarations(&tools),
            }]
        });

        let contents: Vec<ApiContent> = session
            .history()
            .iter()
            .map(|entry| ApiContent {
                role: gemini_role(entry.role).to_string(),
                parts: vec![ApiPart {
                    text: Some(entry.content.clone()),
                    function_call: None,
                }],
            })
            .collect();

        let model = Self::model_for(session);
        let request = ApiGenerateRequest { contents, tools };
        let endpoint = format!("{API_BASE_URL}/models/{model}:generateContent");

        debug!(
            "gemini request model={} num_contents={}",
            model,
            request.contents.len()
        );

        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("gemini request failed")?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("failed to read gemini response body")?;
        if !status.is_success() {
            bail!(
                "gemini returned status {status}: {}",
                String::from_utf8_lossy(&body)
            );
        }

        let generated: ApiGenerateResponse =
            serde_json::from_slice(&body).context("failed to parse gemini response")?;

        let mut text = String::new();
        let mut calls = Vec::new();
        if let Some(content) = generated
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
        {
            for part in content.parts {
                if let Some(part_text) = part.text {
                    text.push_str(&part_text);
                }
                if let Some(function_call) = part.function_call {
                    calls.push(FunctionCall::new(function_call.name, function_call.args));
                }
            }
        }

        agent::record_assistant_turn(session, &text, !calls.is_empty());
        agent::check_for_recommendations(session, &text);
        agent::process_tool_calls(self, session, calls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Parameters, Property, ToolFunction};

    #[test]
    fn test_gemini_role_mapping() {
        assert_eq!(gemini_role(Role::User), "user");
        assert_eq!(gemini_role(Role::System), "user");
        assert_eq!(gemini_role(Role::Assistant), "model");
    }

    #[test]
    fn test_function_declaration_conversion() {
        let tool = Tool::function(ToolFunction {
            name: "scale".to_string(),
            description: "Scale a deployment".to_string(),
            parameters: Some(Parameters {
                kind: "object".to_string(),
                required: vec!["replicas".to_string()],
                properties: BTreeMap::from([
                    (
                        "replicas".to_string(),
                        Property {
                            kind: "integer".to_string(),
                            description: "Target replica count".to_string(),
                            enum_values: Vec::new(),
                        },
                    ),
                    (
                        "direction".to_string(),
                        Property {
                            kind: "string".to_string(),
                            description: String::new(),
                            enum_values: vec!["up".to_string(), "down".to_string()],
                        },
                    ),
                ]),
            }),
        });

        let declarations = to_function_declarations(&[tool]);
        let json = serde_json::to_value(&declarations[0]).expect("serialize");

        assert_eq!(json["name"], "scale");
        assert_eq!(json["parameters"]["type"], "OBJECT");
        assert_eq!(
            json["parameters"]["properties"]["replicas"]["type"],
            "INTEGER"
        );
        assert_eq!(
            json["parameters"]["properties"]["direction"]["enum"],
            serde_json::json!(["up", "down"])
        );
    }

    #[test]
    fn test_response_parsing_mixed_parts() {
        let response: ApiGenerateResponse = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "Looking at the cluster."},
                            {"functionCall": {"name": "get_pods", "args": {"namespace": "default"}}}
                        ]
                    }
                }]
            }"#,
        )
        .expect("parse");

        let content = response.candidates[0].content.as_ref().expect("content");
        assert_eq!(content.parts.len(), 2);
        assert_eq!(
            content.parts[0].text.as_deref(),
            Some("Looking at the cluster.")
        );
        assert_eq!(
            content.parts[1]
                .function_call
                .as_ref()
                .map(|f| f.name.as_str()),
            Some("get_pods")
        );
    }

    #[test]
    fn test_response_parsing_empty_candidates() {
        let response: ApiGenerateResponse = serde_json::from_str("{}").expect("parse");
        assert!(response.candidates.is_empty());
    }
}

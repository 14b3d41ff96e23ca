//! Agentic orchestration loop.
//!
//! Turns one LLM turn's extracted tool-call requests into a terminating,
//! priority-resolved batch of executions whose combined results feed back
//! into the conversation as a single synthetic follow-up turn. Also runs
//! the confirmation state machine for recommendations parsed out of
//! free-text model output.

use anyhow::Result;
use log::{debug, warn};
use serde_json::Value;

use crate::config;
use crate::llm::ChatClient;
use crate::session::{PendingAction, Role, Session, SessionState};
use crate::tools::{render_collective_exec, FunctionCall};

/// Filler appended when a turn carries neither text nor tool calls.
const EMPTY_TURN_ACK: &str = "Acknowledged. The model returned an empty turn.";

/// Append the turn's plain-text content to the history, or a filler
/// acknowledgment if the turn carried neither text nor tool calls.
pub fn record_assistant_turn(session: &mut Session, text: &str, has_calls: bool) {
    if !text.trim().is_empty() {
        session.push(Role::Assistant, text);
    } else if !has_calls {
        session.push(Role::Assistant, EMPTY_TURN_ACK);
    }
}

/// Extract the recommendation from a structurally delimited
/// "Recommendations" section: bounded by its heading marker and the next
/// heading marker or end of text. A case-insensitive "none" or an empty
/// section yields nothing.
#[must_use]
pub fn extract_recommendation(text: &str) -> Option<String> {
    let mut in_section = false;
    let mut collected: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            if in_section {
                break;
            }
            let title = trimmed.trim_start_matches('#').trim();
            if title.eq_ignore_ascii_case("recommendations") {
                in_section = true;
            }
            continue;
        }
        if in_section && !trimmed.is_empty() {
            collected.push(trimmed);
        }
    }

    if !in_section {
        return None;
    }
    let joined = collected.join("\n").trim().to_string();
    if joined.is_empty() || joined.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(joined)
}

/// Scan an assistant turn for a recommendation. If one is found and no
/// pending action is already outstanding, stash it and move the session to
/// [`SessionState::AwaitingConfirmation`]. Returns the recommendation for
/// the caller to display.
pub fn check_for_recommendations(session: &mut Session, text: &str) -> Option<String> {
    let recommendation = extract_recommendation(text)?;
    if session.pending_action().is_some() {
        debug!("a pending action is already outstanding; ignoring new recommendation");
        return None;
    }
    session.set_pending_action(PendingAction::recommendation(&recommendation));
    session.set_state(SessionState::AwaitingConfirmation);
    Some(recommendation)
}

/// How a confirmation input was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// No pending action existed; state reset to Normal.
    NothingPending,
    /// The recommendation was executed.
    Executed,
    /// The recommendation was cancelled without executing.
    Cancelled,
    /// Input was not recognized; state and pending action are unchanged,
    /// re-prompt the user.
    Unrecognized,
}

/// Resolve a pending recommendation with the user's input.
///
/// `y`/`yes` replays the stashed recommendation through the chat entry
/// point as a new user turn; `n`/`no` cancels; anything else leaves the
/// session untouched so the caller re-prompts.
///
/// # Errors
///
/// Returns an error if the replayed chat generation fails. The pending
/// action is cleared and the state reset to Normal regardless.
pub async fn handle_confirmation(
    client: &dyn ChatClient,
    session: &mut Session,
    input: &str,
) -> Result<ConfirmationOutcome> {
    if session.pending_action().is_none() {
        session.set_state(SessionState::Normal);
        return Ok(ConfirmationOutcome::NothingPending);
    }

    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => {
            let Some(action) = session.take_pending_action() else {
                session.set_state(SessionState::Normal);
                return Ok(ConfirmationOutcome::NothingPending);
            };
            let prompt = action
                .recommendation_text()
                .unwrap_or(&action.description)
                .to_string();

            session.set_state(SessionState::Executing);
            let outcome = client.generate_chat(&prompt, session).await;
            session.set_state(SessionState::Normal);
            outcome?;
            Ok(ConfirmationOutcome::Executed)
        }
        "n" | "no" => {
            session.clear_pending_action();
            session.set_state(SessionState::Normal);
            Ok(ConfirmationOutcome::Cancelled)
        }
        _ => Ok(ConfirmationOutcome::Unrecognized),
    }
}

/// Execute one turn's batch of tool calls and feed the combined results
/// back into the conversation as a single synthetic follow-up turn.
///
/// Ownership resolution per call: remote tools (per a fresh registry
/// listing) run through the MCP registry with the configured namespace
/// forced onto their arguments; locally-registered executors run next; a
/// missing registry or an unknown name becomes an informational result
/// string. A single tool's failure never aborts the batch.
///
/// The session's collective-processing guard is set for exactly the one
/// nested `generate_chat` call; while it is set, adapters omit tool
/// declarations, and any calls a misbehaving backend still produces are
/// dropped here. Recursion is bounded to one extra round trip per batch.
///
/// # Errors
///
/// Returns an error if the nested chat generation fails.
pub async fn process_tool_calls(
    client: &dyn ChatClient,
    session: &mut Session,
    calls: Vec<FunctionCall>,
) -> Result<()> {
    if calls.is_empty() {
        return Ok(());
    }
    if session.is_processing_collective() {
        warn!(
            "dropping {} tool call(s) requested during a collective round",
            calls.len()
        );
        return Ok(());
    }

    let namespace = session
        .config_value(config::NAMESPACE)
        .unwrap_or(config::DEFAULT_NAMESPACE)
        .to_string();
    let registry = session.registry();

    let mut completed = Vec::with_capacity(calls.len());
    for mut call in calls {
        let result = match &registry {
            Some(registry) => {
                if registry.is_tool_from_mcp(&call.name).await {
                    // The locally configured namespace always replaces
                    // whatever the model supplied for that key.
                    call.arguments.insert(
                        config::NAMESPACE.to_string(),
                        Value::String(namespace.clone()),
                    );
                    registry.execute_mcp_tool(&call).await
                } else if let Some(output) = registry.execute_local_tool(&call).await {
                    output
                } else {
                    format!("Tool '{}' is not available", call.name)
                }
            }
            None => format!("Tool '{}' cannot run: no tool registry is connected", call.name),
        };

        if session.debug {
            debug!("tool call {} -> {}", call.name, result);
        }
        call.result = result;
        completed.push(call);
    }

    let prompt = render_collective_exec(&completed);
    session.begin_collective();
    let outcome = client.generate_chat(&prompt, session).await;
    session.end_collective();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::testing::{catalog_responder, MockTransport};
    use crate::mcp::{McpClient, McpConfig, McpToolRegistry};
    use crate::session::SessionState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    fn test_session() -> Session {
        Session::new(
            "test-model",
            "profile",
            Vec::new(),
            false,
            crate::config::default_config(),
        )
    }

    fn call_with(name: &str, args: serde_json::Value) -> FunctionCall {
        FunctionCall::from_value(name, args).expect("call")
    }

    /// Records every generate_chat invocation and the guard state it
    /// observed.
    #[derive(Default)]
    struct RecordingClient {
        inputs: StdMutex<Vec<String>>,
        guard_states: StdMutex<Vec<bool>>,
    }

    impl RecordingClient {
        fn inputs(&self) -> Vec<String> {
            self.inputs.lock().expect("inputs lock").clone()
        }

        fn guard_states(&self) -> Vec<bool> {
            self.guard_states.lock().expect("guard lock").clone()
        }
    }

    #[async_trait]
    impl ChatClient for RecordingClient {
        async fn generate_chat(&self, input: &str, session: &mut Session) -> Result<()> {
            self.inputs.lock().expect("inputs lock").push(input.to_string());
            self.guard_states
                .lock()
                .expect("guard lock")
                .push(session.is_processing_collective());
            Ok(())
        }
    }

    /// On its first turn, requests one more tool call, the way a
    /// misbehaving backend would during a collective round.
    #[derive(Default)]
    struct ReentrantClient {
        turns: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for ReentrantClient {
        async fn generate_chat(&self, _input: &str, session: &mut Session) -> Result<()> {
            if self.turns.fetch_add(1, Ordering::SeqCst) == 0 {
                let call = call_with("again", json!({}));
                process_tool_calls(self, session, vec![call]).await?;
            }
            Ok(())
        }
    }

    // ===================
    // Recommendation Parsing Tests
    // ===================

    #[test]
    fn test_extract_recommendation_bounded_by_next_heading() {
        let text = "Investigation done.\n\n## Recommendations\nScale down deployment X\n\n## Next\nmore text";
        assert_eq!(
            extract_recommendation(text),
            Some("Scale down deployment X".to_string())
        );
    }

    #[test]
    fn test_extract_recommendation_runs_to_end_of_text() {
        let text = "## Recommendations\nRestart the ingress controller";
        assert_eq!(
            extract_recommendation(text),
            Some("Restart the ingress controller".to_string())
        );
    }

    #[test]
    fn test_extract_recommendation_none_literal() {
        for literal in ["None", "none", "NONE"] {
            let text = format!("## Recommendations\n{literal}\n");
            assert_eq!(extract_recommendation(&text), None);
        }
    }

    #[test]
    fn test_extract_recommendation_empty_section() {
        assert_eq!(extract_recommendation("## Recommendations\n\n"), None);
        assert_eq!(extract_recommendation("no headings at all"), None);
    }

    #[test]
    fn test_extract_recommendation_joins_multiple_lines() {
        let text = "## Recommendations\nfirst step\nsecond step\n## Done";
        assert_eq!(
            extract_recommendation(text),
            Some("first step\nsecond step".to_string())
        );
    }

    #[test]
    fn test_check_for_recommendations_sets_pending() {
        let mut session = test_session();
        let found =
            check_for_recommendations(&mut session, "## Recommendations\nScale down deployment X");

        assert_eq!(found, Some("Scale down deployment X".to_string()));
        assert_eq!(session.state(), SessionState::AwaitingConfirmation);
        assert_eq!(
            session.pending_action().and_then(|a| a.recommendation_text()),
            Some("Scale down deployment X")
        );
    }

    #[test]
    fn test_check_keeps_single_pending_action() {
        let mut session = test_session();
        check_for_recommendations(&mut session, "## Recommendations\nfirst");
        let second = check_for_recommendations(&mut session, "## Recommendations\nsecond");

        assert_eq!(second, None);
        assert_eq!(
            session.pending_action().and_then(|a| a.recommendation_text()),
            Some("first")
        );
    }

    // ===================
    // Confirmation Flow Tests
    // ===================

    #[tokio::test]
    async fn test_confirmation_with_nothing_pending() {
        let client = RecordingClient::default();
        let mut session = test_session();
        session.set_state(SessionState::AwaitingConfirmation);

        let outcome = handle_confirmation(&client, &mut session, "y")
            .await
            .expect("confirm");

        assert_eq!(outcome, ConfirmationOutcome::NothingPending);
        assert_eq!(session.state(), SessionState::Normal);
        assert!(client.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_unrecognized_input_reprompts() {
        let client = RecordingClient::default();
        let mut session = test_session();
        check_for_recommendations(&mut session, "## Recommendations\nScale down deployment X");

        let outcome = handle_confirmation(&client, &mut session, "maybe")
            .await
            .expect("confirm");

        assert_eq!(outcome, ConfirmationOutcome::Unrecognized);
        assert_eq!(session.state(), SessionState::AwaitingConfirmation);
        assert!(session.pending_action().is_some());
        assert!(client.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_yes_replays_recommendation_once() {
        let client = RecordingClient::default();
        let mut session = test_session();
        check_for_recommendations(&mut session, "## Recommendations\nScale down deployment X");

        let outcome = handle_confirmation(&client, &mut session, " Y ")
            .await
            .expect("confirm");

        assert_eq!(outcome, ConfirmationOutcome::Executed);
        assert_eq!(session.state(), SessionState::Normal);
        assert!(session.pending_action().is_none());
        assert_eq!(client.inputs(), vec!["Scale down deployment X"]);
    }

    #[tokio::test]
    async fn test_confirmation_no_cancels_without_executing() {
        let client = RecordingClient::default();
        let mut session = test_session();
        check_for_recommendations(&mut session, "## Recommendations\nScale down deployment X");

        let outcome = handle_confirmation(&client, &mut session, "no")
            .await
            .expect("confirm");

        assert_eq!(outcome, ConfirmationOutcome::Cancelled);
        assert_eq!(session.state(), SessionState::Normal);
        assert!(session.pending_action().is_none());
        assert!(client.inputs().is_empty());
    }

    // ===================
    // Collective Execution Tests
    // ===================

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let client = RecordingClient::default();
        let mut session = test_session();

        process_tool_calls(&client, &mut session, Vec::new())
            .await
            .expect("process");

        assert!(client.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_missing_registry_reports_not_connected() {
        let client = RecordingClient::default();
        let mut session = test_session();
        let call = call_with("get_pods", json!({}));

        process_tool_calls(&client, &mut session, vec![call])
            .await
            .expect("process");

        let inputs = client.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].contains("Tool 'get_pods' cannot run: no tool registry is connected"));
        // The one nested call ran under the guard; it is clear afterwards.
        assert_eq!(client.guard_states(), vec![true]);
        assert!(!session.is_processing_collective());
    }

    #[tokio::test]
    async fn test_guard_bounds_recursion_to_depth_one() {
        let client = ReentrantClient::default();
        let mut session = test_session();
        let call = call_with("first", json!({}));

        process_tool_calls(&client, &mut session, vec![call])
            .await
            .expect("process");

        // One nested generate_chat for the original batch; the call it
        // requested during the collective round was dropped.
        assert_eq!(client.turns.load(Ordering::SeqCst), 1);
        assert!(!session.is_processing_collective());
    }

    #[tokio::test]
    async fn test_record_assistant_turn_filler() {
        let mut session = test_session();
        record_assistant_turn(&mut session, "  ", false);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].content, EMPTY_TURN_ACK);

        let mut session = test_session();
        record_assistant_turn(&mut session, "", true);
        assert!(session.history().is_empty());

        let mut session = test_session();
        record_assistant_turn(&mut session, "hello", true);
        assert_eq!(session.history()[0].content, "hello");
    }

    // ===================
    // Namespace Override Tests
    // ===================

    async fn registry_with_tool(name: &str) -> (Arc<McpToolRegistry>, Arc<MockTransport>) {
        let transport = MockTransport::with_responder({
            let advertised = json!([
                {"name": name, "inputSchema": {"type": "object"}}
            ]);
            move |request| match request.method.as_str() {
                "tools/call" => Some(crate::mcp::testing::result_response(
                    request.request_id().expect("id"),
                    json!({"content": [{"type": "text", "text": "done"}], "isError": false}),
                )),
                _ => catalog_responder(advertised.clone())(request),
            }
        });
        let config =
            McpConfig::stdio(vec!["mock".to_string()]).with_timeout(Duration::from_secs(5));
        let shared: Arc<dyn crate::mcp::Transport> = transport.clone();
        let client = McpClient::with_transport(config, shared);
        client.connect().await.expect("connect");

        let registry = Arc::new(McpToolRegistry::new());
        registry.set_client(Some(client));
        (registry, transport)
    }

    #[tokio::test]
    async fn test_namespace_override_discards_model_value() {
        let (registry, transport) = registry_with_tool("scale_deployment").await;
        let client = RecordingClient::default();

        let mut session = test_session();
        session.set_config(crate::config::NAMESPACE, "prod");
        session.set_registry(Some(registry));

        let call = call_with("scale_deployment", json!({"namespace": "attacker", "replicas": 0}));
        process_tool_calls(&client, &mut session, vec![call])
            .await
            .expect("process");

        let params = transport.last_call_params().expect("tools/call params");
        assert_eq!(params.pointer("/arguments/namespace"), Some(&json!("prod")));
        assert_eq!(params.pointer("/arguments/replicas"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_unknown_tool_reports_not_available() {
        let (registry, _transport) = registry_with_tool("known_tool").await;
        let client = RecordingClient::default();

        let mut session = test_session();
        session.set_registry(Some(registry));

        let call = call_with("mystery", json!({}));
        process_tool_calls(&client, &mut session, vec![call])
            .await
            .expect("process");

        let inputs = client.inputs();
        assert!(inputs[0].contains("Tool 'mystery' is not available"));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let (registry, _transport) = registry_with_tool("known_tool").await;
        let client = RecordingClient::default();

        let mut session = test_session();
        session.set_registry(Some(registry));

        let calls = vec![
            call_with("mystery", json!({})),
            call_with("known_tool", json!({})),
        ];
        process_tool_calls(&client, &mut session, calls)
            .await
            .expect("process");

        let inputs = client.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].contains("2 tool call(s) completed"));
        assert!(inputs[0].contains("Tool 'mystery' is not available"));
        assert!(inputs[0].contains("done"));
    }
}

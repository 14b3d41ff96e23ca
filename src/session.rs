//! Conversation session state.
//!
//! One [`Session`] per conversation, mutated throughout its lifetime and
//! never destroyed explicitly. History is append-only; entries are never
//! mutated or removed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::mcp::McpToolRegistry;

/// Key under which a pending action stashes the recommendation text.
pub const RECOMMENDATION_PARAM: &str = "recommendation";

/// Conversational role of a history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One turn of the conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Session lifecycle relative to user confirmation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Ordinary turn processing.
    #[default]
    Normal,
    /// A recommendation awaits an explicit y/n answer; ordinary turn
    /// processing is blocked until it resolves.
    AwaitingConfirmation,
    /// Transient while a confirmed recommendation replays.
    Executing,
}

/// What kind of operation a pending action performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingActionKind {
    /// Feed the stashed recommendation back as a new user turn.
    ExecuteRecommendation,
}

/// A model-suggested operation awaiting explicit user confirmation.
#[derive(Clone, Debug)]
pub struct PendingAction {
    /// Type tag.
    pub kind: PendingActionKind,
    /// Human-readable description, surfaced to the user.
    pub description: String,
    /// Parameters; holds at least the original recommendation text.
    pub parameters: HashMap<String, String>,
}

impl PendingAction {
    /// A pending action that will replay `recommendation` on confirmation.
    #[must_use]
    pub fn recommendation(recommendation: &str) -> Self {
        Self {
            kind: PendingActionKind::ExecuteRecommendation,
            description: format!("Execute recommended action: {recommendation}"),
            parameters: HashMap::from([(
                RECOMMENDATION_PARAM.to_string(),
                recommendation.to_string(),
            )]),
        }
    }

    /// The stashed recommendation text.
    #[must_use]
    pub fn recommendation_text(&self) -> Option<&str> {
        self.parameters.get(RECOMMENDATION_PARAM).map(String::as_str)
    }
}

/// One conversation: profile, model, history, tool catalog, and the
/// confirmation/collective bookkeeping used by the orchestration loop.
///
/// Sessions are single-threaded; they are not designed for concurrent use
/// from multiple callers.
pub struct Session {
    /// System prompt profile text.
    pub profile: String,
    /// Model identifier passed to the vendor adapter.
    pub model: String,
    /// Print tool call traces.
    pub debug: bool,
    /// Raw serialized tool catalog handed to the adapters.
    pub tools: Vec<u8>,
    history: Vec<HistoryEntry>,
    config: HashMap<String, String>,
    registry: Option<Arc<McpToolRegistry>>,
    state: SessionState,
    pending_action: Option<PendingAction>,
    processing_collective: bool,
    created_at: OffsetDateTime,
}

impl Session {
    /// Create a session for `model` with the given profile, serialized tool
    /// catalog, and configuration.
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        profile: impl Into<String>,
        tools: Vec<u8>,
        debug: bool,
        config: HashMap<String, String>,
    ) -> Self {
        Self {
            profile: profile.into(),
            model: model.into(),
            debug,
            tools,
            history: Vec::new(),
            config,
            registry: None,
            state: SessionState::default(),
            pending_action: None,
            processing_collective: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Conversation so far, in order.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Append one turn.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            role,
            content: content.into(),
        });
    }

    /// Append the profile as a system turn to drive the reasoning.
    pub fn update_context(&mut self) {
        let profile = self.profile.clone();
        self.push(Role::System, profile);
    }

    /// Switch the profile and re-assert it in the history.
    pub fn set_profile(&mut self, profile: impl Into<String>) {
        self.profile = profile.into();
        self.update_context();
    }

    /// Configuration value by key.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Set a configuration value.
    pub fn set_config(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), value.into());
    }

    /// The whole configuration map.
    #[must_use]
    pub fn config(&self) -> &HashMap<String, String> {
        &self.config
    }

    /// Attach or detach the tool registry.
    pub fn set_registry(&mut self, registry: Option<Arc<McpToolRegistry>>) {
        self.registry = registry;
    }

    /// The attached tool registry, if any.
    #[must_use]
    pub fn registry(&self) -> Option<Arc<McpToolRegistry>> {
        self.registry.clone()
    }

    /// Current confirmation state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// The outstanding pending action, if any. At most one exists.
    #[must_use]
    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.pending_action.as_ref()
    }

    pub(crate) fn set_pending_action(&mut self, action: PendingAction) {
        self.pending_action = Some(action);
    }

    pub(crate) fn take_pending_action(&mut self) -> Option<PendingAction> {
        self.pending_action.take()
    }

    pub(crate) fn clear_pending_action(&mut self) {
        self.pending_action = None;
    }

    /// True for exactly the duration of the one nested collective call.
    #[must_use]
    pub fn is_processing_collective(&self) -> bool {
        self.processing_collective
    }

    pub(crate) fn begin_collective(&mut self) {
        self.processing_collective = true;
    }

    pub(crate) fn end_collective(&mut self) {
        self.processing_collective = false;
    }

    /// When this session was created.
    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn test_session() -> Session {
        Session::new(
            "test-model",
            "You are a test assistant.",
            Vec::new(),
            false,
            config::default_config(),
        )
    }

    #[test]
    fn test_history_is_append_only_and_ordered() {
        let mut session = test_session();
        session.push(Role::User, "first");
        session.push(Role::Assistant, "second");
        session.push(Role::User, "third");

        let contents: Vec<&str> = session
            .history()
            .iter()
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(session.history()[1].role, Role::Assistant);
    }

    #[test]
    fn test_update_context_appends_profile() {
        let mut session = test_session();
        session.update_context();

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::System);
        assert_eq!(session.history()[0].content, "You are a test assistant.");
    }

    #[test]
    fn test_set_profile_reasserts_context() {
        let mut session = test_session();
        session.update_context();
        session.set_profile("New profile");

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1].content, "New profile");
    }

    #[test]
    fn test_config_round_trip() {
        let mut session = test_session();
        assert_eq!(session.config_value(config::NAMESPACE), Some("default"));

        session.set_config(config::NAMESPACE, "prod");
        assert_eq!(session.config_value(config::NAMESPACE), Some("prod"));
    }

    #[test]
    fn test_pending_action_holds_recommendation() {
        let action = PendingAction::recommendation("Scale down deployment X");

        assert_eq!(action.kind, PendingActionKind::ExecuteRecommendation);
        assert_eq!(
            action.recommendation_text(),
            Some("Scale down deployment X")
        );
        assert!(action.description.contains("Scale down deployment X"));
    }

    #[test]
    fn test_collective_guard_toggles() {
        let mut session = test_session();
        assert!(!session.is_processing_collective());
        session.begin_collective();
        assert!(session.is_processing_collective());
        session.end_collective();
        assert!(!session.is_processing_collective());
    }

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
        assert_eq!(Role::System.as_str(), "system");
    }
}

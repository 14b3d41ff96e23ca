//! Built-in prompt profiles.
//!
//! A profile is the system prompt seeding a session's reasoning. The
//! recommendation convention matters: the confirmation flow scans assistant
//! turns for a "Recommendations" heading, so every profile instructs the
//! model to emit one.

use anyhow::{bail, Result};

const DEFAULT_PROFILE: &str = "\
You are an operations assistant for cloud infrastructure. You can inspect \
and act on the environment through the tools provided to you.

Guidelines:
- Prefer tools over guessing. If a tool exists for the question, call it.
- Report findings concisely, quoting the relevant tool output.
- End every answer with a section titled '## Recommendations' containing \
either a single concrete next action, or the word 'None'.
- Never take destructive actions yourself; recommend them instead.";

const TROUBLESHOOT_PROFILE: &str = "\
You are a troubleshooting assistant for cloud infrastructure. Work the \
problem methodically: gather evidence with the available tools, state what \
the evidence shows, and only then hypothesize.

Guidelines:
- Start from the reported symptom and narrow down with tool calls.
- Distinguish observations from hypotheses explicitly.
- End every answer with a section titled '## Recommendations' containing \
either a single concrete next action, or the word 'None'.";

/// Names accepted by [`load_profile`].
#[must_use]
pub fn profile_names() -> &'static [&'static str] {
    &["default", "troubleshoot"]
}

/// Load a built-in profile by name.
///
/// # Errors
///
/// Returns an error for unknown profile names.
pub fn load_profile(name: &str) -> Result<String> {
    match name {
        "default" => Ok(DEFAULT_PROFILE.to_string()),
        "troubleshoot" => Ok(TROUBLESHOOT_PROFILE.to_string()),
        other => bail!(
            "unknown profile '{other}' (available: {})",
            profile_names().join(", ")
        ),
    }
}

//! Provider-agnostic chat contract.
//!
//! A [`ChatClient`] generates the next assistant turn given the session's
//! accumulated history and tool catalog, mutates the history, and hands any
//! tool-call requests to the orchestration loop in [`crate::agent`]. Vendor
//! adapters differ only in wire encoding.

use anyhow::Result;
use async_trait::async_trait;

use crate::session::Session;

/// Top-level chat-generation entry point implemented by every vendor
/// adapter.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Generate the next assistant turn for `input`, mutating the session.
    ///
    /// Implementations must omit tool declarations from their request while
    /// [`Session::is_processing_collective`] is set; the orchestration loop
    /// relies on that to bound its recursion.
    ///
    /// # Errors
    ///
    /// Returns an error if the vendor call fails. Tool-level failures are
    /// absorbed into conversational text instead.
    async fn generate_chat(&self, input: &str, session: &mut Session) -> Result<()>;
}

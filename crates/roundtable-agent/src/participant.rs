// ABOUTME: Defines the Participant trait all conversation members implement.
// ABOUTME: Also defines AgentError, the taxonomy of ways a single turn can fail.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use roundtable_core::error::StateError;
use roundtable_core::event::RunEvent;
use roundtable_core::message::ChatMessage;

use crate::client::BackendError;

/// Errors that can occur during a single turn.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The inference backend failed. Not retried; the turn fails with no
    /// partial mutation of any context.
    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),

    /// The backend returned a result shape incompatible with the agent's
    /// declared output contract. A configuration defect, reported distinctly
    /// from runtime backend failures.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The turn was abandoned via its cancellation signal before completing.
    #[error("turn cancelled")]
    Cancelled,

    /// The human-input collaborator failed to supply a response.
    #[error("input collaborator failed: {0}")]
    Input(String),
}

/// A conversation participant: anything able to produce one reply message
/// per turn. Model-backed agents and human proxies both implement this; the
/// team scheduler drives participants through it without knowing which kind
/// it holds.
#[async_trait]
pub trait Participant: Send {
    /// Unique name within a team; used as the source of produced messages.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Produce one reply given the messages this participant has not yet
    /// been shown (possibly none, on a continuation run). Partial output may
    /// be forwarded to `events` while the turn is in flight; those chunks
    /// are cosmetic and only the returned reply is durable. On failure or
    /// cancellation the participant's accumulated context must be exactly as
    /// it was before the turn began.
    async fn take_turn(
        &mut self,
        new_messages: &[ChatMessage],
        events: Option<&mpsc::UnboundedSender<RunEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage, AgentError>;

    /// Clear accumulated context. Never happens implicitly inside take_turn.
    fn reset(&mut self);

    /// Export the state needed to resume identically in a fresh instance.
    /// Participants that accumulate nothing return an empty map.
    fn save_state(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Restore previously exported state, discarding any existing state.
    fn load_state(&mut self, _state: &serde_json::Value) -> Result<(), StateError> {
        Ok(())
    }
}

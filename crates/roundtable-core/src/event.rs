// ABOUTME: Defines the events a team run emits to its observers as it progresses.
// ABOUTME: Messages are durable facts; stream chunks are cosmetic and never persisted.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;
use crate::task::TaskResult;

/// An event observed while a run is in progress. Observers (console
/// rendering, statistics) consume these; nothing they do feeds back into
/// orchestration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A message was appended to the shared conversation.
    Message { message: ChatMessage },
    /// A partial completion chunk from a streaming backend. Display only;
    /// only the final message is ever appended to any context.
    StreamChunk { source: String, text: String },
    /// The run finished; carries the final result.
    Completed { result: TaskResult },
}

// ABOUTME: Human-proxy participant: turns are answered by an injected operator input source.
// ABOUTME: The input source is an external collaborator; console wiring lives in the binary.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use roundtable_core::event::RunEvent;
use roundtable_core::message::ChatMessage;

use crate::participant::{AgentError, Participant};

/// Source of operator-supplied text. Implementations block/suspend until the
/// operator responds (console stdin, a web form, a test queue).
#[async_trait]
pub trait UserInputSource: Send + Sync {
    async fn read_input(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError>;
}

/// A participant whose replies come from a human operator rather than an
/// inference backend. Incoming messages are not accumulated; the operator is
/// assumed to follow the conversation through an observer.
pub struct UserProxyAgent {
    name: String,
    description: String,
    input: Arc<dyn UserInputSource>,
}

impl UserProxyAgent {
    pub fn new(name: impl Into<String>, input: Arc<dyn UserInputSource>) -> Self {
        Self {
            name: name.into(),
            description: "A human user proxied through an input source.".to_string(),
            input,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Participant for UserProxyAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn take_turn(
        &mut self,
        _new_messages: &[ChatMessage],
        _events: Option<&mpsc::UnboundedSender<RunEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage, AgentError> {
        let prompt = "Enter your response: ";

        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            text = self.input.read_input(prompt, cancel) => text?,
        };

        tracing::debug!(agent = %self.name, chars = text.len(), "operator responded");
        Ok(ChatMessage::text(&self.name, text))
    }

    fn reset(&mut self) {
        // Holds no conversational state.
    }
}

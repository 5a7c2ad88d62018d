// ABOUTME: Model-backed participant: updates its context, calls the inference backend, and replies.
// ABOUTME: Commits the received/reply append pair only after the backend result validates.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use roundtable_core::error::StateError;
use roundtable_core::event::RunEvent;
use roundtable_core::message::{ChatMessage, MessageContent};

use crate::client::{ChatClient, CompletionEvent, CompletionRequest, CreateResult, ResponseSchema};
use crate::context::{AgentContext, ContextMessage};
use crate::participant::{AgentError, Participant};

const STATE_KIND: &str = "assistant_agent";

/// A participant that produces replies by calling an inference backend with
/// its accumulated context. One turn appends exactly one pair to the
/// context: the messages it was shown, then its own reply.
pub struct AssistantAgent {
    name: String,
    description: String,
    client: Arc<dyn ChatClient>,
    system_message: Option<String>,
    context: AgentContext,
    schema: Option<ResponseSchema>,
    stream_chunks: bool,
}

/// Serialized form of an assistant's resumable state. The system message is
/// constructor-supplied configuration and is deliberately not captured.
#[derive(Serialize, Deserialize)]
struct AssistantAgentState {
    kind: String,
    context: AgentContext,
}

impl AssistantAgent {
    /// Create an assistant with the default description and system message.
    pub fn new(name: impl Into<String>, client: Arc<dyn ChatClient>) -> Self {
        Self {
            name: name.into(),
            description: "An agent that generates responses using an inference backend."
                .to_string(),
            client,
            system_message: Some("You are a helpful assistant.".to_string()),
            context: AgentContext::new(),
            schema: None,
            stream_chunks: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }

    pub fn without_system_message(mut self) -> Self {
        self.system_message = None;
        self
    }

    /// Declare a structured-output contract. Replies must then be JSON
    /// objects conforming to the schema; anything else is a protocol
    /// violation rather than a silent fallback.
    pub fn with_output_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Forward partial completion chunks to run observers while a turn is in
    /// flight. Chunks are never persisted into the context.
    pub fn with_streaming(mut self, stream_chunks: bool) -> Self {
        self.stream_chunks = stream_chunks;
        self
    }

    /// The model context accumulated so far.
    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    /// Drive a streaming completion, forwarding partial chunks to the event
    /// sink and returning the final result.
    async fn stream_completion(
        &self,
        messages: &[ContextMessage],
        events: &mpsc::UnboundedSender<RunEvent>,
        cancel: &CancellationToken,
    ) -> Result<CreateResult, AgentError> {
        let mut stream = self.client.create_stream(CompletionRequest {
            messages,
            schema: self.schema.as_ref(),
            cancel,
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                next = stream.next() => match next {
                    Some(Ok(CompletionEvent::Partial(text))) => {
                        // Receiver may have been dropped; chunks are best-effort.
                        let _ = events.send(RunEvent::StreamChunk {
                            source: self.name.clone(),
                            text,
                        });
                    }
                    Some(Ok(CompletionEvent::Completed(result))) => return Ok(result),
                    Some(Err(err)) => return Err(AgentError::Backend(err)),
                    None => {
                        return Err(AgentError::Protocol(
                            "completion stream ended without a final result".to_string(),
                        ));
                    }
                },
            }
        }
    }

    /// Enforce the agent's declared output contract on the final result.
    fn validate_result(&self, result: CreateResult) -> Result<CreateResult, AgentError> {
        match (&self.schema, &result.content) {
            (None, MessageContent::Text { .. }) => Ok(result),
            (None, MessageContent::Structured { .. }) => Err(AgentError::Protocol(
                "backend returned structured content but flat text was required".to_string(),
            )),
            (Some(_), MessageContent::Structured { .. }) => Ok(result),
            (Some(schema), MessageContent::Text { text }) => {
                // Some backends deliver structured output as serialized text;
                // it must at least parse as a JSON object to satisfy the
                // declared contract.
                match serde_json::from_str::<serde_json::Value>(text) {
                    Ok(value) if value.is_object() => Ok(CreateResult {
                        content: MessageContent::structured(value),
                        ..result
                    }),
                    _ => Err(AgentError::Protocol(format!(
                        "result does not conform to declared output schema '{}'",
                        schema.name
                    ))),
                }
            }
        }
    }
}

#[async_trait]
impl Participant for AssistantAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn take_turn(
        &mut self,
        new_messages: &[ChatMessage],
        events: Option<&mpsc::UnboundedSender<RunEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage, AgentError> {
        tracing::debug!(
            agent = %self.name,
            new_messages = new_messages.len(),
            "taking turn"
        );

        // Stage incoming messages; they are committed to the context only
        // together with the reply, after the backend call succeeds.
        let staged: Vec<ContextMessage> = new_messages
            .iter()
            .map(ContextMessage::from_chat_message)
            .collect();

        let mut llm_messages =
            Vec::with_capacity(1 + self.context.len() + staged.len());
        if let Some(system_message) = &self.system_message {
            llm_messages.push(ContextMessage::system(system_message.clone()));
        }
        llm_messages.extend_from_slice(self.context.messages());
        llm_messages.extend(staged.iter().cloned());

        let result = if self.stream_chunks && let Some(events) = events {
            self.stream_completion(&llm_messages, events, cancel).await?
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                result = self.client.create(CompletionRequest {
                    messages: &llm_messages,
                    schema: self.schema.as_ref(),
                    cancel,
                }) => result?,
            }
        };

        let result = self.validate_result(result)?;

        // Commit the append pair: received messages, then own reply.
        for message in staged {
            self.context.add_message(message);
        }
        self.context.add_message(ContextMessage::assistant(
            self.name.clone(),
            result.content.clone(),
            result.thought.clone(),
        ));

        let mut reply = ChatMessage::new(&self.name, result.content);
        if let Some(usage) = result.usage {
            reply = reply.with_usage(usage);
        }
        if let Some(thought) = result.thought {
            reply = reply.with_thought(thought);
        }

        tracing::info!(
            agent = %self.name,
            context_len = self.context.len(),
            "turn completed"
        );
        Ok(reply)
    }

    fn reset(&mut self) {
        self.context.clear();
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::to_value(AssistantAgentState {
            kind: STATE_KIND.to_string(),
            context: self.context.clone(),
        })
        .unwrap_or(serde_json::Value::Null)
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), StateError> {
        let state: AssistantAgentState = serde_json::from_value(state.clone())?;
        if state.kind != STATE_KIND {
            return Err(StateError::Mismatch(format!(
                "expected state kind '{STATE_KIND}', got '{}'",
                state.kind
            )));
        }
        self.context = state.context;
        Ok(())
    }
}

// ABOUTME: Test utilities for roundtable-agent: scripted, failing, and never-resolving chat clients.
// ABOUTME: Used in tests to drive teams and agents without real API calls.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use roundtable_core::message::{MessageContent, UsageStats};

use crate::client::{
    BackendError, ChatClient, CompletionEvent, CompletionRequest, CompletionStream, CreateResult,
};
use crate::participant::AgentError;
use crate::user_proxy::UserInputSource;

/// A chat client that returns pre-scripted replies in order.
///
/// Each `create` (or `create_stream`) consumes the next scripted reply; an
/// exhausted script is a backend error so tests fail loudly instead of
/// looping. When a structured-output schema is declared, replies that parse
/// as JSON objects are returned as structured content, mirroring the real
/// providers.
pub struct ScriptedChatClient {
    replies: Mutex<VecDeque<String>>,
    usage: Option<UsageStats>,
    thought: Option<String>,
}

impl ScriptedChatClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            usage: None,
            thought: None,
        }
    }

    /// Attach the same usage accounting to every scripted reply.
    pub fn with_usage(mut self, usage: UsageStats) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach the same auxiliary reasoning text to every scripted reply.
    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    fn next_result(&self, structured: bool) -> Result<CreateResult, BackendError> {
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BackendError::Provider("scripted replies exhausted".to_string()))?;

        let content = if structured
            && let Ok(value) = serde_json::from_str::<serde_json::Value>(&text)
            && value.is_object()
        {
            MessageContent::structured(value)
        } else {
            MessageContent::text(text)
        };

        Ok(CreateResult {
            content,
            usage: self.usage,
            thought: self.thought.clone(),
        })
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn create(&self, request: CompletionRequest<'_>) -> Result<CreateResult, BackendError> {
        self.next_result(request.schema.is_some())
    }

    fn create_stream(&self, request: CompletionRequest<'_>) -> CompletionStream {
        // Split text replies into word chunks so streaming consumers see a
        // realistic partial sequence before the final result.
        match self.next_result(request.schema.is_some()) {
            Ok(result) => {
                let chunks: Vec<CompletionEvent> = match &result.content {
                    MessageContent::Text { text } => text
                        .split_inclusive(' ')
                        .map(|chunk| CompletionEvent::Partial(chunk.to_string()))
                        .collect(),
                    MessageContent::Structured { .. } => Vec::new(),
                };
                let events = chunks
                    .into_iter()
                    .chain(std::iter::once(CompletionEvent::Completed(result)))
                    .map(Ok);
                futures::stream::iter(events).boxed()
            }
            Err(err) => futures::stream::iter([Err(err)]).boxed(),
        }
    }
}

/// A chat client whose calls never resolve. Useful for cancellation tests.
pub struct PendingChatClient;

#[async_trait]
impl ChatClient for PendingChatClient {
    async fn create(&self, _request: CompletionRequest<'_>) -> Result<CreateResult, BackendError> {
        std::future::pending().await
    }

    fn create_stream(&self, _request: CompletionRequest<'_>) -> CompletionStream {
        futures::stream::pending().boxed()
    }
}

/// A chat client that always fails with a provider error.
pub struct FailingChatClient {
    message: String,
}

impl FailingChatClient {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ChatClient for FailingChatClient {
    async fn create(&self, _request: CompletionRequest<'_>) -> Result<CreateResult, BackendError> {
        Err(BackendError::Provider(self.message.clone()))
    }

    fn create_stream(&self, _request: CompletionRequest<'_>) -> CompletionStream {
        futures::stream::iter([Err(BackendError::Provider(self.message.clone()))]).boxed()
    }
}

/// An input source that pops pre-queued operator responses.
pub struct QueuedInput {
    responses: Mutex<VecDeque<String>>,
    block_when_empty: bool,
}

impl QueuedInput {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            block_when_empty: false,
        }
    }

    /// An input source with nothing queued that fails immediately.
    pub fn empty() -> Self {
        Self::new::<[String; 0], String>([])
    }

    /// An input source that never responds, simulating an operator who has
    /// walked away. Pair with a cancellation token.
    pub fn blocking() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            block_when_empty: true,
        }
    }
}

#[async_trait]
impl UserInputSource for QueuedInput {
    async fn read_input(
        &self,
        _prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(text) => Ok(text),
            None if self.block_when_empty => std::future::pending().await,
            None => Err(AgentError::Input("no queued input".to_string())),
        }
    }
}

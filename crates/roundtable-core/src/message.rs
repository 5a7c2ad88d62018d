// ABOUTME: Defines the chat message type exchanged between conversation participants.
// ABOUTME: Supports flat text and structured JSON payloads plus token usage accounting.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Token accounting reported by an inference backend for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl UsageStats {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Accumulate another sample into this one.
    pub fn add(&mut self, other: &UsageStats) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// The body of a message: either flat text, or a JSON value produced by an
/// agent configured with a declared output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Structured { value: serde_json::Value },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self::Structured { value }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }

    /// Canonical text rendering: the literal text, or the serialized JSON of
    /// a structured payload. Marker matching and display both go through this.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text { text } => Cow::Borrowed(text),
            Self::Structured { value } => Cow::Owned(value.to_string()),
        }
    }
}

/// A single message in a conversation between participants. Immutable once
/// created; both the shared team log and per-agent contexts are built from
/// these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: Ulid,
    /// Name of the participant (or "user" for seeded tasks) that produced this.
    pub source: String,
    pub content: MessageContent,
    /// Token accounting for the completion that produced this message, if any.
    pub usage: Option<UsageStats>,
    /// Auxiliary reasoning text the backend attached to the completion, if any.
    pub thought: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a new message with a fresh ULID and current timestamp.
    pub fn new(source: impl Into<String>, content: MessageContent) -> Self {
        Self {
            message_id: Ulid::new(),
            source: source.into(),
            content,
            usage: None,
            thought: None,
            timestamp: Utc::now(),
        }
    }

    /// Convenience constructor for a plain text message.
    pub fn text(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(source, MessageContent::text(text))
    }

    pub fn with_usage(mut self, usage: UsageStats) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }
}

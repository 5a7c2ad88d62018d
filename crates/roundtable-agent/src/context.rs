// ABOUTME: Provides the per-agent model context: the ordered messages an agent has seen and said.
// ABOUTME: Contexts are owned by one agent, append-only, and serialize for snapshots.

use serde::{Deserialize, Serialize};

use roundtable_core::message::{ChatMessage, MessageContent};

/// Role a message plays inside an agent's model context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRole {
    System,
    User,
    Assistant,
}

/// A role-tagged entry in an agent's model context. Entries for messages
/// received from other participants carry the originating source name;
/// assistant entries may carry the backend's auxiliary reasoning text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: MessageContent,
    pub source: Option<String>,
    pub thought: Option<String>,
}

impl ContextMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ContextRole::System,
            content: MessageContent::text(text),
            source: None,
            thought: None,
        }
    }

    pub fn user(source: impl Into<String>, content: MessageContent) -> Self {
        Self {
            role: ContextRole::User,
            content,
            source: Some(source.into()),
            thought: None,
        }
    }

    pub fn assistant(
        source: impl Into<String>,
        content: MessageContent,
        thought: Option<String>,
    ) -> Self {
        Self {
            role: ContextRole::Assistant,
            content,
            source: Some(source.into()),
            thought,
        }
    }

    /// Convert a message received from another participant (or the seeded
    /// task) into the user-role entry an agent's backend will see.
    pub fn from_chat_message(message: &ChatMessage) -> Self {
        Self::user(message.source.clone(), message.content.clone())
    }
}

/// The ordered sequence of messages one agent has accumulated: everything it
/// has been shown plus everything it has said, in order. Not a mirror of the
/// team's shared log; mutated only by the owning agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    messages: Vec<ContextMessage>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&mut self, message: ContextMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every accumulated message. Used by explicit agent resets only.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Serialize this context for inclusion in snapshot data.
    pub fn to_snapshot_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Restore a context from a previously-serialized snapshot value.
    pub fn from_snapshot_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_starts_empty() {
        let ctx = AgentContext::new();
        assert!(ctx.is_empty());
        assert_eq!(ctx.len(), 0);
    }

    #[test]
    fn context_appends_in_order() {
        let mut ctx = AgentContext::new();
        ctx.add_message(ContextMessage::user("user", MessageContent::text("start")));
        ctx.add_message(ContextMessage::assistant(
            "poet",
            MessageContent::text("a poem"),
            None,
        ));

        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.messages()[0].role, ContextRole::User);
        assert_eq!(ctx.messages()[1].role, ContextRole::Assistant);
        assert_eq!(ctx.messages()[1].source.as_deref(), Some("poet"));
    }

    #[test]
    fn context_clear_removes_everything() {
        let mut ctx = AgentContext::new();
        ctx.add_message(ContextMessage::user("user", MessageContent::text("start")));
        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn context_snapshot_round_trip() {
        let mut ctx = AgentContext::new();
        ctx.add_message(ContextMessage::user("user", MessageContent::text("start")));
        ctx.add_message(ContextMessage::assistant(
            "poet",
            MessageContent::text("waves"),
            Some("short and salty".to_string()),
        ));

        let snapshot = ctx.to_snapshot_value();
        assert!(snapshot.is_object());

        let restored = AgentContext::from_snapshot_value(&snapshot).expect("should deserialize");
        assert_eq!(restored, ctx);
        assert_eq!(
            restored.messages()[1].thought.as_deref(),
            Some("short and salty")
        );
    }

    #[test]
    fn from_chat_message_becomes_user_entry() {
        let msg = ChatMessage::text("critic", "needs more imagery");
        let entry = ContextMessage::from_chat_message(&msg);

        assert_eq!(entry.role, ContextRole::User);
        assert_eq!(entry.source.as_deref(), Some("critic"));
        assert_eq!(entry.content.as_text(), "needs more imagery");
    }
}

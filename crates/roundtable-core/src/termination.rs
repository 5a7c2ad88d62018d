// ABOUTME: Composable termination conditions polled by the team after every appended message.
// ABOUTME: Leaf conditions and boolean combinators share one evaluate/reset/save/load capability.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ConfigError, StateError};
use crate::message::ChatMessage;

/// A condition that decides when a run should stop. The team feeds every
/// appended message to the condition, in append order, exactly once each.
/// Internal state (counters, fired flags) persists across evaluations within
/// one run; `reset` clears it for a fresh run.
pub trait TerminationCondition: Send {
    /// Observe one message. Returns true once termination is requested;
    /// conditions stay fired until reset.
    fn evaluate(&mut self, message: &ChatMessage) -> bool;

    /// Clear counters and fired flags so the condition can arm a new run.
    fn reset(&mut self);

    /// Human-readable description used in stop reasons.
    fn description(&self) -> String;

    /// Export internal counters/flags for inclusion in a team snapshot.
    fn save_state(&self) -> serde_json::Value;

    /// Restore internal counters/flags from a snapshot, overwriting the
    /// current state entirely.
    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), StateError>;
}

/// Combine two conditions so that both must fire before the pair fires.
/// Both children observe every message so their internal counters stay
/// correct regardless of which child ultimately causes the stop.
pub fn and(
    left: Box<dyn TerminationCondition>,
    right: Box<dyn TerminationCondition>,
) -> Box<dyn TerminationCondition> {
    Box::new(AndCondition {
        left,
        right,
        left_fired: false,
        right_fired: false,
    })
}

/// Combine two conditions so that either firing fires the pair. Both
/// children observe every message.
pub fn or(
    left: Box<dyn TerminationCondition>,
    right: Box<dyn TerminationCondition>,
) -> Box<dyn TerminationCondition> {
    Box::new(OrCondition {
        left,
        right,
        left_fired: false,
        right_fired: false,
    })
}

/// Fires when a message's text rendering contains a configured marker
/// substring, regardless of which participant produced the message.
#[derive(Debug)]
pub struct TextMention {
    marker: String,
    fired: bool,
}

impl TextMention {
    pub fn new(marker: impl Into<String>) -> Result<Self, ConfigError> {
        let marker = marker.into();
        if marker.is_empty() {
            return Err(ConfigError::EmptyMarker);
        }
        Ok(Self {
            marker,
            fired: false,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct TextMentionState {
    fired: bool,
}

impl TerminationCondition for TextMention {
    fn evaluate(&mut self, message: &ChatMessage) -> bool {
        if !self.fired && message.content.as_text().contains(&self.marker) {
            self.fired = true;
        }
        self.fired
    }

    fn reset(&mut self) {
        self.fired = false;
    }

    fn description(&self) -> String {
        format!("text '{}' mentioned", self.marker)
    }

    fn save_state(&self) -> serde_json::Value {
        json!(TextMentionState { fired: self.fired })
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), StateError> {
        let state: TextMentionState = serde_json::from_value(state.clone())?;
        self.fired = state.fired;
        Ok(())
    }
}

/// Fires after a configured number of messages have been observed, counting
/// every message regardless of source (the seeded task included).
#[derive(Debug)]
pub struct MessageCount {
    limit: usize,
    seen: usize,
}

impl MessageCount {
    pub fn new(limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::ZeroMessageLimit);
        }
        Ok(Self { limit, seen: 0 })
    }
}

#[derive(Serialize, Deserialize)]
struct MessageCountState {
    seen: usize,
}

impl TerminationCondition for MessageCount {
    fn evaluate(&mut self, _message: &ChatMessage) -> bool {
        self.seen += 1;
        self.seen >= self.limit
    }

    fn reset(&mut self) {
        self.seen = 0;
    }

    fn description(&self) -> String {
        format!("maximum number of messages ({}) reached", self.limit)
    }

    fn save_state(&self) -> serde_json::Value {
        json!(MessageCountState { seen: self.seen })
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), StateError> {
        let state: MessageCountState = serde_json::from_value(state.clone())?;
        self.seen = state.seen;
        Ok(())
    }
}

/// Cloneable handle for requesting termination from outside the run loop,
/// independent of message content.
#[derive(Debug, Clone)]
pub struct ExternalTrigger {
    flag: Arc<AtomicBool>,
}

impl ExternalTrigger {
    /// Request termination. The owning condition fires on the next message
    /// it observes.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Fires the first time its external trigger has been set, and stays fired
/// until reset. Reset also clears the trigger.
#[derive(Debug)]
pub struct ExternalTermination {
    flag: Arc<AtomicBool>,
    fired: bool,
}

impl ExternalTermination {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            fired: false,
        }
    }

    /// Hand out a trigger that can be set from any thread.
    pub fn trigger(&self) -> ExternalTrigger {
        ExternalTrigger {
            flag: Arc::clone(&self.flag),
        }
    }
}

impl Default for ExternalTermination {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
struct ExternalTerminationState {
    set: bool,
    fired: bool,
}

impl TerminationCondition for ExternalTermination {
    fn evaluate(&mut self, _message: &ChatMessage) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            self.fired = true;
        }
        self.fired
    }

    fn reset(&mut self) {
        self.fired = false;
        self.flag.store(false, Ordering::SeqCst);
    }

    fn description(&self) -> String {
        "external termination requested".to_string()
    }

    fn save_state(&self) -> serde_json::Value {
        json!(ExternalTerminationState {
            set: self.flag.load(Ordering::SeqCst),
            fired: self.fired,
        })
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), StateError> {
        let state: ExternalTerminationState = serde_json::from_value(state.clone())?;
        self.flag.store(state.set, Ordering::SeqCst);
        self.fired = state.fired;
        Ok(())
    }
}

struct AndCondition {
    left: Box<dyn TerminationCondition>,
    right: Box<dyn TerminationCondition>,
    left_fired: bool,
    right_fired: bool,
}

impl TerminationCondition for AndCondition {
    fn evaluate(&mut self, message: &ChatMessage) -> bool {
        // Evaluate both children unconditionally so their counters observe
        // every message; no short-circuiting.
        let left = self.left.evaluate(message);
        let right = self.right.evaluate(message);
        self.left_fired |= left;
        self.right_fired |= right;
        self.left_fired && self.right_fired
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.left_fired = false;
        self.right_fired = false;
    }

    fn description(&self) -> String {
        format!(
            "{} and {}",
            self.left.description(),
            self.right.description()
        )
    }

    fn save_state(&self) -> serde_json::Value {
        json!({
            "left": self.left.save_state(),
            "right": self.right.save_state(),
            "left_fired": self.left_fired,
            "right_fired": self.right_fired,
        })
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), StateError> {
        let (left, right, left_fired, right_fired) = combinator_state_parts(state)?;
        self.left.load_state(left)?;
        self.right.load_state(right)?;
        self.left_fired = left_fired;
        self.right_fired = right_fired;
        Ok(())
    }
}

struct OrCondition {
    left: Box<dyn TerminationCondition>,
    right: Box<dyn TerminationCondition>,
    left_fired: bool,
    right_fired: bool,
}

impl TerminationCondition for OrCondition {
    fn evaluate(&mut self, message: &ChatMessage) -> bool {
        let left = self.left.evaluate(message);
        let right = self.right.evaluate(message);
        self.left_fired |= left;
        self.right_fired |= right;
        self.left_fired || self.right_fired
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.left_fired = false;
        self.right_fired = false;
    }

    fn description(&self) -> String {
        format!("{} or {}", self.left.description(), self.right.description())
    }

    fn save_state(&self) -> serde_json::Value {
        json!({
            "left": self.left.save_state(),
            "right": self.right.save_state(),
            "left_fired": self.left_fired,
            "right_fired": self.right_fired,
        })
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), StateError> {
        let (left, right, left_fired, right_fired) = combinator_state_parts(state)?;
        self.left.load_state(left)?;
        self.right.load_state(right)?;
        self.left_fired = left_fired;
        self.right_fired = right_fired;
        Ok(())
    }
}

/// Pull the child states and fired flags out of a combinator snapshot.
fn combinator_state_parts(
    state: &serde_json::Value,
) -> Result<(&serde_json::Value, &serde_json::Value, bool, bool), StateError> {
    let obj = state
        .as_object()
        .ok_or_else(|| StateError::Malformed("combinator state must be an object".to_string()))?;
    let left = obj
        .get("left")
        .ok_or_else(|| StateError::Malformed("missing 'left' child state".to_string()))?;
    let right = obj
        .get("right")
        .ok_or_else(|| StateError::Malformed("missing 'right' child state".to_string()))?;
    let left_fired = obj
        .get("left_fired")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| StateError::Malformed("missing 'left_fired' flag".to_string()))?;
    let right_fired = obj
        .get("right_fired")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| StateError::Malformed("missing 'right_fired' flag".to_string()))?;
    Ok((left, right, left_fired, right_fired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContent;

    fn msg(source: &str, text: &str) -> ChatMessage {
        ChatMessage::text(source, text)
    }

    #[test]
    fn text_mention_fires_on_substring_from_any_source() {
        let mut cond = TextMention::new("APPROVE").unwrap();

        assert!(!cond.evaluate(&msg("poet", "here is a poem")));
        assert!(cond.evaluate(&msg("critic", "Looks good. APPROVE")));
        // Stays fired for subsequent messages until reset.
        assert!(cond.evaluate(&msg("poet", "thanks")));

        cond.reset();
        assert!(!cond.evaluate(&msg("poet", "fresh run")));
    }

    #[test]
    fn text_mention_matches_structured_rendering() {
        let mut cond = TextMention::new("APPROVE").unwrap();
        let message = ChatMessage::new(
            "critic",
            MessageContent::structured(serde_json::json!({"verdict": "APPROVE"})),
        );
        assert!(cond.evaluate(&message));
    }

    #[test]
    fn text_mention_rejects_empty_marker() {
        assert_eq!(
            TextMention::new("").unwrap_err(),
            ConfigError::EmptyMarker
        );
    }

    #[test]
    fn message_count_fires_at_limit() {
        let mut cond = MessageCount::new(3).unwrap();

        assert!(!cond.evaluate(&msg("user", "one")));
        assert!(!cond.evaluate(&msg("a", "two")));
        assert!(cond.evaluate(&msg("b", "three")));

        cond.reset();
        assert!(!cond.evaluate(&msg("a", "counts from zero again")));
    }

    #[test]
    fn message_count_rejects_zero_limit() {
        assert_eq!(
            MessageCount::new(0).unwrap_err(),
            ConfigError::ZeroMessageLimit
        );
    }

    #[test]
    fn external_termination_fires_after_trigger() {
        let mut cond = ExternalTermination::new();
        let trigger = cond.trigger();

        assert!(!cond.evaluate(&msg("poet", "working")));

        trigger.set();
        assert!(trigger.is_set());
        assert!(cond.evaluate(&msg("poet", "still working")));
        // Stays fired regardless of later messages.
        assert!(cond.evaluate(&msg("critic", "unrelated")));

        cond.reset();
        assert!(!trigger.is_set(), "reset should clear the trigger");
        assert!(!cond.evaluate(&msg("poet", "new run")));
    }

    #[test]
    fn or_fires_when_either_child_fires() {
        let mut cond = or(
            Box::new(TextMention::new("APPROVE").unwrap()),
            Box::new(MessageCount::new(10).unwrap()),
        );

        assert!(!cond.evaluate(&msg("poet", "draft")));
        assert!(cond.evaluate(&msg("critic", "APPROVE")));
    }

    #[test]
    fn and_requires_both_children() {
        let mut cond = and(
            Box::new(TextMention::new("APPROVE").unwrap()),
            Box::new(MessageCount::new(3).unwrap()),
        );

        // Marker fires on message 2, count has only seen 2; pair not yet fired.
        assert!(!cond.evaluate(&msg("poet", "draft")));
        assert!(!cond.evaluate(&msg("critic", "APPROVE")));
        // Count reaches 3; marker already fired earlier and is remembered.
        assert!(cond.evaluate(&msg("poet", "done")));
    }

    #[test]
    fn combinator_children_observe_every_message() {
        // A MessageCount child on the non-firing side must still count every
        // message; verify via its exported state.
        let mut cond = or(
            Box::new(TextMention::new("APPROVE").unwrap()),
            Box::new(MessageCount::new(100).unwrap()),
        );

        cond.evaluate(&msg("user", "start"));
        cond.evaluate(&msg("poet", "draft"));
        cond.evaluate(&msg("critic", "APPROVE"));

        let state = cond.save_state();
        assert_eq!(state["right"]["seen"], serde_json::json!(3));
    }

    #[test]
    fn combinator_reset_propagates_to_children() {
        let mut cond = or(
            Box::new(MessageCount::new(2).unwrap()),
            Box::new(MessageCount::new(50).unwrap()),
        );

        cond.evaluate(&msg("a", "one"));
        assert!(cond.evaluate(&msg("b", "two")));

        cond.reset();
        let state = cond.save_state();
        assert_eq!(state["left"]["seen"], serde_json::json!(0));
        assert_eq!(state["right"]["seen"], serde_json::json!(0));
        assert!(!cond.evaluate(&msg("a", "fresh")));
    }

    #[test]
    fn condition_state_round_trip() {
        let mut original = and(
            Box::new(TextMention::new("DONE").unwrap()),
            Box::new(MessageCount::new(5).unwrap()),
        );
        original.evaluate(&msg("a", "DONE"));
        original.evaluate(&msg("b", "more"));

        let saved = original.save_state();

        let mut restored = and(
            Box::new(TextMention::new("DONE").unwrap()),
            Box::new(MessageCount::new(5).unwrap()),
        );
        restored.load_state(&saved).expect("load state");

        // Same internal counters: three more messages should fire both.
        restored.evaluate(&msg("c", "three"));
        restored.evaluate(&msg("d", "four"));
        assert!(restored.evaluate(&msg("e", "five")));
    }

    #[test]
    fn descriptions_compose() {
        let cond = or(
            Box::new(TextMention::new("APPROVE").unwrap()),
            Box::new(ExternalTermination::new()),
        );
        assert_eq!(
            cond.description(),
            "text 'APPROVE' mentioned or external termination requested"
        );
    }
}

// ABOUTME: Defines the result of a completed team run and the reason it stopped.
// ABOUTME: Stop reasons distinguish fired conditions, exhausted turn budgets, and caller stops.

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, UsageStats};

/// Why a run ended. Turn-budget exhaustion and caller-requested stops are
/// reported distinctly from a fired termination condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopReason {
    /// A termination condition fired; `description` names which one.
    ConditionFired { description: String },
    /// The configured turn budget was used up before any condition fired.
    MaxTurnsReached { limit: usize },
    /// The caller requested a stop between turns.
    StopRequested,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::ConditionFired { description } => f.write_str(description),
            StopReason::MaxTurnsReached { limit } => {
                write!(f, "maximum number of turns ({limit}) reached")
            }
            StopReason::StopRequested => f.write_str("stop requested by caller"),
        }
    }
}

/// The outcome of one run: the messages produced during that run (seed
/// included) and the reason the run stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub messages: Vec<ChatMessage>,
    pub stop_reason: StopReason,
}

impl TaskResult {
    /// Sum the usage accounting over every message that carries one.
    pub fn total_usage(&self) -> UsageStats {
        let mut total = UsageStats::default();
        for usage in self.messages.iter().filter_map(|m| m.usage.as_ref()) {
            total.add(usage);
        }
        total
    }
}

// ABOUTME: Shared error types for construction-time validation and state restore.
// ABOUTME: Configuration problems are rejected eagerly, before any run starts.

use thiserror::Error;

/// Errors raised while assembling a team or a termination condition. These
/// indicate caller mistakes and are reported at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("participant list must not be empty")]
    NoParticipants,

    #[error("duplicate participant name: {0}")]
    DuplicateParticipant(String),

    #[error("marker text must not be empty")]
    EmptyMarker,

    #[error("message limit must be at least 1")]
    ZeroMessageLimit,
}

/// Errors raised while restoring a saved state into a live instance.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("malformed state: {0}")]
    Malformed(String),

    #[error("state does not match this instance: {0}")]
    Mismatch(String),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_problem() {
        assert_eq!(
            ConfigError::NoParticipants.to_string(),
            "participant list must not be empty"
        );
        assert!(
            ConfigError::DuplicateParticipant("critic".to_string())
                .to_string()
                .contains("critic")
        );
    }

    #[test]
    fn state_error_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let state_err = StateError::from(err);
        assert!(matches!(state_err, StateError::Malformed(_)));
    }
}

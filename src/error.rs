//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid queue request: {reason}")]
    InvalidQueueRequest { reason: String },

    #[error("Invalid transition for match {match_id}: {reason}")]
    InvalidTransition { match_id: String, reason: String },

    #[error("Invalid match data: {reason}")]
    InvalidMatchData { reason: String },

    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Rating calculation failed: {reason}")]
    RatingCalculationFailed { reason: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Returns the typed error behind an anyhow error, if there is one
    pub fn kind_of(error: &anyhow::Error) -> Option<&MatchmakingError> {
        error.downcast_ref::<MatchmakingError>()
    }

    /// Whether the error is a caller contract violation rather than an I/O failure
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            MatchmakingError::InvalidTransition { .. }
                | MatchmakingError::InvalidMatchData { .. }
                | MatchmakingError::InvalidQueueRequest { .. }
                | MatchmakingError::MatchNotFound { .. }
                | MatchmakingError::PlayerNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_recovers_typed_error() {
        let error: anyhow::Error = MatchmakingError::MatchNotFound {
            match_id: "abc".to_string(),
        }
        .into();

        let kind = MatchmakingError::kind_of(&error).unwrap();
        assert!(matches!(kind, MatchmakingError::MatchNotFound { .. }));
        assert!(kind.is_contract_violation());
        assert_eq!(error.to_string(), "Match not found: abc");
    }

    #[test]
    fn test_io_failures_are_not_contract_violations() {
        let error = MatchmakingError::StorageError {
            message: "disk full".to_string(),
        };
        assert!(!error.is_contract_violation());

        let plain = anyhow::anyhow!("untyped");
        assert!(MatchmakingError::kind_of(&plain).is_none());
    }
}

//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;
use serde_json;

/// Default AMQP names, overridable through configuration
pub const COMMAND_QUEUE: &str = "ranked.commands";
pub const EVENTS_EXCHANGE: &str = "ranked.events";

/// Routing keys for events
pub const MATCH_CREATED_ROUTING_KEY: &str = "match.created";
pub const MATCH_STARTED_ROUTING_KEY: &str = "match.started";
pub const MATCH_COMPLETED_ROUTING_KEY: &str = "match.completed";
pub const MATCH_CANCELLED_ROUTING_KEY: &str = "match.cancelled";
pub const RATING_PERIOD_ENDED_ROUTING_KEY: &str = "rating_period.ended";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidQueueRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a command to bytes
    pub fn serialize_command(command: &QueueCommand) -> Result<Vec<u8>> {
        Self::validate_command(command)?;
        serde_json::to_vec(command).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize command: {}", e),
            }
            .into()
        })
    }

    /// Deserialize a command from bytes
    pub fn deserialize_command(bytes: &[u8]) -> Result<QueueCommand> {
        let command: QueueCommand =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidQueueRequest {
                reason: format!("Failed to deserialize command: {}", e),
            })?;

        Self::validate_command(&command)?;
        Ok(command)
    }

    /// Validate a command
    pub fn validate_command(command: &QueueCommand) -> Result<()> {
        match command {
            QueueCommand::Enqueue(request) => {
                Self::require_player_id(&request.player_id)?;
                Self::require("Platform", &request.platform)?;
                Self::require("Game", &request.game)
            }
            QueueCommand::Dequeue(request) => {
                Self::require_player_id(&request.player_id)?;
                Self::require("Platform", &request.platform)?;
                match &request.game {
                    Some(game) => Self::require("Game", game),
                    None => Ok(()),
                }
            }
            QueueCommand::ReportScore(report) => {
                if report.player1_score == report.player2_score {
                    return Err(MatchmakingError::InvalidMatchData {
                        reason: format!(
                            "Scores for match {} must differ, got {}-{}",
                            report.match_id, report.player1_score, report.player2_score
                        ),
                    }
                    .into());
                }
                Ok(())
            }
            QueueCommand::StartMatch(_) | QueueCommand::CancelMatch(_) => Ok(()),
        }
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for an event
    pub fn get_routing_key(event: &MatchmakingEvent) -> &'static str {
        match event {
            MatchmakingEvent::MatchCreated(_) => MATCH_CREATED_ROUTING_KEY,
            MatchmakingEvent::MatchStarted(_) => MATCH_STARTED_ROUTING_KEY,
            MatchmakingEvent::MatchCompleted(_) => MATCH_COMPLETED_ROUTING_KEY,
            MatchmakingEvent::MatchCancelled(_) => MATCH_CANCELLED_ROUTING_KEY,
            MatchmakingEvent::RatingPeriodEnded(_) => RATING_PERIOD_ENDED_ROUTING_KEY,
        }
    }

    /// Non-empty and at most [`MAX_PLAYER_ID_LEN`] bytes
    pub fn require_player_id(player_id: &str) -> Result<()> {
        Self::require("Player ID", player_id)?;
        if player_id.len() > MAX_PLAYER_ID_LEN {
            return Err(MatchmakingError::InvalidQueueRequest {
                reason: format!(
                    "Player ID is {} bytes, the limit is {}",
                    player_id.len(),
                    MAX_PLAYER_ID_LEN
                ),
            }
            .into());
        }
        Ok(())
    }

    fn require(field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(MatchmakingError::InvalidQueueRequest {
                reason: format!("{} cannot be empty", field),
            }
            .into());
        }
        Ok(())
    }
}

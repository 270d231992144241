//! Common types used throughout the matchmaking service

use crate::matches::Match;
use crate::rating::RatingPeriod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillratings::glicko2::Glicko2Rating;
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = String;

/// Longest accepted player id, in bytes; keeps file-backed record names short
pub const MAX_PLAYER_ID_LEN: usize = 64;

/// Unique identifier for matches
pub type MatchId = Uuid;

/// Unique identifier for rating periods
pub type RatingPeriodId = Uuid;

/// Glicko-2 style skill estimate for a player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingTriplet {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

impl RatingTriplet {
    pub fn new(rating: f64, deviation: f64, volatility: f64) -> Self {
        Self {
            rating,
            deviation,
            volatility,
        }
    }

    /// All three components are finite and the uncertainty terms positive
    pub fn is_valid(&self) -> bool {
        self.rating.is_finite()
            && self.deviation.is_finite()
            && self.volatility.is_finite()
            && self.deviation > 0.0
            && self.volatility > 0.0
    }
}

impl Default for RatingTriplet {
    fn default() -> Self {
        Self {
            rating: 1500.0,
            deviation: 350.0,
            volatility: 0.06,
        }
    }
}

impl From<Glicko2Rating> for RatingTriplet {
    fn from(rating: Glicko2Rating) -> Self {
        Self {
            rating: rating.rating,
            deviation: rating.deviation,
            volatility: rating.volatility,
        }
    }
}

impl From<RatingTriplet> for Glicko2Rating {
    fn from(triplet: RatingTriplet) -> Self {
        Self {
            rating: triplet.rating,
            deviation: triplet.deviation,
            volatility: triplet.volatility,
        }
    }
}

/// Identifies one platform/game sub-queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueKey {
    pub platform: String,
    pub game: String,
}

impl QueueKey {
    pub fn new(platform: impl Into<String>, game: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            game: game.into(),
        }
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.platform, self.game)
    }
}

/// Why a match ended without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Never started within the pending lifetime
    PendingTimeout,
    /// Started but never reported within the in-progress lifetime
    InProgressTimeout,
    /// Cancelled by an explicit command
    Requested,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::PendingTimeout => write!(f, "pending_timeout"),
            CancelReason::InProgressTimeout => write!(f, "in_progress_timeout"),
            CancelReason::Requested => write!(f, "requested"),
        }
    }
}

/// Inbound command messages
/// Request to join a platform/game queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub player_id: PlayerId,
    pub platform: String,
    pub game: String,
    pub timestamp: DateTime<Utc>,
}

/// Request to leave a queue; without a game the player leaves every game on the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DequeueRequest {
    pub player_id: PlayerId,
    pub platform: String,
    pub game: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Both players are ready and the match begins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMatchRequest {
    pub match_id: MatchId,
    pub timestamp: DateTime<Utc>,
}

/// Final scores for a match, in player1/player2 order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReport {
    pub match_id: MatchId,
    pub player1_score: u32,
    pub player2_score: u32,
    pub timestamp: DateTime<Utc>,
}

/// Request to abandon a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelMatchRequest {
    pub match_id: MatchId,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all inbound commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueCommand {
    Enqueue(EnqueueRequest),
    Dequeue(DequeueRequest),
    StartMatch(StartMatchRequest),
    ReportScore(ScoreReport),
    CancelMatch(CancelMatchRequest),
}

impl QueueCommand {
    pub fn name(&self) -> &'static str {
        match self {
            QueueCommand::Enqueue(_) => "enqueue",
            QueueCommand::Dequeue(_) => "dequeue",
            QueueCommand::StartMatch(_) => "start_match",
            QueueCommand::ReportScore(_) => "report_score",
            QueueCommand::CancelMatch(_) => "cancel_match",
        }
    }
}

/// Result of a successfully processed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Queued,
    AlreadyQueued,
    AlreadyInMatch,
    Dequeued,
    NotQueued,
    MatchStarted,
    MatchCompleted,
    MatchCancelled,
}

impl std::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CommandOutcome::Queued => "queued",
            CommandOutcome::AlreadyQueued => "already queued",
            CommandOutcome::AlreadyInMatch => "already in a match",
            CommandOutcome::Dequeued => "dequeued",
            CommandOutcome::NotQueued => "not queued",
            CommandOutcome::MatchStarted => "match started",
            CommandOutcome::MatchCompleted => "match completed",
            CommandOutcome::MatchCancelled => "match cancelled",
        };
        write!(f, "{}", text)
    }
}

/// Outbound lifecycle events
/// Event emitted when the matchmaker pairs two players
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCreated {
    pub match_info: Match,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a match moves to in-progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStarted {
    pub match_info: Match,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a match is scored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCompleted {
    pub match_info: Match,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a match is abandoned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCancelled {
    pub match_info: Match,
    pub reason: CancelReason,
    pub timestamp: DateTime<Utc>,
}

/// Rating change information for a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
    pub player_id: PlayerId,
    pub old_rating: RatingTriplet,
    pub new_rating: RatingTriplet,
}

impl RatingChange {
    pub fn rating_delta(&self) -> f64 {
        self.new_rating.rating - self.old_rating.rating
    }
}

/// Event emitted when a rating period is closed and its players finalized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingPeriodEnded {
    pub period: RatingPeriod,
    pub rating_changes: Vec<RatingChange>,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MatchmakingEvent {
    MatchCreated(MatchCreated),
    MatchStarted(MatchStarted),
    MatchCompleted(MatchCompleted),
    MatchCancelled(MatchCancelled),
    RatingPeriodEnded(RatingPeriodEnded),
}

impl MatchmakingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MatchmakingEvent::MatchCreated(_) => "MatchCreated",
            MatchmakingEvent::MatchStarted(_) => "MatchStarted",
            MatchmakingEvent::MatchCompleted(_) => "MatchCompleted",
            MatchmakingEvent::MatchCancelled(_) => "MatchCancelled",
            MatchmakingEvent::RatingPeriodEnded(_) => "RatingPeriodEnded",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MatchmakingEvent::MatchCreated(e) => e.timestamp,
            MatchmakingEvent::MatchStarted(e) => e.timestamp,
            MatchmakingEvent::MatchCompleted(e) => e.timestamp,
            MatchmakingEvent::MatchCancelled(e) => e.timestamp,
            MatchmakingEvent::RatingPeriodEnded(e) => e.timestamp,
        }
    }
}

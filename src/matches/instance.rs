//! Match state machine
//!
//! A match moves `Created -> InProgress -> Completed`, or ends early in
//! `Cancelled`. Every transition validates its preconditions and leaves the
//! match untouched when it fails.

use crate::error::{MatchmakingError, Result};
use crate::types::{
    CancelReason, MatchCancelled, MatchCompleted, MatchCreated, MatchId, MatchStarted, PlayerId,
    QueueKey,
};
use crate::utils::generate_match_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchState {
    Created,
    InProgress,
    Completed,
    Cancelled,
}

impl MatchState {
    /// Completed and cancelled matches never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchState::Completed | MatchState::Cancelled)
    }
}

impl std::fmt::Display for MatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchState::Created => write!(f, "Created"),
            MatchState::InProgress => write!(f, "InProgress"),
            MatchState::Completed => write!(f, "Completed"),
            MatchState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Result of a completed match from one player's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Win,
    Loss,
}

/// Final scores in player1/player2 order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchScores {
    pub player1: u32,
    pub player2: u32,
}

/// One contest between two players
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatchRecord", into = "MatchRecord")]
pub struct Match {
    pub id: MatchId,
    pub player1: PlayerId,
    pub player2: PlayerId,
    pub queue: QueueKey,
    state: MatchState,
    created_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    scores: Option<MatchScores>,
}

impl Match {
    /// Create a not-yet-started match between two distinct players
    pub fn new(
        player1: impl Into<PlayerId>,
        player2: impl Into<PlayerId>,
        queue: QueueKey,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let player1 = player1.into();
        let player2 = player2.into();

        if player1 == player2 {
            return Err(MatchmakingError::InvalidMatchData {
                reason: format!("Both players cannot be the same ({})", player1),
            }
            .into());
        }

        Ok(Self {
            id: generate_match_id(),
            player1,
            player2,
            queue,
            state: MatchState::Created,
            created_at: now,
            start_time: None,
            end_time: None,
            cancelled_at: None,
            scores: None,
        })
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn scores(&self) -> Option<MatchScores> {
        self.scores
    }

    pub fn players(&self) -> [&PlayerId; 2] {
        [&self.player1, &self.player2]
    }

    pub fn involves(&self, player_id: &str) -> bool {
        self.player1 == player_id || self.player2 == player_id
    }

    /// The other player of the match, if `player_id` is in it
    pub fn opponent_of(&self, player_id: &str) -> Option<&PlayerId> {
        if self.player1 == player_id {
            Some(&self.player2)
        } else if self.player2 == player_id {
            Some(&self.player1)
        } else {
            None
        }
    }

    /// How long the match took, once completed
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn created_event(&self) -> MatchCreated {
        MatchCreated {
            match_info: self.clone(),
            timestamp: self.created_at,
        }
    }

    /// Move a created match into play
    pub fn start_at(&mut self, now: DateTime<Utc>) -> Result<MatchStarted> {
        if self.state != MatchState::Created {
            return Err(self.invalid_transition("start", "match is not in the Created state"));
        }

        self.start_time = Some(now);
        self.state = MatchState::InProgress;

        Ok(MatchStarted {
            match_info: self.clone(),
            timestamp: now,
        })
    }

    /// Record final scores; draws are rejected
    pub fn complete_at(
        &mut self,
        now: DateTime<Utc>,
        player1_score: u32,
        player2_score: u32,
    ) -> Result<MatchCompleted> {
        if self.state != MatchState::InProgress {
            return Err(self.invalid_transition("complete", "match is not in progress"));
        }

        if player1_score == player2_score {
            return Err(MatchmakingError::InvalidMatchData {
                reason: format!(
                    "Both player scores cannot be the same ({} - {})",
                    player1_score, player2_score
                ),
            }
            .into());
        }

        let start = self.start_time.ok_or_else(|| MatchmakingError::InvalidMatchData {
            reason: "In-progress match has no start time".to_string(),
        })?;
        if now <= start {
            return Err(MatchmakingError::InvalidMatchData {
                reason: format!("End time {} must be after start time {}", now, start),
            }
            .into());
        }

        self.end_time = Some(now);
        self.scores = Some(MatchScores {
            player1: player1_score,
            player2: player2_score,
        });
        self.state = MatchState::Completed;

        Ok(MatchCompleted {
            match_info: self.clone(),
            timestamp: now,
        })
    }

    /// Abandon a created or in-progress match
    pub fn cancel_at(&mut self, now: DateTime<Utc>, reason: CancelReason) -> Result<MatchCancelled> {
        if self.state.is_terminal() {
            return Err(self.invalid_transition("cancel", "match has already ended"));
        }

        self.cancelled_at = Some(now);
        self.state = MatchState::Cancelled;

        Ok(MatchCancelled {
            match_info: self.clone(),
            reason,
            timestamp: now,
        })
    }

    /// Winner of a completed match
    pub fn winner(&self) -> Option<&PlayerId> {
        let scores = self.scores.filter(|_| self.state == MatchState::Completed)?;
        if scores.player1 > scores.player2 {
            Some(&self.player1)
        } else {
            Some(&self.player2)
        }
    }

    /// Outcome of a completed match for one of its players
    pub fn outcome_for(&self, player_id: &str) -> Option<MatchOutcome> {
        if !self.involves(player_id) {
            return None;
        }
        self.winner().map(|winner| {
            if winner == player_id {
                MatchOutcome::Win
            } else {
                MatchOutcome::Loss
            }
        })
    }

    /// Whether a completed match ended level.
    ///
    /// Equal scores are rejected on completion, so this is `Some(false)` for every
    /// completed match and `None` before completion.
    #[deprecated(note = "draws are rejected on completion; use `winner` or `outcome_for`")]
    pub fn is_draw(&self) -> Option<bool> {
        if self.state != MatchState::Completed {
            return None;
        }
        self.scores.map(|s| s.player1 == s.player2)
    }

    /// Check the internal consistency of a fully constructed match
    pub fn validate(&self) -> Result<()> {
        MatchRecord::from(self.clone()).validate()
    }

    fn invalid_transition(&self, operation: &str, reason: &str) -> anyhow::Error {
        MatchmakingError::InvalidTransition {
            match_id: self.id.to_string(),
            reason: format!("cannot {} from {}: {}", operation, self.state, reason),
        }
        .into()
    }
}

impl PartialEq for Match {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Match {}

/// Flag-based persisted form of a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub player1: PlayerId,
    pub player2: PlayerId,
    pub platform: String,
    pub game: String,
    pub in_progress: bool,
    pub completed: bool,
    #[serde(default)]
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub player1_score: Option<u32>,
    pub player2_score: Option<u32>,
}

impl MatchRecord {
    /// Reject records that no sequence of transitions could have produced
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> anyhow::Error {
            MatchmakingError::InvalidMatchData {
                reason: format!("match {}: {}", self.id, reason),
            }
            .into()
        };

        if self.player1 == self.player2 {
            return Err(invalid("both players cannot be the same"));
        }
        if self.in_progress && self.completed {
            return Err(invalid("in-progress and completed cannot both be true"));
        }
        if self.cancelled && self.completed {
            return Err(invalid("cancelled and completed cannot both be true"));
        }
        if self.cancelled && self.cancelled_at.is_none() {
            return Err(invalid("cancelled match has no cancellation time"));
        }

        let scores = (self.player1_score, self.player2_score);
        if let (Some(score1), Some(score2)) = scores {
            if score1 == score2 {
                return Err(invalid("both player scores cannot be the same"));
            }
        }
        if !self.completed && (scores.0.is_some() || scores.1.is_some()) {
            return Err(invalid("only completed matches carry scores"));
        }

        if self.completed {
            let (Some(start), Some(end)) = (self.start_time, self.end_time) else {
                return Err(invalid("completed match needs start and end times"));
            };
            if start >= end {
                return Err(invalid("start time must be strictly before end time"));
            }
            if scores.0.is_none() || scores.1.is_none() {
                return Err(invalid("completed match needs both scores"));
            }
        } else if self.end_time.is_some() {
            return Err(invalid("only completed matches carry an end time"));
        }

        if self.in_progress && self.start_time.is_none() {
            return Err(invalid("in-progress match has no start time"));
        }
        if !self.in_progress && !self.completed && !self.cancelled && self.start_time.is_some() {
            return Err(invalid("created match cannot have a start time"));
        }

        Ok(())
    }

    fn state(&self) -> MatchState {
        if self.completed {
            MatchState::Completed
        } else if self.cancelled {
            MatchState::Cancelled
        } else if self.in_progress {
            MatchState::InProgress
        } else {
            MatchState::Created
        }
    }
}

impl From<Match> for MatchRecord {
    fn from(m: Match) -> Self {
        let state = m.state;
        Self {
            id: m.id,
            player1: m.player1,
            player2: m.player2,
            platform: m.queue.platform,
            game: m.queue.game,
            in_progress: state == MatchState::InProgress,
            completed: state == MatchState::Completed,
            cancelled: state == MatchState::Cancelled,
            created_at: m.created_at,
            start_time: m.start_time,
            end_time: m.end_time,
            cancelled_at: m.cancelled_at,
            player1_score: m.scores.map(|s| s.player1),
            player2_score: m.scores.map(|s| s.player2),
        }
    }
}

impl TryFrom<MatchRecord> for Match {
    type Error = MatchmakingError;

    fn try_from(record: MatchRecord) -> std::result::Result<Self, Self::Error> {
        record.validate().map_err(|e| match e.downcast::<MatchmakingError>() {
            Ok(typed) => typed,
            Err(other) => MatchmakingError::InvalidMatchData {
                reason: other.to_string(),
            },
        })?;

        let state = record.state();
        let scores = match (record.player1_score, record.player2_score) {
            (Some(player1), Some(player2)) => Some(MatchScores { player1, player2 }),
            _ => None,
        };

        Ok(Self {
            id: record.id,
            player1: record.player1,
            player2: record.player2,
            queue: QueueKey::new(record.platform, record.game),
            state,
            created_at: record.created_at,
            start_time: record.start_time,
            end_time: record.end_time,
            cancelled_at: record.cancelled_at,
            scores,
        })
    }
}

//! Player record: rating triplets, queue flags, and match history

use crate::error::{MatchmakingError, Result};
use crate::matches::Match;
use crate::types::{MatchId, PlayerId, RatingTriplet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// A rated identity known to the service
///
/// Equality and hashing use the id only, so two snapshots of the same player
/// taken at different times compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    /// Authoritative rating, replaced only by `finalize`
    pub rating: RatingTriplet,
    /// Provisional next-period rating written during rotation
    pub working: Option<RatingTriplet>,
    pub in_queue: bool,
    pub in_match: bool,
    /// When the player entered their current queue(s)
    pub joined_queue_at: Option<DateTime<Utc>>,
    /// Largest tolerance across the player's queue entries
    pub tolerance: f64,
    /// Every match the player was paired into, oldest first
    pub match_history: Vec<MatchId>,
    pub platforms: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    /// End of the last rating period applied to `rating`
    #[serde(default)]
    pub rated_through: Option<DateTime<Utc>>,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, rating: RatingTriplet, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            rating,
            working: None,
            in_queue: false,
            in_match: false,
            joined_queue_at: None,
            tolerance: 0.0,
            match_history: Vec::new(),
            platforms: BTreeSet::new(),
            created_at: now,
            rated_through: None,
        }
    }

    /// Record a provisional rating for the next period
    pub fn set_working(&mut self, triplet: RatingTriplet) {
        self.working = Some(triplet);
    }

    /// Swap the working triplet into the authoritative one.
    /// Returns false when there was nothing to finalize.
    pub fn finalize(&mut self) -> bool {
        match self.working.take() {
            Some(triplet) => {
                self.rating = triplet;
                true
            }
            None => false,
        }
    }

    /// Returns false if the platform was already known
    pub fn add_platform(&mut self, platform: impl Into<String>) -> bool {
        self.platforms.insert(platform.into())
    }

    /// Append a match to the history; the player must be one of its two players
    pub fn add_match(&mut self, game_match: &Match) -> Result<()> {
        if !game_match.involves(&self.id) {
            return Err(MatchmakingError::InvalidMatchData {
                reason: format!(
                    "Player {} is not part of match {}",
                    self.id, game_match.id
                ),
            }
            .into());
        }

        if !self.match_history.contains(&game_match.id) {
            self.match_history.push(game_match.id);
        }
        Ok(())
    }

    pub fn mark_queued(&mut self, now: DateTime<Utc>) {
        if !self.in_queue {
            self.joined_queue_at = Some(now);
            self.tolerance = 0.0;
        }
        self.in_queue = true;
    }

    pub fn mark_dequeued(&mut self) {
        self.in_queue = false;
        self.joined_queue_at = None;
        self.tolerance = 0.0;
    }

    /// Paired by the matchmaker: no longer waiting, now playing
    pub fn mark_in_match(&mut self) {
        self.mark_dequeued();
        self.in_match = true;
    }

    /// The player's match was completed or cancelled
    pub fn release_from_match(&mut self) {
        self.in_match = false;
    }
}

impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Player {}

impl Hash for Player {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

//! Rating calculator trait and a mock implementation
//!
//! The calculator is a pure function from one participant's triplet and that
//! participant's results within a closed period to the next triplet. It is
//! invoked once per participant per rotation.

use crate::error::{MatchmakingError, Result};
use crate::matches::MatchOutcome;
use crate::types::{PlayerId, RatingTriplet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

/// One game as seen from the participant being rated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub opponent_id: PlayerId,
    /// The opponent's authoritative triplet at the start of the rotation
    pub opponent: RatingTriplet,
    pub outcome: MatchOutcome,
}

/// Trait for computing a participant's next rating triplet
pub trait RatingCalculator: Send + Sync {
    /// Must be deterministic for the same inputs
    fn rate(
        &self,
        player_id: &PlayerId,
        current: &RatingTriplet,
        results: &[GameResult],
    ) -> Result<RatingTriplet>;

    /// Triplet for players who have never been rated
    fn initial_rating(&self) -> RatingTriplet;

    /// Current configuration as JSON
    fn config(&self) -> serde_json::Value;
}

/// Mock rating calculator for testing
///
/// Moves the rating by a fixed step per win or loss and can be told to fail
/// for specific players.
#[derive(Debug)]
pub struct MockRatingCalculator {
    calls: Mutex<Vec<(PlayerId, Vec<GameResult>)>>,
    failing_players: RwLock<HashSet<PlayerId>>,
    step: f64,
}

impl MockRatingCalculator {
    pub fn new() -> Self {
        Self::with_step(10.0)
    }

    pub fn with_step(step: f64) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing_players: RwLock::new(HashSet::new()),
            step,
        }
    }

    /// Make every calculation for `player_id` fail
    pub fn fail_for(&self, player_id: impl Into<PlayerId>) {
        if let Ok(mut failing) = self.failing_players.write() {
            failing.insert(player_id.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing_players.write() {
            failing.clear();
        }
    }

    /// Get all calculation calls made (for testing)
    pub fn get_calls(&self) -> Vec<(PlayerId, Vec<GameResult>)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

impl Default for MockRatingCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl RatingCalculator for MockRatingCalculator {
    fn rate(
        &self,
        player_id: &PlayerId,
        current: &RatingTriplet,
        results: &[GameResult],
    ) -> Result<RatingTriplet> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((player_id.clone(), results.to_vec()));
        }

        let failing = self
            .failing_players
            .read()
            .map(|failing| failing.contains(player_id))
            .unwrap_or(false);
        if failing {
            return Err(MatchmakingError::RatingCalculationFailed {
                reason: format!("Simulated failure for player {}", player_id),
            }
            .into());
        }

        let delta: f64 = results
            .iter()
            .map(|result| match result.outcome {
                MatchOutcome::Win => self.step,
                MatchOutcome::Loss => -self.step,
            })
            .sum();

        Ok(RatingTriplet {
            rating: current.rating + delta,
            ..*current
        })
    }

    fn initial_rating(&self) -> RatingTriplet {
        RatingTriplet::default()
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "mock",
            "step": self.step,
        })
    }
}

//! Rating periods: fixed windows that batch completed matches

use crate::error::{MatchmakingError, Result};
use crate::matches::{Match, MatchState};
use crate::types::{PlayerId, RatingChange, RatingPeriodId};
use crate::utils::generate_period_id;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The open period shared between the match handler and the coordinator
pub type SharedRatingPeriod = Arc<Mutex<RatingPeriod>>;

/// A window of time over which completed matches accumulate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingPeriod {
    pub id: RatingPeriodId,
    pub start_time: DateTime<Utc>,
    pub length_seconds: i64,
    /// Completed matches in the order they were handed in
    pub matches: Vec<Match>,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
    /// Rating changes committed when the period closed
    #[serde(default)]
    pub rating_changes: Vec<RatingChange>,
}

impl RatingPeriod {
    pub fn new(start_time: DateTime<Utc>, length: Duration) -> Self {
        Self {
            id: generate_period_id(),
            start_time,
            length_seconds: length.num_seconds(),
            matches: Vec::new(),
            closed: false,
            closed_at: None,
            rating_changes: Vec::new(),
        }
    }

    pub fn shared(period: RatingPeriod) -> SharedRatingPeriod {
        Arc::new(Mutex::new(period))
    }

    pub fn length(&self) -> Duration {
        Duration::seconds(self.length_seconds)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + self.length()
    }

    /// Strictly after the end time
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time()
    }

    /// Append a completed match; returns false if it was already collected
    pub fn add_match(&mut self, game_match: Match) -> Result<bool> {
        if self.closed {
            return Err(MatchmakingError::InvalidTransition {
                match_id: game_match.id.to_string(),
                reason: format!("Rating period {} is closed", self.id),
            }
            .into());
        }

        if game_match.state() != MatchState::Completed {
            return Err(MatchmakingError::InvalidMatchData {
                reason: format!(
                    "Only completed matches belong to a rating period, match {} is {}",
                    game_match.id,
                    game_match.state()
                ),
            }
            .into());
        }

        if self.matches.iter().any(|m| m.id == game_match.id) {
            return Ok(false);
        }

        self.matches.push(game_match);
        Ok(true)
    }

    /// Every player appearing in a collected match
    pub fn participants(&self) -> BTreeSet<PlayerId> {
        self.matches
            .iter()
            .flat_map(|m| [m.player1.clone(), m.player2.clone()])
            .collect()
    }

    /// Collected matches involving `player_id`, in collection order
    pub fn player_matches<'a>(&'a self, player_id: &'a str) -> impl Iterator<Item = &'a Match> {
        self.matches.iter().filter(move |m| m.involves(player_id))
    }

    pub fn close_at(&mut self, now: DateTime<Utc>) {
        self.closed = true;
        self.closed_at = Some(now);
    }

    /// The next period: starts where this one ends, same length
    pub fn successor(&self) -> RatingPeriod {
        RatingPeriod::new(self.end_time(), self.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueueKey;
    use crate::utils::current_timestamp;

    fn completed(p1: &str, p2: &str, now: DateTime<Utc>) -> Match {
        let mut game_match = Match::new(p1, p2, QueueKey::new("PC", "Default"), now).unwrap();
        game_match.start_at(now).unwrap();
        game_match
            .complete_at(now + Duration::minutes(10), 10, 3)
            .unwrap();
        game_match
    }

    #[test]
    fn test_window() {
        let start = current_timestamp();
        let period = RatingPeriod::new(start, Duration::hours(72));

        assert_eq!(period.end_time(), start + Duration::hours(72));
        assert!(!period.is_expired_at(period.end_time()));
        assert!(period.is_expired_at(period.end_time() + Duration::seconds(1)));

        let next = period.successor();
        assert_eq!(next.start_time, period.end_time());
        assert_eq!(next.length(), period.length());
        assert_ne!(next.id, period.id);
    }

    #[test]
    fn test_add_match_and_participants() {
        let now = current_timestamp();
        let mut period = RatingPeriod::new(now, Duration::hours(72));

        let first = completed("alice", "bob", now);
        assert!(period.add_match(first.clone()).unwrap());
        assert!(!period.add_match(first).unwrap());
        assert!(period.add_match(completed("bob", "carol", now)).unwrap());

        let participants: Vec<_> = period.participants().into_iter().collect();
        assert_eq!(participants, vec!["alice", "bob", "carol"]);
        assert_eq!(period.player_matches("bob").count(), 2);
        assert_eq!(period.player_matches("carol").count(), 1);
    }

    #[test]
    fn test_rejects_unfinished_or_closed() {
        let now = current_timestamp();
        let mut period = RatingPeriod::new(now, Duration::hours(72));

        let pending = Match::new("alice", "bob", QueueKey::new("PC", "Default"), now).unwrap();
        assert!(period.add_match(pending).is_err());

        period.close_at(now);
        assert!(period.add_match(completed("alice", "bob", now)).is_err());
        assert!(period.matches.is_empty());
    }
}

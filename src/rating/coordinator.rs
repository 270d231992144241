//! Rating-period coordinator
//!
//! Holds the single open rating period. Each tick checks whether the period
//! has expired and, if so, rotates it: every participant is rated against the
//! period's matches, the closed period is persisted together with the rating
//! changes, and only then are the new triplets committed in memory and a fresh
//! period opened. A failure before that write leaves the period open with its
//! matches intact for the next tick.

use crate::amqp::publisher::EventPublisher;
use crate::config::RatingSettings;
use crate::error::{MatchmakingError, Result};
use crate::player::{Player, PlayerRegistry};
use crate::rating::calculator::{GameResult, RatingCalculator};
use crate::rating::period::{RatingPeriod, SharedRatingPeriod};
use crate::storage::Storage;
use crate::types::{PlayerId, RatingChange, RatingPeriodEnded, RatingTriplet};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Statistics about rating-period rotation
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub ticks: u64,
    pub rotations: u64,
    pub failed_rotations: u64,
    pub players_rated: u64,
    pub last_rotation_at: Option<DateTime<Utc>>,
}

pub struct RatingPeriodCoordinator {
    period: SharedRatingPeriod,
    players: PlayerRegistry,
    storage: Arc<dyn Storage>,
    calculator: Arc<dyn RatingCalculator>,
    event_publisher: Arc<dyn EventPublisher>,
    stats: RwLock<CoordinatorStats>,
}

impl RatingPeriodCoordinator {
    pub fn new(
        period: SharedRatingPeriod,
        players: PlayerRegistry,
        storage: Arc<dyn Storage>,
        calculator: Arc<dyn RatingCalculator>,
        event_publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            period,
            players,
            storage,
            calculator,
            event_publisher,
            stats: RwLock::new(CoordinatorStats::default()),
        }
    }

    /// Find the period to run with at startup
    ///
    /// The latest persisted period is resumed while it is open. A closed latest
    /// period is followed by its successor; with nothing persisted a new period
    /// starts at the configured start time, or `now`.
    pub async fn load_or_create(
        storage: &dyn Storage,
        settings: &RatingSettings,
        now: DateTime<Utc>,
    ) -> Result<RatingPeriod> {
        Self::replay_committed_ratings(storage).await?;

        let period = match storage.latest_rating_period().await? {
            Some(latest) if !latest.closed => {
                info!(
                    "Resuming rating period {} ({} matches, ends {})",
                    latest.id,
                    latest.matches.len(),
                    latest.end_time()
                );
                return Ok(latest);
            }
            Some(latest) => {
                let next = latest.successor();
                info!(
                    "Latest rating period {} is closed, opening {} starting {}",
                    latest.id, next.id, next.start_time
                );
                next
            }
            None => {
                let start = settings.period_start.unwrap_or(now);
                let period = RatingPeriod::new(start, settings.period_length());
                info!(
                    "No rating period found, opening {} from {} to {}",
                    period.id,
                    period.start_time,
                    period.end_time()
                );
                period
            }
        };

        storage.save_rating_period(&period).await?;
        Ok(period)
    }

    /// Bring stored player records up to date with every closed period
    ///
    /// A rotation commits by writing the closed period; player records that
    /// were not written afterwards are fixed here. Each record remembers the
    /// end of the last period applied to it, so a change is never applied twice.
    /// Returns the number of player records rewritten.
    pub async fn replay_committed_ratings(storage: &dyn Storage) -> Result<usize> {
        let mut closed: Vec<RatingPeriod> = storage
            .list_rating_periods()
            .await?
            .into_iter()
            .filter(|period| period.closed && !period.rating_changes.is_empty())
            .collect();
        if closed.is_empty() {
            return Ok(0);
        }
        closed.sort_by_key(|period| period.start_time);

        let mut players: HashMap<PlayerId, Player> = storage
            .list_players()
            .await?
            .into_iter()
            .map(|player| (player.id.clone(), player))
            .collect();

        let mut stale = BTreeSet::new();
        for period in &closed {
            let end = period.end_time();
            for change in &period.rating_changes {
                let Some(player) = players.get_mut(&change.player_id) else {
                    warn!(
                        "Rating period {} rated unknown player {}",
                        period.id, change.player_id
                    );
                    continue;
                };
                if player.rated_through.is_some_and(|through| through >= end) {
                    continue;
                }
                player.rating = change.new_rating;
                player.working = None;
                player.rated_through = Some(end);
                stale.insert(change.player_id.clone());
            }
        }

        if stale.is_empty() {
            return Ok(0);
        }
        let repaired: Vec<Player> = stale
            .iter()
            .filter_map(|id| players.remove(id))
            .collect();
        storage.save_players(&repaired).await?;
        info!(
            "Replayed committed ratings onto {} player records",
            repaired.len()
        );
        Ok(repaired.len())
    }

    pub fn period(&self) -> SharedRatingPeriod {
        self.period.clone()
    }

    /// Snapshot of the open period
    pub async fn current_period(&self) -> RatingPeriod {
        self.period.lock().await.clone()
    }

    /// Rotate the open period if it has expired
    ///
    /// Returns the emitted event when a rotation happened.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<Option<RatingPeriodEnded>> {
        self.update_stats(|stats| stats.ticks += 1)?;

        let mut period = self.period.lock().await;
        if !period.is_expired_at(now) {
            return Ok(None);
        }

        debug!(
            "Rating period {} expired at {}, rotating {} matches",
            period.id,
            period.end_time(),
            period.matches.len()
        );

        let (closed, rating_changes) = match self.rotate(&period, now).await {
            Ok(rotated) => rotated,
            Err(e) => {
                error!(
                    "Rotation of rating period {} aborted, will retry: {}",
                    period.id, e
                );
                self.update_stats(|stats| stats.failed_rotations += 1)?;
                return Err(e);
            }
        };

        let next = closed.successor();
        if let Err(e) = self.storage.save_rating_period(&next).await {
            warn!("Failed to persist new rating period {}: {}", next.id, e);
        }
        *period = next;
        let next_id = period.id;
        drop(period);

        info!(
            "📊 Rating period {} closed: {} matches, {} players rated; period {} is now open",
            closed.id,
            closed.matches.len(),
            rating_changes.len(),
            next_id
        );

        let rated = rating_changes.len() as u64;
        self.update_stats(|stats| {
            stats.rotations += 1;
            stats.players_rated += rated;
            stats.last_rotation_at = Some(now);
        })?;

        let event = RatingPeriodEnded {
            period: closed,
            rating_changes,
            timestamp: now,
        };
        if let Err(e) = self
            .event_publisher
            .publish_rating_period_ended(event.clone())
            .await
        {
            warn!("Failed to publish RatingPeriodEnded: {}", e);
        }

        Ok(Some(event))
    }

    /// Rate, persist and commit every participant of `period`
    ///
    /// Nothing changes, durably or in memory, unless every calculation and
    /// the closed-period write succeeded. Player records written afterwards
    /// are derived from that record and can be replayed from it.
    async fn rotate(
        &self,
        period: &RatingPeriod,
        now: DateTime<Utc>,
    ) -> Result<(RatingPeriod, Vec<RatingChange>)> {
        let participants = period.participants();
        let mut players = self.players.write().await;

        let mut before: HashMap<PlayerId, Player> = HashMap::with_capacity(participants.len());
        for player_id in &participants {
            let player = self
                .players
                .resolve(&mut players, player_id, false, now)
                .await?;
            before.insert(player_id.clone(), player.clone());
        }

        let ratings: HashMap<&PlayerId, RatingTriplet> = before
            .iter()
            .map(|(id, player)| (id, player.rating))
            .collect();

        let mut rating_changes = Vec::with_capacity(participants.len());
        for player_id in &participants {
            let results = Self::results_for(period, player_id, &ratings)?;
            let current = before
                .get(player_id)
                .map(|p| p.rating)
                .ok_or_else(|| MatchmakingError::PlayerNotFound {
                    player_id: player_id.clone(),
                })?;

            let next = self
                .calculator
                .rate(player_id, &current, &results)
                .map_err(|e| MatchmakingError::RatingCalculationFailed {
                    reason: format!("Player {}: {}", player_id, e),
                })?;

            rating_changes.push(RatingChange {
                player_id: player_id.clone(),
                old_rating: current,
                new_rating: next,
            });
        }

        // The closed period carries the rating changes, so this one write
        // commits the rotation
        let mut closed = period.clone();
        closed.close_at(now);
        closed.rating_changes = rating_changes.clone();
        self.storage.save_rating_period(&closed).await?;

        let rated_through = closed.end_time();
        let mut updated = Vec::with_capacity(rating_changes.len());
        for change in &rating_changes {
            if let Some(player) = players.get_mut(&change.player_id) {
                player.set_working(change.new_rating);
                player.finalize();
                player.rated_through = Some(rated_through);
                updated.push(player.clone());
            }
        }

        if let Err(e) = self.storage.save_players(&updated).await {
            error!(
                "Rating period {} is committed but {} player records were not written, \
                 they are replayed at startup: {}",
                closed.id,
                updated.len(),
                e
            );
        }

        Ok((closed, rating_changes))
    }

    /// One participant's games, against the opponents' pre-rotation ratings
    fn results_for(
        period: &RatingPeriod,
        player_id: &PlayerId,
        ratings: &HashMap<&PlayerId, RatingTriplet>,
    ) -> Result<Vec<GameResult>> {
        period
            .player_matches(player_id)
            .map(|game_match| -> Result<GameResult> {
                let opponent_id = game_match.opponent_of(player_id).ok_or_else(|| {
                    MatchmakingError::InvalidMatchData {
                        reason: format!("Match {} has no opponent for {}", game_match.id, player_id),
                    }
                })?;
                let outcome = game_match.outcome_for(player_id).ok_or_else(|| {
                    MatchmakingError::InvalidMatchData {
                        reason: format!("Match {} has no result", game_match.id),
                    }
                })?;
                let opponent = ratings.get(opponent_id).copied().ok_or_else(|| {
                    MatchmakingError::PlayerNotFound {
                        player_id: opponent_id.clone(),
                    }
                })?;

                Ok(GameResult {
                    opponent_id: opponent_id.clone(),
                    opponent,
                    outcome,
                })
            })
            .collect()
    }

    /// Get coordinator statistics
    pub fn get_stats(&self) -> Result<CoordinatorStats> {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire coordinator stats lock".to_string(),
                }
                .into()
            })
    }

    fn update_stats(&self, update: impl FnOnce(&mut CoordinatorStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire coordinator stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }
}

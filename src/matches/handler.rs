//! Match handler: tracks active matches and hands completed ones to the rating period
//!
//! The handler owns the set of currently active (created or in-progress) matches.
//! A completed match is appended to whichever rating period is open at that
//! moment and dropped from tracking in the same critical section, so it is never
//! lost or counted twice when a rotation happens concurrently.

use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::matches::instance::{Match, MatchState};
use crate::player::PlayerRegistry;
use crate::rating::period::SharedRatingPeriod;
use crate::storage::Storage;
use crate::types::{CancelReason, MatchId, PlayerId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How long matches may stay in each non-terminal state
#[derive(Debug, Clone, Copy)]
pub struct MatchLifetimes {
    pub pending: Duration,
    pub in_progress: Duration,
}

impl Default for MatchLifetimes {
    fn default() -> Self {
        Self {
            pending: Duration::minutes(5),
            in_progress: Duration::minutes(60),
        }
    }
}

/// Statistics about match handling
#[derive(Debug, Clone, Default)]
pub struct MatchHandlerStats {
    pub matches_tracked: u64,
    pub matches_started: u64,
    pub matches_completed: u64,
    pub matches_cancelled: u64,
    pub active_matches: usize,
}

/// Tracks active matches and drives their transitions
pub struct MatchHandler {
    matches: Mutex<HashMap<MatchId, Match>>,
    period: SharedRatingPeriod,
    players: PlayerRegistry,
    storage: Arc<dyn Storage>,
    event_publisher: Arc<dyn EventPublisher>,
    lifetimes: MatchLifetimes,
    stats: RwLock<MatchHandlerStats>,
}

impl MatchHandler {
    pub fn new(
        period: SharedRatingPeriod,
        players: PlayerRegistry,
        storage: Arc<dyn Storage>,
        event_publisher: Arc<dyn EventPublisher>,
        lifetimes: MatchLifetimes,
    ) -> Self {
        Self {
            matches: Mutex::new(HashMap::new()),
            period,
            players,
            storage,
            event_publisher,
            lifetimes,
            stats: RwLock::new(MatchHandlerStats::default()),
        }
    }

    /// Start tracking a freshly created match
    pub async fn track(&self, game_match: Match) -> Result<()> {
        if game_match.state() != MatchState::Created {
            return Err(MatchmakingError::InvalidMatchData {
                reason: format!(
                    "Only created matches can be tracked, match {} is {}",
                    game_match.id,
                    game_match.state()
                ),
            }
            .into());
        }

        if let Err(e) = self.storage.save_match(&game_match).await {
            warn!("Failed to persist new match {}: {}", game_match.id, e);
        }

        debug!(
            "Tracking match {} ({} vs {}) on {}",
            game_match.id, game_match.player1, game_match.player2, game_match.queue
        );
        self.matches.lock().await.insert(game_match.id, game_match);
        self.update_stats(|stats| stats.matches_tracked += 1)?;
        Ok(())
    }

    /// Resume tracking persisted matches that had not ended; returns how many were restored
    pub async fn restore(&self, persisted: Vec<Match>) -> usize {
        let mut matches = self.matches.lock().await;
        let mut restored = 0;
        for game_match in persisted {
            if !game_match.state().is_terminal() {
                matches.insert(game_match.id, game_match);
                restored += 1;
            }
        }
        restored
    }

    /// Snapshot of a tracked match
    pub async fn get(&self, match_id: MatchId) -> Option<Match> {
        self.matches.lock().await.get(&match_id).cloned()
    }

    /// The active match a player is part of, if any
    pub async fn player_match(&self, player_id: &PlayerId) -> Option<Match> {
        self.matches
            .lock()
            .await
            .values()
            .find(|m| m.involves(player_id))
            .cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.matches.lock().await.len()
    }

    /// Both players are ready: move the match into play
    pub async fn start_match_at(&self, match_id: MatchId, now: DateTime<Utc>) -> Result<Match> {
        let event = {
            let mut matches = self.matches.lock().await;
            let game_match = matches
                .get_mut(&match_id)
                .ok_or_else(|| Self::not_found(match_id))?;
            game_match.start_at(now)?
        };

        info!(
            "Match {} started: {} vs {}",
            match_id, event.match_info.player1, event.match_info.player2
        );

        if let Err(e) = self.storage.save_match(&event.match_info).await {
            warn!("Failed to persist started match {}: {}", match_id, e);
        }
        self.update_stats(|stats| stats.matches_started += 1)?;

        let started = event.match_info.clone();
        if let Err(e) = self.event_publisher.publish_match_started(event).await {
            warn!("Failed to publish MatchStarted for {}: {}", match_id, e);
        }
        Ok(started)
    }

    /// Record the final scores and fold the match into the open rating period
    pub async fn report_score_at(
        &self,
        match_id: MatchId,
        player1_score: u32,
        player2_score: u32,
        now: DateTime<Utc>,
    ) -> Result<Match> {
        let event = {
            let mut matches = self.matches.lock().await;
            let mut completed = matches
                .get(&match_id)
                .cloned()
                .ok_or_else(|| Self::not_found(match_id))?;
            let event = completed.complete_at(now, player1_score, player2_score)?;

            // Saved under the period lock: writes land in append order and
            // never overwrite a period the coordinator has closed
            let mut period = self.period.lock().await;
            period.add_match(completed)?;
            matches.remove(&match_id);
            info!(
                "Match {} completed {}-{} and added to rating period {} ({} matches)",
                match_id,
                player1_score,
                player2_score,
                period.id,
                period.matches.len()
            );
            if let Err(e) = self.storage.save_rating_period(&period).await {
                warn!("Failed to persist open rating period {}: {}", period.id, e);
            }
            event
        };

        let completed = event.match_info.clone();
        if let Err(e) = self.storage.save_match(&completed).await {
            warn!("Failed to persist completed match {}: {}", match_id, e);
        }

        self.release_players(&completed, now).await;
        self.update_stats(|stats| stats.matches_completed += 1)?;

        if let Err(e) = self.event_publisher.publish_match_completed(event).await {
            warn!("Failed to publish MatchCompleted for {}: {}", match_id, e);
        }
        Ok(completed)
    }

    /// Abandon a created or in-progress match
    pub async fn cancel_match_at(
        &self,
        match_id: MatchId,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> Result<Match> {
        let event = {
            let mut matches = self.matches.lock().await;
            let game_match = matches
                .get_mut(&match_id)
                .ok_or_else(|| Self::not_found(match_id))?;
            let event = game_match.cancel_at(now, reason)?;
            matches.remove(&match_id);
            event
        };

        info!("Match {} cancelled ({})", match_id, reason);
        let cancelled = event.match_info.clone();
        self.finish_cancellation(&cancelled, now).await;

        if let Err(e) = self.event_publisher.publish_match_cancelled(event).await {
            warn!("Failed to publish MatchCancelled for {}: {}", match_id, e);
        }
        Ok(cancelled)
    }

    /// Cancel matches that stayed too long in created or in-progress
    pub async fn expire_stale_matches_at(&self, now: DateTime<Utc>) -> Result<Vec<Match>> {
        let events = {
            let mut matches = self.matches.lock().await;
            let stale: Vec<(MatchId, CancelReason)> = matches
                .values()
                .filter_map(|m| self.expiry_reason(m, now).map(|reason| (m.id, reason)))
                .collect();

            let mut events = Vec::with_capacity(stale.len());
            for (match_id, reason) in stale {
                if let Some(mut game_match) = matches.remove(&match_id) {
                    events.push(game_match.cancel_at(now, reason)?);
                }
            }
            events
        };

        let mut expired = Vec::with_capacity(events.len());
        for event in events {
            info!(
                "Match {} expired ({}): {} vs {}",
                event.match_info.id, event.reason, event.match_info.player1, event.match_info.player2
            );
            let cancelled = event.match_info.clone();
            self.finish_cancellation(&cancelled, now).await;

            if let Err(e) = self.event_publisher.publish_match_cancelled(event).await {
                warn!("Failed to publish MatchCancelled for {}: {}", cancelled.id, e);
            }
            expired.push(cancelled);
        }

        Ok(expired)
    }

    pub fn lifetimes(&self) -> MatchLifetimes {
        self.lifetimes
    }

    /// Get handler statistics
    pub async fn get_stats(&self) -> Result<MatchHandlerStats> {
        let active = self.active_count().await;
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire match stats lock".to_string(),
            })?;
        let mut snapshot = stats.clone();
        snapshot.active_matches = active;
        Ok(snapshot)
    }

    fn expiry_reason(&self, game_match: &Match, now: DateTime<Utc>) -> Option<CancelReason> {
        match game_match.state() {
            MatchState::Created if now - game_match.created_at() > self.lifetimes.pending => {
                Some(CancelReason::PendingTimeout)
            }
            MatchState::InProgress => game_match
                .start_time()
                .filter(|start| now - *start > self.lifetimes.in_progress)
                .map(|_| CancelReason::InProgressTimeout),
            _ => None,
        }
    }

    async fn finish_cancellation(&self, cancelled: &Match, now: DateTime<Utc>) {
        if let Err(e) = self.storage.save_match(cancelled).await {
            warn!("Failed to persist cancelled match {}: {}", cancelled.id, e);
        }
        self.release_players(cancelled, now).await;
        if let Err(e) = self.update_stats(|stats| stats.matches_cancelled += 1) {
            warn!("Failed to update match stats: {}", e);
        }
    }

    /// Clear the in-match flag of both players and persist them
    async fn release_players(&self, game_match: &Match, now: DateTime<Utc>) {
        let released = {
            let mut players = self.players.write().await;
            let mut released = Vec::with_capacity(2);
            for player_id in game_match.players() {
                match self
                    .players
                    .resolve(&mut players, player_id, false, now)
                    .await
                {
                    Ok(player) => {
                        player.release_from_match();
                        released.push(player.clone());
                    }
                    Err(e) => warn!(
                        "Could not release player '{}' from match {}: {}",
                        player_id, game_match.id, e
                    ),
                }
            }
            released
        };

        if let Err(e) = self.storage.save_players(&released).await {
            warn!(
                "Failed to persist players released from match {}: {}",
                game_match.id, e
            );
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut MatchHandlerStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire match stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }

    fn not_found(match_id: MatchId) -> anyhow::Error {
        MatchmakingError::MatchNotFound {
            match_id: match_id.to_string(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::player::Player;
    use crate::rating::period::RatingPeriod;
    use crate::storage::InMemoryStorage;
    use crate::types::{QueueKey, RatingTriplet};
    use crate::utils::current_timestamp;

    struct Harness {
        handler: MatchHandler,
        period: SharedRatingPeriod,
        players: PlayerRegistry,
        publisher: Arc<MockEventPublisher>,
    }

    async fn harness() -> Harness {
        let storage = Arc::new(InMemoryStorage::new());
        let players = PlayerRegistry::new(storage.clone(), RatingTriplet::default());
        let period = RatingPeriod::shared(RatingPeriod::new(
            current_timestamp() - Duration::hours(1),
            Duration::hours(72),
        ));
        let publisher = Arc::new(MockEventPublisher::new());

        {
            let mut map = players.write().await;
            for id in ["alice", "bob"] {
                let mut player = Player::new(id, RatingTriplet::default(), current_timestamp());
                player.mark_in_match();
                map.insert(id.to_string(), player);
            }
        }

        let handler = MatchHandler::new(
            period.clone(),
            players.clone(),
            storage,
            publisher.clone(),
            MatchLifetimes::default(),
        );

        Harness {
            handler,
            period,
            players,
            publisher,
        }
    }

    fn new_match(now: DateTime<Utc>) -> Match {
        Match::new("alice", "bob", QueueKey::new("PC", "Default"), now).unwrap()
    }

    #[tokio::test]
    async fn test_completion_hands_match_to_period() {
        let h = harness().await;
        let now = current_timestamp();
        let game_match = new_match(now);
        let match_id = game_match.id;

        h.handler.track(game_match).await.unwrap();
        assert!(h.handler.player_match(&"bob".to_string()).await.is_some());

        h.handler.start_match_at(match_id, now).await.unwrap();
        let completed = h
            .handler
            .report_score_at(match_id, 10, 7, now + Duration::minutes(8))
            .await
            .unwrap();

        assert_eq!(completed.state(), MatchState::Completed);
        assert_eq!(h.handler.active_count().await, 0);
        assert!(h.handler.player_match(&"alice".to_string()).await.is_none());

        let period = h.period.lock().await;
        assert_eq!(period.matches.len(), 1);
        assert_eq!(period.matches[0].id, match_id);
        drop(period);

        let players = h.players.read().await;
        assert!(!players["alice"].in_match);
        assert!(!players["bob"].in_match);
        drop(players);

        assert_eq!(
            h.publisher.get_published_events(),
            vec!["MatchStarted".to_string(), "MatchCompleted".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_report_keeps_match_tracked() {
        let h = harness().await;
        let now = current_timestamp();
        let game_match = new_match(now);
        let match_id = game_match.id;
        h.handler.track(game_match).await.unwrap();

        // Not started yet
        assert!(h
            .handler
            .report_score_at(match_id, 10, 7, now + Duration::minutes(1))
            .await
            .is_err());

        h.handler.start_match_at(match_id, now).await.unwrap();
        // Draws are rejected
        assert!(h
            .handler
            .report_score_at(match_id, 7, 7, now + Duration::minutes(1))
            .await
            .is_err());

        let tracked = h.handler.get(match_id).await.unwrap();
        assert_eq!(tracked.state(), MatchState::InProgress);
        assert!(h.period.lock().await.matches.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_match_is_not_found() {
        let h = harness().await;
        let err = h
            .handler
            .start_match_at(uuid::Uuid::new_v4(), current_timestamp())
            .await
            .unwrap_err();
        assert!(matches!(
            MatchmakingError::kind_of(&err),
            Some(MatchmakingError::MatchNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_expiry_cancels_stale_matches() {
        let h = harness().await;
        let created_at = current_timestamp();
        let game_match = new_match(created_at);
        let match_id = game_match.id;
        h.handler.track(game_match).await.unwrap();

        let expired = h
            .handler
            .expire_stale_matches_at(created_at + Duration::minutes(4))
            .await
            .unwrap();
        assert!(expired.is_empty());

        let expired = h
            .handler
            .expire_stale_matches_at(created_at + Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, match_id);
        assert_eq!(expired[0].state(), MatchState::Cancelled);
        assert_eq!(h.handler.active_count().await, 0);
        assert!(!h.players.read().await["alice"].in_match);
        assert_eq!(h.publisher.get_published_events(), vec!["MatchCancelled"]);
    }

    #[tokio::test]
    async fn test_in_progress_expiry_uses_start_time() {
        let h = harness().await;
        let created_at = current_timestamp();
        let game_match = new_match(created_at);
        let match_id = game_match.id;
        h.handler.track(game_match).await.unwrap();

        let started_at = created_at + Duration::minutes(4);
        h.handler.start_match_at(match_id, started_at).await.unwrap();

        let expired = h
            .handler
            .expire_stale_matches_at(started_at + Duration::minutes(59))
            .await
            .unwrap();
        assert!(expired.is_empty());

        let expired = h
            .handler
            .expire_stale_matches_at(started_at + Duration::minutes(61))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        let stats = h.handler.get_stats().await.unwrap();
        assert_eq!(stats.matches_cancelled, 1);
        assert_eq!(stats.matches_started, 1);
    }

    #[tokio::test]
    async fn test_explicit_cancel() {
        let h = harness().await;
        let now = current_timestamp();
        let game_match = new_match(now);
        let match_id = game_match.id;
        h.handler.track(game_match).await.unwrap();

        let cancelled = h
            .handler
            .cancel_match_at(match_id, CancelReason::Requested, now)
            .await
            .unwrap();
        assert_eq!(cancelled.state(), MatchState::Cancelled);
        assert!(h
            .handler
            .cancel_match_at(match_id, CancelReason::Requested, now)
            .await
            .is_err());
    }
}

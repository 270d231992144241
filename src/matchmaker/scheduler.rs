//! The matchmaker scan
//!
//! Each tick ages tolerances, then walks every sub-queue in sorted key order
//! and pairs waiting players in join order. A player is paired at most once
//! per tick, even when waiting in several sub-queues.

use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::matches::{Match, MatchHandler};
use crate::matchmaker::compatibility::{Candidate, PairingRule};
use crate::player::{PlayerMap, PlayerRegistry};
use crate::queue::{QueueManager, QueuedPlayer};
use crate::types::{PlayerId, QueueKey};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Statistics about matchmaking scans
#[derive(Debug, Clone, Default)]
pub struct MatchmakerStats {
    pub ticks: u64,
    pub pairs_made: u64,
    pub tolerance_widenings: u64,
    pub last_tick_duration_ms: u64,
}

pub struct Matchmaker {
    queues: Arc<QueueManager>,
    players: PlayerRegistry,
    handler: Arc<MatchHandler>,
    rule: Box<dyn PairingRule>,
    event_publisher: Arc<dyn EventPublisher>,
    stats: RwLock<MatchmakerStats>,
}

impl Matchmaker {
    pub fn new(
        queues: Arc<QueueManager>,
        players: PlayerRegistry,
        handler: Arc<MatchHandler>,
        rule: Box<dyn PairingRule>,
        event_publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            queues,
            players,
            handler,
            rule,
            event_publisher,
            stats: RwLock::new(MatchmakerStats::default()),
        }
    }

    pub fn rule_name(&self) -> &'static str {
        self.rule.name()
    }

    /// Run one scan and return the matches it created
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<Vec<Match>> {
        let started = Instant::now();
        let widened = self.queues.age_tolerances_at(now)?;

        let (created, changed_players) = {
            let mut players = self.players.write().await;
            let created = self.pair_waiting_players(&players, now)?;

            for game_match in &created {
                for player_id in game_match.players() {
                    if let Some(player) = players.get_mut(player_id) {
                        player.mark_in_match();
                        player.add_match(game_match)?;
                    }
                    self.queues.dequeue_everywhere(player_id)?;
                }
            }

            let mut changed = Vec::new();
            for player in players.values_mut().filter(|p| p.in_queue) {
                if let Some(tolerance) = self.queues.tolerance_of(&player.id)? {
                    if tolerance != player.tolerance {
                        player.tolerance = tolerance;
                        changed.push(player.clone());
                    }
                }
            }
            for game_match in &created {
                for player_id in game_match.players() {
                    if let Some(player) = players.get(player_id) {
                        changed.push(player.clone());
                    }
                }
            }

            (created, changed)
        };

        if !changed_players.is_empty() {
            if let Err(e) = self
                .players
                .storage()
                .save_players(&changed_players)
                .await
            {
                warn!("Failed to persist {} player records: {}", changed_players.len(), e);
            }
        }

        for game_match in &created {
            info!(
                "🎮 Match {} created on {}: {} vs {}",
                game_match.id, game_match.queue, game_match.player1, game_match.player2
            );
            self.handler.track(game_match.clone()).await?;
            if let Err(e) = self
                .event_publisher
                .publish_match_created(game_match.created_event())
                .await
            {
                warn!("Failed to publish MatchCreated for {}: {}", game_match.id, e);
            }
        }

        let elapsed = started.elapsed().as_millis() as u64;
        let pairs = created.len() as u64;
        self.update_stats(|stats| {
            stats.ticks += 1;
            stats.pairs_made += pairs;
            stats.tolerance_widenings += widened as u64;
            stats.last_tick_duration_ms = elapsed;
        })?;

        debug!(
            "Matchmaking tick: {} pairs, {} tolerances widened, {}ms",
            pairs, widened, elapsed
        );
        Ok(created)
    }

    /// Pair waiting players across every sub-queue
    fn pair_waiting_players(&self, players: &PlayerMap, now: DateTime<Utc>) -> Result<Vec<Match>> {
        let snapshot = self.queues.snapshot_all()?;
        let mut paired: HashSet<PlayerId> = HashSet::new();
        let mut created = Vec::new();

        for (key, entries) in snapshot {
            let candidates = Self::candidates(&entries, players, &paired);
            for (first, second) in self.pair_queue(&candidates) {
                let game_match = Match::new(first.clone(), second.clone(), key.clone(), now)?;
                paired.insert(first);
                paired.insert(second);
                created.push(game_match);
            }
        }

        Ok(created)
    }

    /// Unpaired, idle players of one sub-queue, in join order
    fn candidates(
        entries: &[QueuedPlayer],
        players: &PlayerMap,
        paired: &HashSet<PlayerId>,
    ) -> Vec<Candidate> {
        entries
            .iter()
            .filter(|entry| !entry.in_match && !paired.contains(&entry.player_id))
            .filter_map(|entry| match players.get(&entry.player_id) {
                Some(player) if !player.in_match => Some(Candidate::new(
                    entry.player_id.clone(),
                    player.rating,
                    entry.tolerance,
                )),
                Some(_) => None,
                None => {
                    warn!("Queued player {} has no record, skipping", entry.player_id);
                    None
                }
            })
            .collect()
    }

    /// First-fit pairing in join order
    fn pair_queue(&self, candidates: &[Candidate]) -> Vec<(PlayerId, PlayerId)> {
        let mut taken = vec![false; candidates.len()];
        let mut pairs = Vec::new();

        for i in 0..candidates.len() {
            if taken[i] {
                continue;
            }
            for j in (i + 1)..candidates.len() {
                if taken[j] {
                    continue;
                }
                if self.rule.compatible(&candidates[i], &candidates[j]) {
                    taken[i] = true;
                    taken[j] = true;
                    pairs.push((
                        candidates[i].player_id.clone(),
                        candidates[j].player_id.clone(),
                    ));
                    break;
                }
            }
        }

        pairs
    }

    /// Queue keys the matchmaker scans
    pub fn queue_keys(&self) -> Result<Vec<QueueKey>> {
        self.queues.keys()
    }

    /// Get matchmaker statistics
    pub fn get_stats(&self) -> Result<MatchmakerStats> {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire matchmaker stats lock".to_string(),
                }
                .into()
            })
    }

    fn update_stats(&self, update: impl FnOnce(&mut MatchmakerStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire matchmaker stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::matches::MatchLifetimes;
    use crate::matchmaker::compatibility::IntervalOverlapRule;
    use crate::player::Player;
    use crate::queue::ToleranceSettings;
    use crate::rating::RatingPeriod;
    use crate::storage::InMemoryStorage;
    use crate::types::RatingTriplet;
    use crate::utils::current_timestamp;
    use chrono::Duration;

    struct Harness {
        matchmaker: Matchmaker,
        queues: Arc<QueueManager>,
        players: PlayerRegistry,
        handler: Arc<MatchHandler>,
        publisher: Arc<MockEventPublisher>,
    }

    fn pc() -> QueueKey {
        QueueKey::new("PC", "Default")
    }

    fn harness() -> Harness {
        let storage = Arc::new(InMemoryStorage::new());
        let players = PlayerRegistry::new(storage.clone(), RatingTriplet::default());
        let queues = Arc::new(QueueManager::new(
            vec![pc(), QueueKey::new("PC", "Ranked")],
            ToleranceSettings::default(),
        ));
        let publisher = Arc::new(MockEventPublisher::new());
        let period = RatingPeriod::shared(RatingPeriod::new(
            current_timestamp(),
            Duration::hours(72),
        ));
        let handler = Arc::new(MatchHandler::new(
            period,
            players.clone(),
            storage,
            publisher.clone(),
            MatchLifetimes::default(),
        ));
        let matchmaker = Matchmaker::new(
            queues.clone(),
            players.clone(),
            handler.clone(),
            Box::new(IntervalOverlapRule::default()),
            publisher.clone(),
        );

        Harness {
            matchmaker,
            queues,
            players,
            handler,
            publisher,
        }
    }

    async fn enqueue(h: &Harness, id: &str, rating: f64, deviation: f64, key: &QueueKey, now: DateTime<Utc>) {
        let mut players = h.players.write().await;
        let player = players
            .entry(id.to_string())
            .or_insert_with(|| Player::new(id, RatingTriplet::new(rating, deviation, 0.06), now));
        player.mark_queued(now);
        h.queues.enqueue_at(&id.to_string(), key, now).unwrap();
    }

    #[tokio::test]
    async fn test_pairs_compatible_players() {
        let h = harness();
        let now = current_timestamp();
        enqueue(&h, "alice", 1500.0, 140.0, &pc(), now).await;
        enqueue(&h, "bob", 1500.0, 140.0, &pc(), now).await;

        let created = h.matchmaker.tick_at(now).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].player1, "alice");
        assert_eq!(created[0].player2, "bob");

        assert_eq!(h.queues.waiting_count().unwrap(), 0);
        let players = h.players.read().await;
        assert!(players["alice"].in_match);
        assert!(!players["alice"].in_queue);
        assert_eq!(players["bob"].match_history, vec![created[0].id]);
        drop(players);

        assert_eq!(h.handler.active_count().await, 1);
        assert_eq!(h.publisher.get_published_events(), vec!["MatchCreated"]);
    }

    #[tokio::test]
    async fn test_join_order_decides_partner() {
        let h = harness();
        let now = current_timestamp();
        enqueue(&h, "first", 1500.0, 100.0, &pc(), now).await;
        enqueue(&h, "second", 1550.0, 100.0, &pc(), now).await;
        enqueue(&h, "third", 1500.0, 100.0, &pc(), now).await;

        let created = h.matchmaker.tick_at(now).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].player1, "first");
        assert_eq!(created[0].player2, "second");
        assert_eq!(
            h.queues.snapshot(&pc()).unwrap()[0].player_id,
            "third".to_string()
        );
    }

    #[tokio::test]
    async fn test_player_paired_once_across_queues() {
        let h = harness();
        let now = current_timestamp();
        let ranked = QueueKey::new("PC", "Ranked");
        enqueue(&h, "alice", 1500.0, 100.0, &pc(), now).await;
        enqueue(&h, "alice", 1500.0, 100.0, &ranked, now).await;
        enqueue(&h, "bob", 1500.0, 100.0, &pc(), now).await;
        enqueue(&h, "carol", 1500.0, 100.0, &ranked, now).await;

        let created = h.matchmaker.tick_at(now).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].queue, pc());
        assert!(!h.queues.is_queued(&"alice".to_string(), &ranked).unwrap());
        assert!(h.queues.is_queued(&"carol".to_string(), &ranked).unwrap());
    }

    #[tokio::test]
    async fn test_incompatible_players_wait() {
        let h = harness();
        let now = current_timestamp();
        enqueue(&h, "low", 1500.0, 50.0, &pc(), now).await;
        enqueue(&h, "high", 2200.0, 50.0, &pc(), now).await;

        assert!(h.matchmaker.tick_at(now).await.unwrap().is_empty());
        assert_eq!(h.queues.waiting_count().unwrap(), 2);

        let later = now + Duration::seconds(181);
        assert!(h.matchmaker.tick_at(later).await.unwrap().is_empty());
        assert_eq!(h.players.read().await["low"].tolerance, 25.0);

        let stats = h.matchmaker.get_stats().unwrap();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.pairs_made, 0);
        assert_eq!(stats.tolerance_widenings, 2);
    }
}

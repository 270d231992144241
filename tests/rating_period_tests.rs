//! Rating-period rotation tests
//!
//! Rotation must be all-or-nothing: a failed calculation or a failed
//! closed-period write leaves every authoritative triplet and the period's
//! matches untouched, and the next tick tries again. Once the closed period
//! is written, player records that missed the update are replayed at startup.

mod fixtures;

use async_trait::async_trait;
use chrono::Duration;
use fixtures::{pc_default, seed_player, t0, TestSystem};
use mockall::mock;
use ranked_arena::error::{MatchmakingError, Result};
use ranked_arena::matches::{Match, MatchOutcome};
use ranked_arena::player::Player;
use ranked_arena::rating::{GameResult, MockRatingCalculator, RatingCalculator, RatingPeriod};
use ranked_arena::storage::{InMemoryStorage, MockStorage, Storage};
use ranked_arena::types::{MatchId, PlayerId, RatingPeriodId, RatingTriplet};
use std::sync::Arc;

mock! {
    pub Calculator {}

    impl RatingCalculator for Calculator {
        fn rate(
            &self,
            player_id: &PlayerId,
            current: &RatingTriplet,
            results: &[GameResult],
        ) -> Result<RatingTriplet>;

        fn initial_rating(&self) -> RatingTriplet;

        fn config(&self) -> serde_json::Value;
    }
}

/// Storage whose open-period write with a single match is slow
struct SlowPeriodStorage {
    inner: InMemoryStorage,
}

impl SlowPeriodStorage {
    fn new() -> Self {
        Self {
            inner: InMemoryStorage::new(),
        }
    }
}

#[async_trait]
impl Storage for SlowPeriodStorage {
    async fn get_player(&self, player_id: &PlayerId) -> Result<Option<Player>> {
        self.inner.get_player(player_id).await
    }

    async fn save_player(&self, player: &Player) -> Result<()> {
        self.inner.save_player(player).await
    }

    async fn save_players(&self, players: &[Player]) -> Result<()> {
        self.inner.save_players(players).await
    }

    async fn list_players(&self) -> Result<Vec<Player>> {
        self.inner.list_players().await
    }

    async fn get_match(&self, match_id: MatchId) -> Result<Option<Match>> {
        self.inner.get_match(match_id).await
    }

    async fn save_match(&self, game_match: &Match) -> Result<()> {
        self.inner.save_match(game_match).await
    }

    async fn list_matches(&self) -> Result<Vec<Match>> {
        self.inner.list_matches().await
    }

    async fn get_rating_period(&self, period_id: RatingPeriodId) -> Result<Option<RatingPeriod>> {
        self.inner.get_rating_period(period_id).await
    }

    async fn save_rating_period(&self, period: &RatingPeriod) -> Result<()> {
        if !period.closed && period.matches.len() == 1 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        self.inner.save_rating_period(period).await
    }

    async fn list_rating_periods(&self) -> Result<Vec<RatingPeriod>> {
        self.inner.list_rating_periods().await
    }
}

/// Three players: alice beats bob, then bob beats carol
async fn played_period(system: &TestSystem) {
    for (id, rating) in [("alice", 1500.0), ("bob", 1480.0), ("carol", 1520.0)] {
        seed_player(system.storage.as_ref(), id, rating, 140.0).await;
    }

    let joined = t0() + Duration::minutes(1);
    system.enqueue("alice", &pc_default(), joined).await;
    system.enqueue("bob", &pc_default(), joined).await;
    let first = system.pair_one(joined).await;
    system.play(&first, joined + Duration::minutes(1)).await;

    let rejoined = joined + Duration::hours(1);
    system.enqueue("bob", &pc_default(), rejoined).await;
    system.enqueue("carol", &pc_default(), rejoined).await;
    let second = system.pair_one(rejoined).await;
    assert_eq!(second.player1, "bob");
    system.play(&second, rejoined + Duration::minutes(1)).await;

    assert_eq!(system.coordinator.current_period().await.matches.len(), 2);
}

async fn ratings(system: &TestSystem) -> Vec<(f64, f64)> {
    let mut ratings = Vec::new();
    for id in ["alice", "bob", "carol"] {
        let player = system.player(id).await;
        assert!(player.working.is_none());
        let stored = system
            .storage
            .get_player(&id.to_string())
            .await
            .unwrap()
            .unwrap();
        ratings.push((player.rating.rating, stored.rating.rating));
    }
    ratings
}

#[tokio::test]
async fn test_each_participant_is_rated_once_with_their_own_games() {
    let mut calculator = MockCalculator::new();
    calculator
        .expect_rate()
        .withf(|id, _, results| {
            id == "alice" && results.len() == 1 && results[0].outcome == MatchOutcome::Win
        })
        .times(1)
        .returning(|_, current, _| Ok(RatingTriplet::new(current.rating + 50.0, 120.0, 0.06)));
    calculator
        .expect_rate()
        .withf(|id, _, results| id == "bob" && results.len() == 2)
        .times(1)
        .returning(|_, current, _| Ok(*current));
    calculator
        .expect_rate()
        .withf(|id, current, results| {
            id == "carol"
                && current.rating == 1520.0
                && results.len() == 1
                && results[0].opponent_id == "bob"
                && results[0].opponent.rating == 1480.0
                && results[0].outcome == MatchOutcome::Loss
        })
        .times(1)
        .returning(|_, current, _| Ok(RatingTriplet::new(current.rating - 50.0, 120.0, 0.06)));
    calculator.expect_initial_rating().never();

    let system = TestSystem::builder()
        .calculator(Arc::new(calculator))
        .build()
        .await;
    played_period(&system).await;

    let end = system.period_end().await;
    let ended = system
        .coordinator
        .tick_at(end + Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(ended.rating_changes.len(), 3);
    assert_eq!(system.player("alice").await.rating.rating, 1550.0);
    assert_eq!(system.player("bob").await.rating.rating, 1480.0);
    assert_eq!(system.player("carol").await.rating.rating, 1470.0);
}

#[tokio::test]
async fn test_failed_calculation_changes_nothing_and_retries() {
    let calculator = Arc::new(MockRatingCalculator::new());
    calculator.fail_for("carol");
    let system = TestSystem::builder()
        .calculator(calculator.clone())
        .build()
        .await;
    played_period(&system).await;

    let before = ratings(&system).await;
    let period = system.coordinator.current_period().await;
    let after_end = period.end_time() + Duration::seconds(1);

    let err = system.coordinator.tick_at(after_end).await.unwrap_err();
    assert!(matches!(
        MatchmakingError::kind_of(&err),
        Some(MatchmakingError::RatingCalculationFailed { .. })
    ));

    // Nobody moved, the period is still open with both matches
    assert_eq!(ratings(&system).await, before);
    let still_open = system.coordinator.current_period().await;
    assert_eq!(still_open.id, period.id);
    assert!(!still_open.closed);
    assert_eq!(still_open.matches.len(), 2);
    assert_eq!(system.publisher.count("RatingPeriodEnded"), 0);
    assert_eq!(system.coordinator.get_stats().unwrap().failed_rotations, 1);

    // The next tick succeeds once the failure clears
    calculator.clear_failures();
    let ended = system
        .coordinator
        .tick_at(after_end + Duration::seconds(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ended.period.id, period.id);
    assert_eq!(ended.period.matches.len(), 2);
    assert_ne!(ratings(&system).await, before);
}

#[tokio::test]
async fn test_failed_period_write_changes_nothing() {
    let storage = Arc::new(MockStorage::new());
    let system = TestSystem::builder()
        .storage(storage.clone())
        .build()
        .await;
    played_period(&system).await;

    let before = ratings(&system).await;
    let period = system.coordinator.current_period().await;

    storage.set_fail_period_writes(true);
    assert!(system
        .coordinator
        .tick_at(period.end_time() + Duration::seconds(1))
        .await
        .is_err());
    storage.set_fail_period_writes(false);

    assert_eq!(ratings(&system).await, before);
    let open = system.coordinator.current_period().await;
    assert_eq!(open.id, period.id);
    assert_eq!(open.matches.len(), 2);

    assert!(system
        .coordinator
        .tick_at(period.end_time() + Duration::seconds(6))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_restart_after_partial_player_write_rates_nobody_twice() {
    let storage = Arc::new(MockStorage::new());
    let calculator = Arc::new(MockRatingCalculator::new());
    let system = TestSystem::builder()
        .storage(storage.clone())
        .calculator(calculator.clone())
        .build()
        .await;
    played_period(&system).await;

    let period = system.coordinator.current_period().await;
    storage.set_fail_player_batch_after(Some(1));
    let ended = system
        .coordinator
        .tick_at(period.end_time() + Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();
    storage.set_fail_player_batch_after(None);

    let expected: Vec<(String, f64)> = ended
        .rating_changes
        .iter()
        .map(|change| (change.player_id.clone(), change.new_rating.rating))
        .collect();
    let stored_carol = storage.get_player(&"carol".to_string()).await.unwrap().unwrap();
    assert_ne!(stored_carol.rating.rating, system.player("carol").await.rating.rating);

    // A new process over the same storage picks up the committed ratings
    calculator.clear_calls();
    let restarted = TestSystem::builder()
        .storage(storage.clone())
        .calculator(calculator.clone())
        .build()
        .await;
    for (id, rating) in &expected {
        assert_eq!(restarted.player(id).await.rating.rating, *rating);
    }

    let open = restarted.coordinator.current_period().await;
    assert_ne!(open.id, period.id);
    assert!(open.matches.is_empty());
    assert!(restarted
        .coordinator
        .tick_at(open.end_time() + Duration::seconds(1))
        .await
        .unwrap()
        .is_some());
    assert!(calculator.get_calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_reports_persist_every_completed_match() {
    let storage = Arc::new(SlowPeriodStorage::new());
    let system = Arc::new(
        TestSystem::builder()
            .storage(storage.clone())
            .build()
            .await,
    );

    let joined = t0() + Duration::minutes(1);
    for id in ["alice", "bob", "carol", "dave"] {
        system.enqueue(id, &pc_default(), joined).await;
    }
    let created = system.matchmaker.tick_at(joined).await.unwrap();
    assert_eq!(created.len(), 2);
    let started = joined + Duration::minutes(1);
    for game_match in &created {
        system
            .handler
            .start_match_at(game_match.id, started)
            .await
            .unwrap();
    }

    let reported = started + Duration::minutes(10);
    let first = {
        let system = system.clone();
        let id = created[0].id;
        tokio::spawn(async move { system.service.report_score_at(id, 10, 4, reported).await })
    };
    // Let the first report reach its slow period write
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    system
        .service
        .report_score_at(created[1].id, 6, 10, reported)
        .await
        .unwrap();
    first.await.unwrap().unwrap();

    let in_memory = system.coordinator.current_period().await;
    let persisted = storage
        .get_rating_period(in_memory.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(in_memory.matches.len(), 2);
    assert_eq!(persisted.matches.len(), in_memory.matches.len());
}

#[tokio::test]
async fn test_match_completed_after_rotation_joins_next_period() {
    let system = TestSystem::new().await;
    let joined = t0() + Duration::minutes(1);
    system.enqueue("alice", &pc_default(), joined).await;
    system.enqueue("bob", &pc_default(), joined).await;
    let game_match = system.pair_one(joined).await;

    let first = system.coordinator.current_period().await;
    let end = first.end_time();
    system
        .handler
        .start_match_at(game_match.id, end - Duration::minutes(10))
        .await
        .unwrap();

    // The empty period rotates while the match is still being played
    let ended = system
        .coordinator
        .tick_at(end + Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();
    assert!(ended.period.matches.is_empty());
    assert!(ended.rating_changes.is_empty());

    system
        .service
        .report_score_at(game_match.id, 3, 10, end + Duration::minutes(5))
        .await
        .unwrap();

    let second = system.coordinator.current_period().await;
    assert_ne!(second.id, first.id);
    assert_eq!(second.matches.len(), 1);
    assert_eq!(second.matches[0].id, game_match.id);
}

#[tokio::test]
async fn test_concurrent_completion_and_rotation_count_the_match_once() {
    for _ in 0..20 {
        let system = Arc::new(TestSystem::new().await);
        let joined = t0() + Duration::minutes(1);
        system.enqueue("alice", &pc_default(), joined).await;
        system.enqueue("bob", &pc_default(), joined).await;
        let game_match = system.pair_one(joined).await;

        let end = system.period_end().await;
        system
            .handler
            .start_match_at(game_match.id, end - Duration::minutes(10))
            .await
            .unwrap();

        let completing = {
            let system = system.clone();
            tokio::spawn(async move {
                system
                    .service
                    .report_score_at(game_match.id, 10, 2, end + Duration::seconds(2))
                    .await
            })
        };
        let rotating = {
            let system = system.clone();
            tokio::spawn(async move {
                system
                    .coordinator
                    .tick_at(end + Duration::seconds(1))
                    .await
            })
        };

        completing.await.unwrap().unwrap();
        let ended = rotating.await.unwrap().unwrap().unwrap();

        let in_closed = ended
            .period
            .matches
            .iter()
            .filter(|m| m.id == game_match.id)
            .count();
        let in_open = system
            .coordinator
            .current_period()
            .await
            .matches
            .iter()
            .filter(|m| m.id == game_match.id)
            .count();
        assert_eq!(in_closed + in_open, 1);
    }
}

#[tokio::test]
async fn test_backlog_of_expired_periods_drains_one_per_tick() {
    let system = TestSystem::builder()
        .period_start(t0() - Duration::hours(24 * 3))
        .period_hours(24)
        .build()
        .await;

    let now = t0() + Duration::minutes(1);
    let mut rotations = 0;
    while system.coordinator.tick_at(now).await.unwrap().is_some() {
        rotations += 1;
        assert!(rotations <= 10, "rotation should stop once caught up");
    }

    // Periods ending at t0-48h, t0-24h and t0 have all expired
    assert_eq!(rotations, 3);
    let open = system.coordinator.current_period().await;
    assert_eq!(open.start_time, t0());
    assert!(!open.is_expired_at(now));

    let stored = system.storage.list_rating_periods().await.unwrap();
    assert_eq!(stored.iter().filter(|p| p.closed).count(), 3);
}

//! Test fixtures shared by the integration tests
//!
//! `TestSystem` wires the real components together the way the service does,
//! but leaves the clock to the test: every operation is driven through the
//! `*_at` variants.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ranked_arena::amqp::publisher::EventPublisher;
use ranked_arena::config::RatingSettings;
use ranked_arena::error::Result;
use ranked_arena::matches::{Match, MatchHandler, MatchLifetimes};
use ranked_arena::matchmaker::{IntervalOverlapRule, Matchmaker};
use ranked_arena::player::{Player, PlayerRegistry};
use ranked_arena::queue::{QueueManager, ToleranceSettings};
use ranked_arena::rating::{
    MockRatingCalculator, RatingCalculator, RatingPeriod, RatingPeriodCoordinator,
};
use ranked_arena::service::MatchmakingService;
use ranked_arena::storage::{InMemoryStorage, Storage};
use ranked_arena::types::{
    MatchCancelled, MatchCompleted, MatchCreated, MatchStarted, MatchmakingEvent, QueueKey,
    RatingPeriodEnded, RatingTriplet,
};
use std::sync::{Arc, Mutex};

/// Publisher that keeps every event it is handed
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<MatchmakingEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MatchmakingEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Event names in publication order
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }

    pub fn periods_ended(&self) -> Vec<RatingPeriodEnded> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MatchmakingEvent::RatingPeriodEnded(ended) => Some(ended),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: MatchmakingEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_match_created(&self, event: MatchCreated) -> Result<()> {
        self.record(MatchmakingEvent::MatchCreated(event));
        Ok(())
    }

    async fn publish_match_started(&self, event: MatchStarted) -> Result<()> {
        self.record(MatchmakingEvent::MatchStarted(event));
        Ok(())
    }

    async fn publish_match_completed(&self, event: MatchCompleted) -> Result<()> {
        self.record(MatchmakingEvent::MatchCompleted(event));
        Ok(())
    }

    async fn publish_match_cancelled(&self, event: MatchCancelled) -> Result<()> {
        self.record(MatchmakingEvent::MatchCancelled(event));
        Ok(())
    }

    async fn publish_rating_period_ended(&self, event: RatingPeriodEnded) -> Result<()> {
        self.record(MatchmakingEvent::RatingPeriodEnded(event));
        Ok(())
    }
}

/// Fixed reference time so period boundaries are predictable
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn pc_default() -> QueueKey {
    QueueKey::new("PC", "Default")
}

pub fn pc_ranked() -> QueueKey {
    QueueKey::new("PC", "Ranked")
}

pub fn triplet(rating: f64, deviation: f64) -> RatingTriplet {
    RatingTriplet::new(rating, deviation, 0.06)
}

/// Persist a player with a known rating before the registry ever sees them
pub async fn seed_player(storage: &dyn Storage, id: &str, rating: f64, deviation: f64) -> Player {
    let player = Player::new(id, triplet(rating, deviation), t0() - Duration::days(30));
    storage.save_player(&player).await.unwrap();
    player
}

pub struct TestSystem {
    pub storage: Arc<dyn Storage>,
    pub players: PlayerRegistry,
    pub queues: Arc<QueueManager>,
    pub handler: Arc<MatchHandler>,
    pub matchmaker: Arc<Matchmaker>,
    pub coordinator: Arc<RatingPeriodCoordinator>,
    pub service: MatchmakingService,
    pub publisher: Arc<RecordingPublisher>,
}

impl TestSystem {
    pub fn builder() -> TestSystemBuilder {
        TestSystemBuilder::default()
    }

    /// Default system: in-memory storage, mock calculator, one 72h period from `t0`
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub async fn player(&self, id: &str) -> Player {
        self.players
            .get(&id.to_string())
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("player {} should exist", id))
    }

    pub async fn enqueue(&self, id: &str, key: &QueueKey, now: DateTime<Utc>) {
        self.service
            .enqueue_at(&id.to_string(), key, now)
            .await
            .unwrap();
    }

    /// Run the matchmaker once and expect exactly one pairing
    pub async fn pair_one(&self, now: DateTime<Utc>) -> Match {
        let mut created = self.matchmaker.tick_at(now).await.unwrap();
        assert_eq!(created.len(), 1, "expected exactly one match");
        created.remove(0)
    }

    /// Start and score a match, `player1` winning
    pub async fn play(&self, game_match: &Match, started: DateTime<Utc>) -> Match {
        self.handler
            .start_match_at(game_match.id, started)
            .await
            .unwrap();
        self.service
            .report_score_at(game_match.id, 10, 7, started + Duration::minutes(20))
            .await
            .unwrap()
    }

    pub async fn period_end(&self) -> DateTime<Utc> {
        self.coordinator.current_period().await.end_time()
    }
}

pub struct TestSystemBuilder {
    storage: Option<Arc<dyn Storage>>,
    calculator: Option<Arc<dyn RatingCalculator>>,
    keys: Vec<QueueKey>,
    tolerance: ToleranceSettings,
    window: f64,
    period_start: DateTime<Utc>,
    period_hours: u64,
    lifetimes: MatchLifetimes,
    first_to: u32,
}

impl Default for TestSystemBuilder {
    fn default() -> Self {
        Self {
            storage: None,
            calculator: None,
            keys: vec![pc_default(), pc_ranked(), QueueKey::new("Switch", "Default")],
            tolerance: ToleranceSettings::default(),
            window: 0.0,
            period_start: t0(),
            period_hours: 72,
            lifetimes: MatchLifetimes::default(),
            first_to: 10,
        }
    }
}

impl TestSystemBuilder {
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn calculator(mut self, calculator: Arc<dyn RatingCalculator>) -> Self {
        self.calculator = Some(calculator);
        self
    }

    pub fn tolerance(mut self, tolerance: ToleranceSettings) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn period_start(mut self, start: DateTime<Utc>) -> Self {
        self.period_start = start;
        self
    }

    pub fn period_hours(mut self, hours: u64) -> Self {
        self.period_hours = hours;
        self
    }

    pub fn lifetimes(mut self, lifetimes: MatchLifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    /// Build the components and resume whatever the storage already holds
    pub async fn build(self) -> TestSystem {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let calculator = self
            .calculator
            .unwrap_or_else(|| Arc::new(MockRatingCalculator::new()));
        let publisher = Arc::new(RecordingPublisher::new());
        let events: Arc<dyn EventPublisher> = publisher.clone();

        let settings = RatingSettings {
            period_start: Some(self.period_start),
            period_length_hours: self.period_hours,
            ..RatingSettings::default()
        };
        let players = PlayerRegistry::new(storage.clone(), settings.default_triplet());
        let period = RatingPeriodCoordinator::load_or_create(storage.as_ref(), &settings, t0())
            .await
            .unwrap();
        let period = RatingPeriod::shared(period);

        let handler = Arc::new(MatchHandler::new(
            period.clone(),
            players.clone(),
            storage.clone(),
            events.clone(),
            self.lifetimes,
        ));
        handler.restore(storage.list_matches().await.unwrap()).await;

        let queues = Arc::new(QueueManager::new(self.keys, self.tolerance));
        let matchmaker = Arc::new(Matchmaker::new(
            queues.clone(),
            players.clone(),
            handler.clone(),
            Box::new(IntervalOverlapRule::new(self.window)),
            events.clone(),
        ));
        let coordinator = Arc::new(RatingPeriodCoordinator::new(
            period,
            players.clone(),
            storage.clone(),
            calculator,
            events,
        ));
        let service = MatchmakingService::new(
            queues.clone(),
            players.clone(),
            handler.clone(),
            self.first_to,
        );

        TestSystem {
            storage,
            players,
            queues,
            handler,
            matchmaker,
            coordinator,
            service,
            publisher,
        }
    }
}

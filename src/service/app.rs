//! Main application state and service coordination
//!
//! `AppState` builds every component from configuration, starts the periodic
//! loops and the broker plumbing, and shuts them down in order. Loops check
//! the shutdown signal between ticks only, so a tick in flight (in particular
//! a rating-period rotation) always runs to completion or aborts on its own.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::CommandConsumer;
use crate::amqp::publisher::{publish_event, AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::{validate_config, AppConfig, StorageBackend};
use crate::events::EventBus;
use crate::matches::{MatchHandler, MatchLifetimes};
use crate::matchmaker::{IntervalOverlapRule, Matchmaker};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::player::PlayerRegistry;
use crate::queue::{QueueManager, ToleranceSettings};
use crate::rating::{
    Glicko2RatingCalculator, RatingCalculator, RatingPeriod, RatingPeriodCoordinator,
};
use crate::service::health::HealthCheck;
use crate::service::matchmaking::MatchmakingService;
use crate::storage::{InMemoryStorage, JsonFileStorage, Storage};
use crate::utils::{current_timestamp, to_chrono};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How often the metrics feeder copies component stats into the collector
const STATS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Cheap handle on the running components, shared with health checks
#[derive(Clone)]
pub struct ServiceContext {
    config: Arc<AppConfig>,
    storage: Arc<dyn Storage>,
    players: PlayerRegistry,
    queues: Arc<QueueManager>,
    handler: Arc<MatchHandler>,
    matchmaker: Arc<Matchmaker>,
    coordinator: Arc<RatingPeriodCoordinator>,
    event_bus: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
    amqp_connection: Option<Arc<AmqpConnection>>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl ServiceContext {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn players(&self) -> PlayerRegistry {
        self.players.clone()
    }

    pub fn queues(&self) -> Arc<QueueManager> {
        self.queues.clone()
    }

    pub fn handler(&self) -> Arc<MatchHandler> {
        self.handler.clone()
    }

    pub fn matchmaker(&self) -> Arc<Matchmaker> {
        self.matchmaker.clone()
    }

    pub fn coordinator(&self) -> Arc<RatingPeriodCoordinator> {
        self.coordinator.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Main application state containing all service components
pub struct AppState {
    context: ServiceContext,
    service: MatchmakingService,
    metrics_service: Arc<MetricsService>,
    background_tasks: Vec<JoinHandle<()>>,
    command_consumer: Option<CommandConsumer>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing ranked-arena matchmaking service");
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;
        info!(
            "Configuration: service={}, amqp_enabled={}, storage={:?}, queues={}",
            config.service.name,
            config.amqp.enabled,
            config.storage.backend,
            config.matchmaking.queue_keys().len()
        );

        let storage = Self::initialize_storage(&config).await?;
        let amqp_connection = if config.amqp.enabled {
            Some(Self::initialize_amqp(&config).await?)
        } else {
            info!("AMQP disabled - commands are only accepted in-process");
            None
        };

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let context = Self::initialize_matchmaking_system(
            config,
            storage,
            amqp_connection,
            metrics.clone(),
        )
        .await?;

        let service = MatchmakingService::new(
            context.queues(),
            context.players(),
            context.handler(),
            context.config.matchmaking.first_to,
        )
        .with_metrics(metrics.clone());

        let health_config = HealthServerConfig {
            port: context.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server =
            Arc::new(HealthServer::new(health_config, metrics.clone()).with_context(context.clone()));
        let metrics_service = Arc::new(MetricsService::new(metrics, health_server));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            context,
            service,
            metrics_service,
            background_tasks: Vec::new(),
            command_consumer: None,
            shutdown_tx,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting ranked-arena matchmaking service");

        *self.context.is_running.write().await = true;

        self.start_metrics_service().await?;

        if let Some(connection) = self.context.amqp_connection() {
            self.start_event_relay(&connection).await?;
            self.start_amqp_consumption(&connection).await?;
        }

        self.start_background_tasks();

        info!("✅ Ranked-arena matchmaking service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of ranked-arena service");

        *self.context.is_running.write().await = false;

        if let Some(consumer) = self.command_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP command consumption stopped");
            }
        }

        if self.shutdown_tx.send(()).is_err() {
            debug!("No background task was listening for shutdown");
        }

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        self.stop_background_tasks().await;

        if let Some(connection) = self.context.amqp_connection() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            } else {
                info!("✅ AMQP connection closed");
            }
        }

        let queue_stats = self
            .context
            .queues
            .get_stats()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final queue stats: {}", e),
            })?;
        let match_stats =
            self.context
                .handler
                .get_stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final match stats: {}", e),
                })?;
        let rating_stats =
            self.context
                .coordinator
                .get_stats()
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final rating stats: {}", e),
                })?;

        info!("Final queue statistics: {:?}", queue_stats);
        info!("Final match statistics: {:?}", match_stats);
        info!("Final rating statistics: {:?}", rating_stats);
        info!("✅ Ranked-arena service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        self.context.config()
    }

    pub fn context(&self) -> ServiceContext {
        self.context.clone()
    }

    /// Command facade, for in-process callers
    pub fn service(&self) -> MatchmakingService {
        self.service.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.context.is_running().await
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    async fn initialize_storage(config: &AppConfig) -> Result<Arc<dyn Storage>, ServiceError> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                Ok(Arc::new(InMemoryStorage::new()))
            }
            StorageBackend::File => {
                info!("Using JSON file storage at {}", config.storage.path.display());
                let storage = JsonFileStorage::open(&config.storage.path)
                    .await
                    .map_err(|e| ServiceError::Initialization {
                        message: format!("Failed to open storage: {}", e),
                    })?;
                Ok(Arc::new(storage))
            }
        }
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;
        info!(
            "Connecting to AMQP broker at {}:{}",
            amqp_config.host, amqp_config.port
        );

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Build the core components and resume persisted state
    async fn initialize_matchmaking_system(
        config: AppConfig,
        storage: Arc<dyn Storage>,
        amqp_connection: Option<Arc<AmqpConnection>>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<ServiceContext, ServiceError> {
        info!("Initializing matchmaking system components");
        let init_error = |what: &str, e: anyhow::Error| ServiceError::Initialization {
            message: format!("Failed to {}: {}", what, e),
        };
        let now = current_timestamp();

        let players = PlayerRegistry::new(storage.clone(), config.rating.default_triplet());
        let event_bus = Arc::new(EventBus::default());
        let publisher: Arc<dyn EventPublisher> = event_bus.clone();

        let period = RatingPeriodCoordinator::load_or_create(storage.as_ref(), &config.rating, now)
            .await
            .map_err(|e| init_error("load rating period", e))?;
        let period = RatingPeriod::shared(period);

        let lifetimes = MatchLifetimes {
            pending: to_chrono(config.matchmaking.pending_match_lifetime()),
            in_progress: to_chrono(config.matchmaking.in_progress_match_lifetime()),
        };
        let handler = Arc::new(MatchHandler::new(
            period.clone(),
            players.clone(),
            storage.clone(),
            publisher.clone(),
            lifetimes,
        ));

        let persisted = storage
            .list_matches()
            .await
            .map_err(|e| init_error("load matches", e))?;
        let restored = handler.restore(persisted).await;
        if restored > 0 {
            info!("Resumed tracking of {} active matches", restored);
        }
        Self::reconcile_players(storage.as_ref(), &handler)
            .await
            .map_err(|e| init_error("reconcile player flags", e))?;

        let queues = Arc::new(QueueManager::new(
            config.matchmaking.queue_keys(),
            ToleranceSettings {
                initial: config.matchmaking.initial_tolerance,
                step: config.matchmaking.tolerance_step,
                interval: to_chrono(config.matchmaking.tolerance_interval()),
            },
        ));

        let matchmaker = Arc::new(Matchmaker::new(
            queues.clone(),
            players.clone(),
            handler.clone(),
            Box::new(IntervalOverlapRule::new(
                config.matchmaking.compatibility_window,
            )),
            publisher.clone(),
        ));

        let calculator: Arc<dyn RatingCalculator> = Arc::new(
            Glicko2RatingCalculator::from_settings(&config.rating)
                .map_err(|e| init_error("initialize rating calculator", e))?,
        );
        let coordinator = Arc::new(RatingPeriodCoordinator::new(
            period,
            players.clone(),
            storage.clone(),
            calculator,
            publisher,
        ));

        Ok(ServiceContext {
            config: Arc::new(config),
            storage,
            players,
            queues,
            handler,
            matchmaker,
            coordinator,
            event_bus,
            metrics,
            amqp_connection,
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Clear queue and match flags left behind by a previous run
    ///
    /// Queues live in memory only, so nobody is waiting after a restart. A
    /// player stays in-match only when one of the resumed matches involves them.
    async fn reconcile_players(storage: &dyn Storage, handler: &MatchHandler) -> Result<()> {
        let mut stale = Vec::new();
        for mut player in storage.list_players().await? {
            let in_active_match = handler.player_match(&player.id).await.is_some();
            if player.in_queue || player.in_match != in_active_match {
                player.mark_dequeued();
                player.in_match = in_active_match;
                stale.push(player);
            }
        }

        if !stale.is_empty() {
            info!("Reset queue/match flags of {} players", stale.len());
            storage.save_players(&stale).await?;
        }
        Ok(())
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.context.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Forward every bus event to the broker
    async fn start_event_relay(&mut self, connection: &AmqpConnection) -> Result<(), ServiceError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let amqp = &self.context.config.amqp;
        let publisher_config = PublisherConfig {
            exchange_name: amqp.exchange_name.clone(),
            max_retries: amqp.max_retry_attempts,
            retry_delay_ms: amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        let mut events = self.context.event_bus.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        let metrics = self.context.metrics();

        let relay = tokio::spawn(async move {
            info!("Event relay task started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            let name = event.name();
                            let started = Instant::now();
                            let result = publish_event(&publisher, event).await;
                            metrics.record_amqp_operation("publish", result.is_ok(), started.elapsed());
                            if let Err(e) = result {
                                error!("Failed to relay {} to the broker: {}", name, e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Event relay lagged, {} events were not published", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            info!("Event relay task stopped");
        });
        self.background_tasks.push(relay);

        info!("✅ Event relay publishing to '{}'", amqp.exchange_name);
        Ok(())
    }

    /// Start AMQP command consumption
    async fn start_amqp_consumption(
        &mut self,
        connection: &AmqpConnection,
    ) -> Result<(), ServiceError> {
        let queue_name = self.context.config.amqp.queue_name.clone();
        info!("Starting AMQP command consumption on '{}'", queue_name);

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let consumer = CommandConsumer::new(Arc::new(self.service.clone()), channel);
        consumer
            .declare_queue(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming commands: {}", e),
            })?;

        self.command_consumer = Some(consumer);
        info!("✅ Listening for commands on '{}'", queue_name);
        Ok(())
    }

    /// Start the matchmaker, coordinator, expiry and metrics loops
    fn start_background_tasks(&mut self) {
        let config = self.context.config.clone();

        let matchmaker = self.context.matchmaker();
        let metrics = self.context.metrics();
        let matchmaker_task = spawn_periodic(
            "Matchmaker",
            config.matchmaking.tick_interval(),
            self.shutdown_tx.subscribe(),
            move || {
                let matchmaker = matchmaker.clone();
                let metrics = metrics.clone();
                async move {
                    let timer = metrics.start_timer();
                    match matchmaker.tick_at(current_timestamp()).await {
                        Ok(created) if !created.is_empty() => {
                            debug!("Matchmaker tick created {} matches", created.len())
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Matchmaker tick failed: {}", e),
                    }
                    metrics.record_matchmaker_tick(timer.stop());
                }
            },
        );

        let coordinator = self.context.coordinator();
        let metrics = self.context.metrics();
        let coordinator_task = spawn_periodic(
            "Rating period",
            config.rating.period_tick_interval(),
            self.shutdown_tx.subscribe(),
            move || {
                let coordinator = coordinator.clone();
                let metrics = metrics.clone();
                async move {
                    let timer = metrics.start_timer();
                    match coordinator.tick_at(current_timestamp()).await {
                        Ok(Some(ended)) => {
                            metrics.record_rating_calculation(timer.stop());
                            debug!("Rating period {} rotated", ended.period.id);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Rating period tick failed, retrying next tick: {}", e),
                    }
                }
            },
        );

        let handler = self.context.handler();
        let expiry_task = spawn_periodic(
            "Match expiry",
            config.matchmaking.expiry_interval(),
            self.shutdown_tx.subscribe(),
            move || {
                let handler = handler.clone();
                async move {
                    match handler.expire_stale_matches_at(current_timestamp()).await {
                        Ok(expired) if !expired.is_empty() => {
                            info!("Cancelled {} stale matches", expired.len())
                        }
                        Ok(_) => debug!("Expiry check completed - no stale matches"),
                        Err(e) => warn!("Match expiry sweep failed: {}", e),
                    }
                }
            },
        );

        let metrics_task = self.spawn_metrics_feeder();

        self.background_tasks.push(matchmaker_task);
        self.background_tasks.push(coordinator_task);
        self.background_tasks.push(expiry_task);
        self.background_tasks.push(metrics_task);

        info!("4 background tasks started successfully");
    }

    /// Feed the collector from the event bus and from periodic stats snapshots
    fn spawn_metrics_feeder(&self) -> JoinHandle<()> {
        let context = self.context.clone();
        let mut events = context.event_bus.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let metrics = context.metrics();
            let mut interval = tokio::time::interval(STATS_REFRESH_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Metrics feeder task started");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    received = events.recv() => match received {
                        Ok(event) => metrics.update_from_event(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Metrics feeder skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = interval.tick() => refresh_metrics(&context).await,
                }
            }

            info!("Metrics feeder task stopped");
        })
    }

    /// Wait for the loops to finish their current tick, aborting stragglers
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        let timeout = self.context.config.shutdown_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        info!(
            "Waiting up to {:?} for {} background tasks to stop...",
            timeout, task_count
        );

        let mut aborted = 0;
        for (i, mut task) in self.background_tasks.drain(..).enumerate() {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => debug!("Background task {}/{} stopped", i + 1, task_count),
                Ok(Err(e)) => warn!("Background task {}/{} failed: {}", i + 1, task_count, e),
                Err(_) => {
                    warn!(
                        "Background task {}/{} did not stop in time, aborting",
                        i + 1,
                        task_count
                    );
                    task.abort();
                    aborted += 1;
                }
            }
        }

        info!(
            "✅ All {} background tasks stopped ({} aborted)",
            task_count, aborted
        );
    }
}

/// Copy component stats and health into the collector
async fn refresh_metrics(context: &ServiceContext) {
    let metrics = context.metrics();
    metrics.update_uptime(context.uptime());

    match context.queues().get_stats() {
        Ok(stats) => metrics.update_from_queue_stats(&stats),
        Err(e) => warn!("Failed to get queue stats for metrics update: {}", e),
    }
    match context.matchmaker().get_stats() {
        Ok(stats) => metrics.update_from_matchmaker_stats(&stats),
        Err(e) => warn!("Failed to get matchmaker stats for metrics update: {}", e),
    }
    match context.handler().get_stats().await {
        Ok(stats) => metrics.update_from_handler_stats(&stats),
        Err(e) => warn!("Failed to get match stats for metrics update: {}", e),
    }
    match context.coordinator().get_stats() {
        Ok(stats) => metrics.update_from_coordinator_stats(&stats),
        Err(e) => warn!("Failed to get rating stats for metrics update: {}", e),
    }

    match HealthCheck::check(context).await {
        Ok(health) => {
            metrics.update_health_status(health.status.as_gauge());
            for check in &health.checks {
                metrics.update_component_health(
                    &check.name,
                    check.status != crate::service::health::HealthStatus::Unhealthy,
                );
            }
        }
        Err(e) => warn!("Health check for metrics update failed: {}", e),
    }
}

/// Run `tick` every `period` until the shutdown signal arrives
///
/// The signal is only observed between ticks.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("{} task started ({:?} interval)", name, period);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => tick().await,
            }
        }

        info!("{} task stopped", name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueueKey;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.amqp.enabled = false;
        config.matchmaking.tick_interval_seconds = 1;
        config.service.shutdown_timeout_seconds = 5;
        config
    }

    #[tokio::test]
    async fn test_app_state_without_amqp() {
        let app = AppState::new(offline_config()).await.unwrap();
        assert!(!app.is_running().await);
        assert!(app.context().amqp_connection().is_none());

        let outcome = app
            .service()
            .enqueue(&"alice".to_string(), &QueueKey::new("PC", "Default"))
            .await
            .unwrap();
        assert_eq!(outcome, crate::types::CommandOutcome::Queued);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = offline_config();
        config.matchmaking.platforms.clear();

        assert!(matches!(
            AppState::new(config).await,
            Err(ServiceError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut config = offline_config();
        config.service.health_port = 38517;
        let mut app = AppState::new(config).await.unwrap();
        app.start().await.unwrap();
        assert!(app.is_running().await);

        app.shutdown().await.unwrap();
        assert!(!app.is_running().await);
    }

    #[tokio::test]
    async fn test_reconcile_clears_stale_flags() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut stale = crate::player::Player::new(
            "alice",
            crate::types::RatingTriplet::default(),
            current_timestamp(),
        );
        stale.in_queue = true;
        stale.in_match = true;
        storage.save_player(&stale).await.unwrap();

        let players = PlayerRegistry::new(storage.clone(), crate::types::RatingTriplet::default());
        let period = RatingPeriod::shared(RatingPeriod::new(
            current_timestamp(),
            chrono::Duration::hours(72),
        ));
        let handler = MatchHandler::new(
            period,
            players,
            storage.clone(),
            Arc::new(EventBus::default()),
            MatchLifetimes::default(),
        );

        AppState::reconcile_players(storage.as_ref(), &handler)
            .await
            .unwrap();

        let player = storage.get_player(&"alice".to_string()).await.unwrap().unwrap();
        assert!(!player.in_queue);
        assert!(!player.in_match);
    }
}

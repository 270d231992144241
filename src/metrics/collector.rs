//! Metrics collection using Prometheus
//!
//! Counters that mirror component stats are synchronised from snapshots, so
//! repeated updates never double count. Event-driven series are fed from the
//! event bus.

use crate::matches::MatchHandlerStats;
use crate::matchmaker::MatchmakerStats;
use crate::queue::QueueStats;
use crate::rating::CoordinatorStats;
use crate::types::MatchmakingEvent;
use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
    match_metrics: MatchMetrics,
    rating_metrics: RatingMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    pub uptime_seconds: IntGauge,

    /// Inbound commands by command name and status
    pub commands_total: IntCounterVec,

    pub amqp_messages_total: IntCounterVec,
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    pub component_health: IntGaugeVec,
}

/// Queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    pub players_enqueued_total: IntCounter,
    pub players_dequeued_total: IntCounter,
    pub tolerance_widenings_total: IntCounter,

    /// Players currently waiting, by `platform/game`
    pub players_waiting: IntGaugeVec,
}

/// Match lifecycle metrics
#[derive(Clone)]
pub struct MatchMetrics {
    pub matches_created_total: IntCounterVec,
    pub matches_started_total: IntCounterVec,
    pub matches_completed_total: IntCounterVec,
    pub matches_cancelled_total: IntCounterVec,
    pub active_matches: IntGauge,

    /// Time between start and score report
    pub match_duration_seconds: Histogram,
}

/// Rating-period metrics
#[derive(Clone)]
pub struct RatingMetrics {
    pub periods_closed_total: IntCounter,
    pub failed_rotations_total: IntCounter,
    pub players_rated_total: IntCounter,
    pub matches_per_period: Histogram,
    pub rating_change: Histogram,
    pub rating_distribution: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    pub command_processing_duration: HistogramVec,
    pub matchmaker_tick_duration: Histogram,
    pub matchmaker_ticks_total: IntCounter,
    pub rating_calculation_duration: Histogram,
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let rating_metrics = RatingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            rating_metrics,
            performance_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn rating(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Update metrics from queue manager stats
    pub fn update_from_queue_stats(&self, stats: &QueueStats) {
        sync_counter(&self.queue_metrics.players_enqueued_total, stats.total_enqueued);
        sync_counter(&self.queue_metrics.players_dequeued_total, stats.total_dequeued);
        sync_counter(
            &self.queue_metrics.tolerance_widenings_total,
            stats.tolerance_widenings,
        );

        self.queue_metrics.players_waiting.reset();
        for (queue, waiting) in &stats.waiting_by_queue {
            self.queue_metrics
                .players_waiting
                .with_label_values(&[queue.as_str()])
                .set(*waiting as i64);
        }
    }

    /// Update metrics from matchmaker stats
    pub fn update_from_matchmaker_stats(&self, stats: &MatchmakerStats) {
        sync_counter(&self.performance_metrics.matchmaker_ticks_total, stats.ticks);
    }

    /// Update metrics from match handler stats
    pub fn update_from_handler_stats(&self, stats: &MatchHandlerStats) {
        self.match_metrics
            .active_matches
            .set(stats.active_matches as i64);
    }

    /// Update metrics from rating-period coordinator stats
    pub fn update_from_coordinator_stats(&self, stats: &CoordinatorStats) {
        sync_counter(
            &self.rating_metrics.failed_rotations_total,
            stats.failed_rotations,
        );
        sync_counter(&self.rating_metrics.players_rated_total, stats.players_rated);
    }

    /// Record one lifecycle event from the event bus
    pub fn update_from_event(&self, event: &MatchmakingEvent) {
        match event {
            MatchmakingEvent::MatchCreated(e) => {
                self.match_metrics
                    .matches_created_total
                    .with_label_values(&[e.match_info.queue.to_string().as_str()])
                    .inc();
            }
            MatchmakingEvent::MatchStarted(e) => {
                self.match_metrics
                    .matches_started_total
                    .with_label_values(&[e.match_info.queue.to_string().as_str()])
                    .inc();
            }
            MatchmakingEvent::MatchCompleted(e) => {
                self.match_metrics
                    .matches_completed_total
                    .with_label_values(&[e.match_info.queue.to_string().as_str()])
                    .inc();

                if let Some(duration) = e.match_info.duration() {
                    self.match_metrics
                        .match_duration_seconds
                        .observe(duration.num_milliseconds().max(0) as f64 / 1000.0);
                }
            }
            MatchmakingEvent::MatchCancelled(e) => {
                self.match_metrics
                    .matches_cancelled_total
                    .with_label_values(&[e.reason.to_string().as_str()])
                    .inc();
            }
            MatchmakingEvent::RatingPeriodEnded(e) => {
                self.rating_metrics.periods_closed_total.inc();
                self.rating_metrics
                    .matches_per_period
                    .observe(e.period.matches.len() as f64);

                for change in &e.rating_changes {
                    self.rating_metrics
                        .rating_change
                        .observe(change.rating_delta());
                    self.rating_metrics
                        .rating_distribution
                        .observe(change.new_rating.rating);
                }
            }
        }
    }

    /// Record an inbound command being processed
    pub fn record_command(&self, command: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .commands_total
            .with_label_values(&[command, status])
            .inc();

        self.performance_metrics
            .command_processing_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    pub fn record_matchmaker_tick(&self, duration: Duration) {
        self.performance_metrics
            .matchmaker_tick_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_rating_calculation(&self, duration: Duration) {
        self.performance_metrics
            .rating_calculation_duration
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn export_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Bring a monotonic counter up to a cumulative total taken from stats
fn sync_counter(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("ranked_arena_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new("ranked_arena_commands_total", "Total commands processed"),
            &["command", "status"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "ranked_arena_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("ranked_arena_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "ranked_arena_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("ranked_arena_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            commands_total,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_enqueued_total = IntCounter::new(
            "ranked_arena_players_enqueued_total",
            "Total queue joins",
        )?;
        registry.register(Box::new(players_enqueued_total.clone()))?;

        let players_dequeued_total = IntCounter::new(
            "ranked_arena_players_dequeued_total",
            "Total queue departures, including pairings",
        )?;
        registry.register(Box::new(players_dequeued_total.clone()))?;

        let tolerance_widenings_total = IntCounter::new(
            "ranked_arena_tolerance_widenings_total",
            "Total tolerance widenings applied to waiting players",
        )?;
        registry.register(Box::new(tolerance_widenings_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "ranked_arena_players_waiting",
                "Players currently waiting in queue",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        Ok(Self {
            players_enqueued_total,
            players_dequeued_total,
            tolerance_widenings_total,
            players_waiting,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_created_total = IntCounterVec::new(
            Opts::new("ranked_arena_matches_created_total", "Total matches created"),
            &["queue"],
        )?;
        registry.register(Box::new(matches_created_total.clone()))?;

        let matches_started_total = IntCounterVec::new(
            Opts::new("ranked_arena_matches_started_total", "Total matches started"),
            &["queue"],
        )?;
        registry.register(Box::new(matches_started_total.clone()))?;

        let matches_completed_total = IntCounterVec::new(
            Opts::new(
                "ranked_arena_matches_completed_total",
                "Total matches completed",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(matches_completed_total.clone()))?;

        let matches_cancelled_total = IntCounterVec::new(
            Opts::new(
                "ranked_arena_matches_cancelled_total",
                "Total matches cancelled",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(matches_cancelled_total.clone()))?;

        let active_matches = IntGauge::new(
            "ranked_arena_active_matches",
            "Matches created or in progress",
        )?;
        registry.register(Box::new(active_matches.clone()))?;

        let match_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ranked_arena_match_duration_seconds",
                "Time from match start to score report",
            )
            .buckets(vec![30.0, 60.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0]),
        )?;
        registry.register(Box::new(match_duration_seconds.clone()))?;

        Ok(Self {
            matches_created_total,
            matches_started_total,
            matches_completed_total,
            matches_cancelled_total,
            active_matches,
            match_duration_seconds,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let periods_closed_total = IntCounter::new(
            "ranked_arena_rating_periods_closed_total",
            "Rating periods closed and applied",
        )?;
        registry.register(Box::new(periods_closed_total.clone()))?;

        let failed_rotations_total = IntCounter::new(
            "ranked_arena_rating_rotation_failures_total",
            "Rating-period rotations aborted and retried",
        )?;
        registry.register(Box::new(failed_rotations_total.clone()))?;

        let players_rated_total = IntCounter::new(
            "ranked_arena_players_rated_total",
            "Player ratings updated at period close",
        )?;
        registry.register(Box::new(players_rated_total.clone()))?;

        let matches_per_period = Histogram::with_opts(
            HistogramOpts::new(
                "ranked_arena_matches_per_period",
                "Completed matches in each closed period",
            )
            .buckets(vec![0.0, 1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]),
        )?;
        registry.register(Box::new(matches_per_period.clone()))?;

        let rating_change = Histogram::with_opts(
            HistogramOpts::new(
                "ranked_arena_rating_change",
                "Rating delta applied at period close",
            )
            .buckets(vec![-200.0, -100.0, -50.0, -10.0, 0.0, 10.0, 50.0, 100.0, 200.0]),
        )?;
        registry.register(Box::new(rating_change.clone()))?;

        let rating_distribution = Histogram::with_opts(
            HistogramOpts::new(
                "ranked_arena_rating_distribution",
                "Player rating distribution after period close",
            )
            .buckets(vec![
                500.0, 1000.0, 1200.0, 1400.0, 1600.0, 1800.0, 2000.0, 2500.0,
            ]),
        )?;
        registry.register(Box::new(rating_distribution.clone()))?;

        Ok(Self {
            periods_closed_total,
            failed_rotations_total,
            players_rated_total,
            matches_per_period,
            rating_change,
            rating_distribution,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let command_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "ranked_arena_command_processing_duration_seconds",
                "Command processing time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_processing_duration.clone()))?;

        let matchmaker_tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ranked_arena_matchmaker_tick_duration_seconds",
                "Matchmaker scan time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(matchmaker_tick_duration.clone()))?;

        let matchmaker_ticks_total = IntCounter::new(
            "ranked_arena_matchmaker_ticks_total",
            "Matchmaker scans run",
        )?;
        registry.register(Box::new(matchmaker_ticks_total.clone()))?;

        let rating_calculation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ranked_arena_rating_calculation_duration_seconds",
                "Rating-period rotation time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 1.0]),
        )?;
        registry.register(Box::new(rating_calculation_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ranked_arena_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            command_processing_duration,
            matchmaker_tick_duration,
            matchmaker_ticks_total,
            rating_calculation_duration,
            amqp_operation_duration,
        })
    }
}

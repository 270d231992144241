//! Health checks for the ranked-arena service
//!
//! Liveness only asks whether the service loop is up. Readiness additionally
//! requires the matchmaker and, when enabled, the broker connection.

use crate::service::app::ServiceContext;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Unhealthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Healthy => 2,
        }
    }

    fn worst(self, other: &HealthStatus) -> HealthStatus {
        match (&self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional detail when not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub players_waiting: usize,
    pub active_matches: usize,
    pub matches_created: u64,
    pub matches_completed: u64,
    pub matches_cancelled: u64,
    pub rating_period_id: String,
    pub rating_period_matches: usize,
    pub rating_period_ends_at: Option<chrono::DateTime<chrono::Utc>>,
    pub rating_periods_closed: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &ServiceContext) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(context).await,
            Self::check_matchmaker(context),
            Self::check_rating_period(context).await,
            Self::check_amqp_health(context),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.worst(&check.status));
        let stats = Self::gather_service_stats(context).await;

        Ok(HealthCheck {
            status,
            service: context.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &ServiceContext) -> Result<HealthStatus> {
        if context.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle commands
    pub async fn readiness_check(context: &ServiceContext) -> Result<HealthStatus> {
        if !context.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let status = Self::check_matchmaker(context)
            .status
            .worst(&Self::check_amqp_health(context).status);
        Ok(status)
    }

    async fn check_service_running(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if context.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_matchmaker(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match context.matchmaker().get_stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Matchmaker stats check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "matchmaker".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Degraded while an expired period has not been rotated for several ticks
    async fn check_rating_period(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();
        let period = context.coordinator().current_period().await;
        let grace = crate::utils::to_chrono(context.config().rating.period_tick_interval() * 5);
        let now = chrono::Utc::now();

        let (status, message) = if period.is_expired_at(now - grace) {
            (
                HealthStatus::Degraded,
                Some(format!(
                    "Rating period {} ended at {} and has not rotated",
                    period.id,
                    period.end_time()
                )),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        ComponentCheck {
            name: "rating_period".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match context.amqp_connection() {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (HealthStatus::Healthy, Some("AMQP disabled".to_string())),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(context: &ServiceContext) -> ServiceStats {
        let mut stats = ServiceStats {
            uptime_seconds: context.uptime().as_secs(),
            ..ServiceStats::default()
        };

        match context.queues().get_stats() {
            Ok(queue_stats) => stats.players_waiting = queue_stats.players_waiting,
            Err(e) => debug!("Failed to get queue stats for health check: {}", e),
        }

        match context.handler().get_stats().await {
            Ok(handler_stats) => {
                stats.active_matches = handler_stats.active_matches;
                stats.matches_created = handler_stats.matches_tracked;
                stats.matches_completed = handler_stats.matches_completed;
                stats.matches_cancelled = handler_stats.matches_cancelled;
            }
            Err(e) => debug!("Failed to get match stats for health check: {}", e),
        }

        let period = context.coordinator().current_period().await;
        stats.rating_period_id = period.id.to_string();
        stats.rating_period_matches = period.matches.len();
        stats.rating_period_ends_at = Some(period.end_time());

        match context.coordinator().get_stats() {
            Ok(coordinator_stats) => stats.rating_periods_closed = coordinator_stats.rotations,
            Err(e) => debug!("Failed to get coordinator stats for health check: {}", e),
        }

        stats
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status_wins() {
        assert_eq!(
            HealthStatus::Healthy.worst(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.worst(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Healthy.worst(&HealthStatus::Healthy),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_gauge_values() {
        assert_eq!(HealthStatus::Unhealthy.as_gauge(), 0);
        assert_eq!(HealthStatus::Degraded.as_gauge(), 1);
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
    }
}

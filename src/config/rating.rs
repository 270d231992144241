//! Rating system configuration

use crate::types::RatingTriplet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillratings::glicko2::Glicko2Config;
use std::time::Duration;

/// Glicko-2 parameters and rating-period cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingSettings {
    /// Rating for players seen for the first time
    pub default_rating: f64,
    /// Deviation for players seen for the first time
    pub default_deviation: f64,
    /// Volatility for players seen for the first time
    pub default_volatility: f64,
    /// System constant constraining volatility change
    pub tau: f64,
    /// Convergence tolerance of the volatility iteration
    pub convergence_tolerance: f64,
    /// Length of each rating period in hours
    pub period_length_hours: u64,
    /// Start of the first rating period; defaults to service start
    pub period_start: Option<DateTime<Utc>>,
    /// Coordinator tick interval in seconds
    pub period_tick_interval_seconds: u64,
}

impl Default for RatingSettings {
    fn default() -> Self {
        Self {
            default_rating: 1500.0,
            default_deviation: 350.0,
            default_volatility: 0.06,
            tau: 0.75,
            convergence_tolerance: 0.000001,
            period_length_hours: 72,
            period_start: None,
            period_tick_interval_seconds: 5,
        }
    }
}

impl RatingSettings {
    /// Triplet assigned to new players
    pub fn default_triplet(&self) -> RatingTriplet {
        RatingTriplet::new(
            self.default_rating,
            self.default_deviation,
            self.default_volatility,
        )
    }

    pub fn glicko2_config(&self) -> Glicko2Config {
        Glicko2Config {
            tau: self.tau,
            convergence_tolerance: self.convergence_tolerance,
        }
    }

    pub fn period_length(&self) -> chrono::Duration {
        chrono::Duration::hours(self.period_length_hours as i64)
    }

    pub fn period_tick_interval(&self) -> Duration {
        Duration::from_secs(self.period_tick_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RatingSettings::default();
        let triplet = settings.default_triplet();

        assert_eq!(triplet, RatingTriplet::new(1500.0, 350.0, 0.06));
        assert_eq!(settings.period_length(), chrono::Duration::hours(72));
        assert_eq!(settings.glicko2_config().tau, 0.75);
    }
}

//! Glicko-2 rating calculator
//!
//! Adapts the skillratings Glicko-2 rating-period update to the
//! [`RatingCalculator`] contract.

use crate::config::RatingSettings;
use crate::error::{MatchmakingError, Result};
use crate::matches::MatchOutcome;
use crate::rating::calculator::{GameResult, RatingCalculator};
use crate::types::{PlayerId, RatingTriplet};
use skillratings::glicko2::{glicko2_rating_period, Glicko2Config, Glicko2Rating};
use skillratings::Outcomes;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Glicko2RatingCalculator {
    config: Glicko2Config,
    initial: RatingTriplet,
}

impl Glicko2RatingCalculator {
    pub fn new(config: Glicko2Config, initial: RatingTriplet) -> Result<Self> {
        if config.tau <= 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Glicko-2 tau must be positive".to_string(),
            }
            .into());
        }
        if config.convergence_tolerance <= 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Glicko-2 convergence tolerance must be positive".to_string(),
            }
            .into());
        }
        if !initial.is_valid() {
            return Err(MatchmakingError::ConfigurationError {
                message: format!("Invalid initial rating triplet {:?}", initial),
            }
            .into());
        }

        Ok(Self { config, initial })
    }

    pub fn from_settings(settings: &RatingSettings) -> Result<Self> {
        Self::new(settings.glicko2_config(), settings.default_triplet())
    }

    /// Probability that `player` beats `opponent`
    pub fn win_probability(&self, player: &RatingTriplet, opponent: &RatingTriplet) -> f64 {
        let (expected, _) =
            skillratings::glicko2::expected_score(&(*player).into(), &(*opponent).into());
        expected
    }
}

impl Default for Glicko2RatingCalculator {
    fn default() -> Self {
        Self {
            config: Glicko2Config::default(),
            initial: RatingTriplet::default(),
        }
    }
}

impl RatingCalculator for Glicko2RatingCalculator {
    fn rate(
        &self,
        player_id: &PlayerId,
        current: &RatingTriplet,
        results: &[GameResult],
    ) -> Result<RatingTriplet> {
        if !current.is_valid() {
            return Err(MatchmakingError::RatingCalculationFailed {
                reason: format!("Player {} has an invalid rating {:?}", player_id, current),
            }
            .into());
        }

        let games: Vec<(Glicko2Rating, Outcomes)> = results
            .iter()
            .map(|result| {
                let outcome = match result.outcome {
                    MatchOutcome::Win => Outcomes::WIN,
                    MatchOutcome::Loss => Outcomes::LOSS,
                };
                (result.opponent.into(), outcome)
            })
            .collect();

        let next: RatingTriplet =
            glicko2_rating_period(&(*current).into(), &games, &self.config).into();

        if !next.is_valid() {
            return Err(MatchmakingError::RatingCalculationFailed {
                reason: format!(
                    "Glicko-2 produced an invalid rating for player {}: {:?}",
                    player_id, next
                ),
            }
            .into());
        }

        debug!(
            "Rated {} over {} games: {:.1}±{:.1} -> {:.1}±{:.1}",
            player_id,
            results.len(),
            current.rating,
            current.deviation,
            next.rating,
            next.deviation
        );

        Ok(next)
    }

    fn initial_rating(&self) -> RatingTriplet {
        self.initial
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "glicko2",
            "tau": self.config.tau,
            "convergence_tolerance": self.config.convergence_tolerance,
            "initial_rating": self.initial.rating,
            "initial_deviation": self.initial.deviation,
            "initial_volatility": self.initial.volatility,
        })
    }
}

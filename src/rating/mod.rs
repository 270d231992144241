//! Rating periods and Glicko-2 integration
//!
//! Completed matches accumulate in the open [`RatingPeriod`]. When it expires
//! the [`RatingPeriodCoordinator`] rates every participant through a
//! [`RatingCalculator`] and opens the next period.

pub mod calculator;
pub mod coordinator;
pub mod glicko2;
pub mod period;

// Re-export commonly used types
pub use calculator::{GameResult, MockRatingCalculator, RatingCalculator};
pub use coordinator::{CoordinatorStats, RatingPeriodCoordinator};
pub use glicko2::Glicko2RatingCalculator;
pub use period::{RatingPeriod, SharedRatingPeriod};

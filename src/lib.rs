//! Ranked Arena - Matchmaking microservice with Glicko-2 rating periods
//!
//! This crate provides AMQP-driven head-to-head matchmaking with per
//! platform/game queues, widening rating tolerances, match lifecycle
//! tracking, and periodic all-or-nothing Glicko-2 rating updates.

pub mod amqp;
pub mod config;
pub mod error;
pub mod events;
pub mod matches;
pub mod matchmaker;
pub mod metrics;
pub mod player;
pub mod queue;
pub mod rating;
pub mod service;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use events::EventBus;
pub use matches::{Match, MatchHandler, MatchState};
pub use matchmaker::Matchmaker;
pub use player::{Player, PlayerRegistry};
pub use queue::QueueManager;
pub use rating::{Glicko2RatingCalculator, RatingCalculator, RatingPeriod, RatingPeriodCoordinator};
pub use storage::Storage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

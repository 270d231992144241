//! Match lifecycle for the matchmaking service
//!
//! A match pairs two players and moves through created, in-progress, and one of
//! the terminal states. The handler tracks active matches and hands completed
//! ones to the open rating period.

pub mod handler;
pub mod instance;

// Re-export commonly used types
pub use handler::{MatchHandler, MatchHandlerStats, MatchLifetimes};
pub use instance::{Match, MatchOutcome, MatchRecord, MatchScores, MatchState};

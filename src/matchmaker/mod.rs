//! Matchmaking: pairing rules and the periodic scan

pub mod compatibility;
pub mod scheduler;

// Re-export commonly used types
pub use compatibility::{Candidate, IntervalOverlapRule, PairingRule};
pub use scheduler::{Matchmaker, MatchmakerStats};

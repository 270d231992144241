//! Queue management for the matchmaking service
//!
//! Players wait in sub-queues keyed by platform and game.

pub mod manager;

// Re-export commonly used types
pub use manager::{QueueManager, QueueStats, QueuedPlayer, ToleranceSettings};

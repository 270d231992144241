//! Player records and the shared registry
//!
//! This module holds the rated identity of each player together with its
//! queue and match flags.

pub mod record;
pub mod registry;

// Re-export commonly used types
pub use record::Player;
pub use registry::{PlayerMap, PlayerRegistry};

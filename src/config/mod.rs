//! Configuration management for the ranked-arena service
//!
//! This module handles all configuration loading from environment variables
//! and TOML files, validation, and default values for the matchmaking service.

pub mod app;
pub mod matchmaking;
pub mod rating;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, ServiceSettings, StorageBackend, StorageSettings,
};
pub use matchmaking::{MatchmakingSettings, PlatformSettings};
pub use rating::RatingSettings;

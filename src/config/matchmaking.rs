//! Matchmaking and queue configuration

use crate::types::QueueKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A platform and the games that can be queued on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSettings {
    pub name: String,
    pub games: Vec<String>,
}

impl PlatformSettings {
    pub fn new(name: &str, games: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            games: games.iter().map(|g| g.to_string()).collect(),
        }
    }
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Platforms and their games; each pair is one sub-queue
    pub platforms: Vec<PlatformSettings>,
    /// Matchmaker scan interval in seconds
    pub tick_interval_seconds: u64,
    /// Tolerance a player starts with when joining a queue
    pub initial_tolerance: f64,
    /// Tolerance added each time a player waits past the widening interval
    pub tolerance_step: f64,
    /// Waiting time after which tolerance is widened again, in seconds
    pub tolerance_interval_seconds: u64,
    /// Fixed allowance added to every pair comparison
    pub compatibility_window: f64,
    /// Created matches that never start are cancelled after this many seconds
    pub pending_match_lifetime_seconds: u64,
    /// Started matches that never report are cancelled after this many seconds
    pub in_progress_match_lifetime_seconds: u64,
    /// Match expiry sweep interval in seconds
    pub expiry_interval_seconds: u64,
    /// Highest score a player can report (0 disables the check)
    pub first_to: u32,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            platforms: vec![
                PlatformSettings::new("PC", &["Default"]),
                PlatformSettings::new("Switch", &["Default"]),
                PlatformSettings::new("PS4", &["Default"]),
            ],
            tick_interval_seconds: 5,
            initial_tolerance: 0.0,
            tolerance_step: 25.0,
            tolerance_interval_seconds: 180, // 3 minutes
            compatibility_window: 0.0,
            pending_match_lifetime_seconds: 300,     // 5 minutes
            in_progress_match_lifetime_seconds: 3600, // 60 minutes
            expiry_interval_seconds: 30,
            first_to: 10,
        }
    }
}

impl MatchmakingSettings {
    /// Every configured platform/game pair
    pub fn queue_keys(&self) -> Vec<QueueKey> {
        self.platforms
            .iter()
            .flat_map(|platform| {
                platform
                    .games
                    .iter()
                    .map(move |game| QueueKey::new(platform.name.clone(), game.clone()))
            })
            .collect()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn tolerance_interval(&self) -> Duration {
        Duration::from_secs(self.tolerance_interval_seconds)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_seconds)
    }

    pub fn pending_match_lifetime(&self) -> Duration {
        Duration::from_secs(self.pending_match_lifetime_seconds)
    }

    pub fn in_progress_match_lifetime(&self) -> Duration {
        Duration::from_secs(self.in_progress_match_lifetime_seconds)
    }
}

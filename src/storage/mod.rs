//! Persistence interface and implementations
//!
//! Players, matches, and rating periods are persisted through the [`Storage`]
//! trait. The service ships an in-memory backend, a JSON-file backend, and a
//! mock that records writes and can be told to fail them.

pub mod file;
pub mod memory;

use crate::error::Result;
use crate::matches::Match;
use crate::player::Player;
use crate::rating::RatingPeriod;
use crate::types::{MatchId, PlayerId, RatingPeriodId};
use async_trait::async_trait;

pub use file::JsonFileStorage;
pub use memory::{InMemoryStorage, MockStorage};

/// Trait for persistence operations
#[async_trait]
pub trait Storage: Send + Sync {
    /// Look up a player by id
    async fn get_player(&self, player_id: &PlayerId) -> Result<Option<Player>>;

    /// Insert or replace a player
    async fn save_player(&self, player: &Player) -> Result<()>;

    /// Insert or replace several players
    ///
    /// Backends without transactions may fail partway through the batch, so
    /// callers needing all-or-nothing commit through another single record.
    async fn save_players(&self, players: &[Player]) -> Result<()>;

    async fn list_players(&self) -> Result<Vec<Player>>;

    async fn get_match(&self, match_id: MatchId) -> Result<Option<Match>>;

    async fn save_match(&self, game_match: &Match) -> Result<()>;

    async fn list_matches(&self) -> Result<Vec<Match>>;

    async fn get_rating_period(&self, period_id: RatingPeriodId) -> Result<Option<RatingPeriod>>;

    async fn save_rating_period(&self, period: &RatingPeriod) -> Result<()>;

    async fn list_rating_periods(&self) -> Result<Vec<RatingPeriod>>;

    /// The rating period with the latest start time
    async fn latest_rating_period(&self) -> Result<Option<RatingPeriod>> {
        let periods = self.list_rating_periods().await?;
        Ok(periods.into_iter().max_by_key(|period| period.start_time))
    }
}

//! Shared player registry backed by the persistence collaborator
//!
//! All mutation of player records goes through the registry's write lock, which
//! serializes the matchmaker (queue flags) against the rating-period coordinator
//! (triplet finalization).

use crate::error::{MatchmakingError, Result};
use crate::player::record::Player;
use crate::storage::Storage;
use crate::types::{PlayerId, RatingTriplet};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub type PlayerMap = HashMap<PlayerId, Player>;

/// In-memory cache of player records in front of storage
#[derive(Clone)]
pub struct PlayerRegistry {
    players: Arc<RwLock<PlayerMap>>,
    storage: Arc<dyn Storage>,
    default_rating: RatingTriplet,
}

impl PlayerRegistry {
    pub fn new(storage: Arc<dyn Storage>, default_rating: RatingTriplet) -> Self {
        Self {
            players: Arc::new(RwLock::new(HashMap::new())),
            storage,
            default_rating,
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, PlayerMap> {
        self.players.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, PlayerMap> {
        self.players.write().await
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn default_rating(&self) -> RatingTriplet {
        self.default_rating
    }

    /// Snapshot of a player, looking in the cache and then in storage
    pub async fn get(&self, player_id: &PlayerId) -> Result<Option<Player>> {
        if let Some(player) = self.players.read().await.get(player_id) {
            return Ok(Some(player.clone()));
        }
        self.storage.get_player(player_id).await
    }

    /// Number of cached players
    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.players.read().await.is_empty()
    }

    /// Make sure `player_id` is present in `players`, loading it from storage.
    ///
    /// With `create` set, an unknown player is created with the default triplet
    /// and persisted; otherwise an unknown player is `PlayerNotFound`.
    pub async fn resolve<'a>(
        &self,
        players: &'a mut PlayerMap,
        player_id: &PlayerId,
        create: bool,
        now: DateTime<Utc>,
    ) -> Result<&'a mut Player> {
        if !players.contains_key(player_id) {
            let player = match self.storage.get_player(player_id).await? {
                Some(player) => {
                    debug!("Loaded player '{}' from storage", player_id);
                    player
                }
                None if create => {
                    let player = Player::new(player_id.clone(), self.default_rating, now);
                    self.storage.save_player(&player).await?;
                    debug!(
                        "Created player '{}' with rating {:.1}±{:.1}",
                        player_id, player.rating.rating, player.rating.deviation
                    );
                    player
                }
                None => {
                    return Err(MatchmakingError::PlayerNotFound {
                        player_id: player_id.clone(),
                    }
                    .into())
                }
            };
            players.insert(player_id.clone(), player);
        }

        players.get_mut(player_id).ok_or_else(|| {
            MatchmakingError::PlayerNotFound {
                player_id: player_id.clone(),
            }
            .into()
        })
    }
}

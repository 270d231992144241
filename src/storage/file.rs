//! JSON-file storage
//!
//! One JSON document per record under `players/`, `matches/` and `periods/`
//! inside the configured directory. Each document is written to a temporary
//! file first and then renamed into place.

use crate::error::{MatchmakingError, Result};
use crate::matches::Match;
use crate::player::Player;
use crate::rating::RatingPeriod;
use crate::storage::Storage;
use crate::types::{MatchId, PlayerId, RatingPeriodId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const PLAYERS_DIR: &str = "players";
const MATCHES_DIR: &str = "matches";
const PERIODS_DIR: &str = "periods";

#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    /// Open (and create if needed) a storage directory
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [PLAYERS_DIR, MATCHES_DIR, PERIODS_DIR] {
            fs::create_dir_all(root.join(dir))
                .await
                .map_err(|e| MatchmakingError::StorageError {
                    message: format!("Failed to create {}: {}", root.join(dir).display(), e),
                })?;
        }
        debug!("Opened JSON storage at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Player ids are free-form, so they are hex-encoded to get a safe file name
    fn player_path(&self, player_id: &PlayerId) -> PathBuf {
        let encoded: String = player_id.bytes().map(|b| format!("{:02x}", b)).collect();
        self.root
            .join(PLAYERS_DIR)
            .join(format!("{}.json", encoded))
    }

    fn match_path(&self, match_id: MatchId) -> PathBuf {
        self.root
            .join(MATCHES_DIR)
            .join(format!("{}.json", match_id))
    }

    fn period_path(&self, period_id: RatingPeriodId) -> PathBuf {
        self.root
            .join(PERIODS_DIR)
            .join(format!("{}.json", period_id))
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        let tmp = self.stage_json(path, value).await?;
        Self::commit_staged(&tmp, path).await
    }

    /// Write `value` next to `path` without replacing it yet
    async fn stage_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<PathBuf> {
        let body = serde_json::to_vec_pretty(value).map_err(|e| MatchmakingError::StorageError {
            message: format!("Failed to serialize {}: {}", path.display(), e),
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .map_err(|e| MatchmakingError::StorageError {
                message: format!("Failed to write {}: {}", tmp.display(), e),
            })?;
        Ok(tmp)
    }

    async fn commit_staged(tmp: &Path, path: &Path) -> Result<()> {
        fs::rename(tmp, path)
            .await
            .map_err(|e| MatchmakingError::StorageError {
                message: format!("Failed to replace {}: {}", path.display(), e),
            })?;
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let body = match fs::read(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MatchmakingError::StorageError {
                    message: format!("Failed to read {}: {}", path.display(), e),
                }
                .into())
            }
        };

        let value = serde_json::from_slice(&body).map_err(|e| MatchmakingError::StorageError {
            message: format!("Corrupt record {}: {}", path.display(), e),
        })?;
        Ok(Some(value))
    }

    async fn read_dir<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let dir = self.root.join(dir);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| MatchmakingError::StorageError {
                message: format!("Failed to list {}: {}", dir.display(), e),
            })?;

        let mut values = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MatchmakingError::StorageError {
                message: format!("Failed to list {}: {}", dir.display(), e),
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read_json(&path).await {
                Ok(Some(value)) => values.push(value),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record: {}", e),
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn get_player(&self, player_id: &PlayerId) -> Result<Option<Player>> {
        self.read_json(&self.player_path(player_id)).await
    }

    async fn save_player(&self, player: &Player) -> Result<()> {
        self.write_json(&self.player_path(&player.id), player).await
    }

    /// Every record is staged before any is renamed into place, so a
    /// serialization or write error leaves the batch untouched
    async fn save_players(&self, players: &[Player]) -> Result<()> {
        let mut staged = Vec::with_capacity(players.len());
        for player in players {
            let path = self.player_path(&player.id);
            match self.stage_json(&path, player).await {
                Ok(tmp) => staged.push((tmp, path)),
                Err(e) => {
                    for (tmp, _) in &staged {
                        let _ = fs::remove_file(tmp).await;
                    }
                    return Err(e);
                }
            }
        }
        for (tmp, path) in &staged {
            Self::commit_staged(tmp, path).await?;
        }
        Ok(())
    }

    async fn list_players(&self) -> Result<Vec<Player>> {
        self.read_dir(PLAYERS_DIR).await
    }

    async fn get_match(&self, match_id: MatchId) -> Result<Option<Match>> {
        self.read_json(&self.match_path(match_id)).await
    }

    async fn save_match(&self, game_match: &Match) -> Result<()> {
        self.write_json(&self.match_path(game_match.id), game_match)
            .await
    }

    async fn list_matches(&self) -> Result<Vec<Match>> {
        self.read_dir(MATCHES_DIR).await
    }

    async fn get_rating_period(&self, period_id: RatingPeriodId) -> Result<Option<RatingPeriod>> {
        self.read_json(&self.period_path(period_id)).await
    }

    async fn save_rating_period(&self, period: &RatingPeriod) -> Result<()> {
        self.write_json(&self.period_path(period.id), period).await
    }

    async fn list_rating_periods(&self) -> Result<Vec<RatingPeriod>> {
        self.read_dir(PERIODS_DIR).await
    }
}

//! In-memory storage and a recording mock for tests

use crate::error::{MatchmakingError, Result};
use crate::matches::Match;
use crate::player::Player;
use crate::rating::RatingPeriod;
use crate::storage::Storage;
use crate::types::{MatchId, PlayerId, RatingPeriodId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    players: HashMap<PlayerId, Player>,
    matches: HashMap<MatchId, Match>,
    periods: HashMap<RatingPeriodId, RatingPeriod>,
}

/// Process-local storage; contents are lost on restart
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire storage read lock".to_string(),
                }
                .into()
            })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire storage write lock".to_string(),
                }
                .into()
            })
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_player(&self, player_id: &PlayerId) -> Result<Option<Player>> {
        Ok(self.read()?.players.get(player_id).cloned())
    }

    async fn save_player(&self, player: &Player) -> Result<()> {
        self.write()?
            .players
            .insert(player.id.clone(), player.clone());
        Ok(())
    }

    async fn save_players(&self, players: &[Player]) -> Result<()> {
        let mut tables = self.write()?;
        for player in players {
            tables.players.insert(player.id.clone(), player.clone());
        }
        Ok(())
    }

    async fn list_players(&self) -> Result<Vec<Player>> {
        Ok(self.read()?.players.values().cloned().collect())
    }

    async fn get_match(&self, match_id: MatchId) -> Result<Option<Match>> {
        Ok(self.read()?.matches.get(&match_id).cloned())
    }

    async fn save_match(&self, game_match: &Match) -> Result<()> {
        self.write()?
            .matches
            .insert(game_match.id, game_match.clone());
        Ok(())
    }

    async fn list_matches(&self) -> Result<Vec<Match>> {
        Ok(self.read()?.matches.values().cloned().collect())
    }

    async fn get_rating_period(&self, period_id: RatingPeriodId) -> Result<Option<RatingPeriod>> {
        Ok(self.read()?.periods.get(&period_id).cloned())
    }

    async fn save_rating_period(&self, period: &RatingPeriod) -> Result<()> {
        self.write()?.periods.insert(period.id, period.clone());
        Ok(())
    }

    async fn list_rating_periods(&self) -> Result<Vec<RatingPeriod>> {
        Ok(self.read()?.periods.values().cloned().collect())
    }
}

/// Mock storage for testing
///
/// Delegates to an [`InMemoryStorage`], counts writes, and fails player or
/// rating-period writes on demand.
#[derive(Debug, Default)]
pub struct MockStorage {
    inner: InMemoryStorage,
    fail_player_writes: AtomicBool,
    fail_period_writes: AtomicBool,
    /// Batch writes store this many players and then fail
    fail_player_batch_after: RwLock<Option<usize>>,
    write_calls: RwLock<Vec<String>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_player_writes(&self, fail: bool) {
        self.fail_player_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_period_writes(&self, fail: bool) {
        self.fail_period_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `save_players` write the first `written` players and then fail
    pub fn set_fail_player_batch_after(&self, written: Option<usize>) {
        if let Ok(mut limit) = self.fail_player_batch_after.write() {
            *limit = written;
        }
    }

    /// Names of the write operations performed so far
    pub fn get_write_calls(&self) -> Vec<String> {
        self.write_calls
            .read()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn clear_write_calls(&self) {
        if let Ok(mut calls) = self.write_calls.write() {
            calls.clear();
        }
    }

    fn record(&self, call: &str) {
        if let Ok(mut calls) = self.write_calls.write() {
            calls.push(call.to_string());
        }
    }

    fn check(&self, flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(MatchmakingError::StorageError {
                message: format!("Simulated failure writing {}", what),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn get_player(&self, player_id: &PlayerId) -> Result<Option<Player>> {
        self.inner.get_player(player_id).await
    }

    async fn save_player(&self, player: &Player) -> Result<()> {
        self.check(&self.fail_player_writes, "player")?;
        self.record("save_player");
        self.inner.save_player(player).await
    }

    async fn save_players(&self, players: &[Player]) -> Result<()> {
        self.check(&self.fail_player_writes, "players")?;
        self.record("save_players");
        let limit = self
            .fail_player_batch_after
            .read()
            .map(|limit| *limit)
            .unwrap_or_default();
        match limit {
            Some(written) if written < players.len() => {
                self.inner.save_players(&players[..written]).await?;
                Err(MatchmakingError::StorageError {
                    message: format!(
                        "Simulated failure after writing {} of {} players",
                        written,
                        players.len()
                    ),
                }
                .into())
            }
            _ => self.inner.save_players(players).await,
        }
    }

    async fn list_players(&self) -> Result<Vec<Player>> {
        self.inner.list_players().await
    }

    async fn get_match(&self, match_id: MatchId) -> Result<Option<Match>> {
        self.inner.get_match(match_id).await
    }

    async fn save_match(&self, game_match: &Match) -> Result<()> {
        self.record("save_match");
        self.inner.save_match(game_match).await
    }

    async fn list_matches(&self) -> Result<Vec<Match>> {
        self.inner.list_matches().await
    }

    async fn get_rating_period(&self, period_id: RatingPeriodId) -> Result<Option<RatingPeriod>> {
        self.inner.get_rating_period(period_id).await
    }

    async fn save_rating_period(&self, period: &RatingPeriod) -> Result<()> {
        self.check(&self.fail_period_writes, "rating period")?;
        self.record("save_rating_period");
        self.inner.save_rating_period(period).await
    }

    async fn list_rating_periods(&self) -> Result<Vec<RatingPeriod>> {
        self.inner.list_rating_periods().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RatingTriplet;
    use crate::utils::current_timestamp;
    use chrono::Duration;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let storage = InMemoryStorage::new();
        let now = current_timestamp();

        let players = vec![
            Player::new("alice", RatingTriplet::default(), now),
            Player::new("bob", RatingTriplet::new(1650.0, 120.0, 0.06), now),
        ];
        storage.save_players(&players).await.unwrap();
        assert_eq!(storage.list_players().await.unwrap().len(), 2);
        assert_eq!(
            storage
                .get_player(&"bob".to_string())
                .await
                .unwrap()
                .unwrap()
                .rating
                .rating,
            1650.0
        );
        assert!(storage
            .get_player(&"carol".to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_latest_rating_period() {
        let storage = InMemoryStorage::new();
        assert!(storage.latest_rating_period().await.unwrap().is_none());

        let start = current_timestamp();
        let first = RatingPeriod::new(start, Duration::hours(72));
        let second = first.successor();
        storage.save_rating_period(&second).await.unwrap();
        storage.save_rating_period(&first).await.unwrap();

        let latest = storage.latest_rating_period().await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn test_mock_storage_failures() {
        let storage = MockStorage::new();
        let player = Player::new("alice", RatingTriplet::default(), current_timestamp());

        storage.save_player(&player).await.unwrap();
        storage.set_fail_player_writes(true);
        let err = storage.save_players(&[player.clone()]).await.unwrap_err();
        assert!(matches!(
            MatchmakingError::kind_of(&err),
            Some(MatchmakingError::StorageError { .. })
        ));

        storage.set_fail_player_writes(false);
        storage.save_players(&[player]).await.unwrap();
        assert_eq!(
            storage.get_write_calls(),
            vec!["save_player".to_string(), "save_players".to_string()]
        );
    }
}

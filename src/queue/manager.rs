//! Per-platform, per-game waiting pools
//!
//! Every sub-queue keeps its entries in join order. Entries carry their own
//! waiting metadata (join time, tolerance, in-match flag) independent of the
//! player record.

use crate::error::{MatchmakingError, Result};
use crate::types::{PlayerId, QueueKey};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// How tolerance grows while a player waits
#[derive(Debug, Clone, Copy)]
pub struct ToleranceSettings {
    pub initial: f64,
    pub step: f64,
    pub interval: Duration,
}

impl Default for ToleranceSettings {
    fn default() -> Self {
        Self {
            initial: 0.0,
            step: 25.0,
            interval: Duration::seconds(180),
        }
    }
}

/// Waiting metadata of one player in one sub-queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPlayer {
    pub player_id: PlayerId,
    pub joined_at: DateTime<Utc>,
    pub tolerance: f64,
    /// Last time tolerance was widened, initially the join time
    pub last_widened_at: DateTime<Utc>,
    pub in_match: bool,
}

impl QueuedPlayer {
    fn new(player_id: PlayerId, now: DateTime<Utc>, tolerance: f64) -> Self {
        Self {
            player_id,
            joined_at: now,
            tolerance,
            last_widened_at: now,
            in_match: false,
        }
    }

    pub fn waiting_time(&self, now: DateTime<Utc>) -> Duration {
        now - self.joined_at
    }
}

type SubQueue = IndexMap<PlayerId, QueuedPlayer>;

/// Statistics about queue activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub tolerance_widenings: u64,
    pub players_waiting: usize,
    /// Players waiting per queue, keyed by "platform/game"
    pub waiting_by_queue: BTreeMap<String, usize>,
}

pub struct QueueManager {
    queues: RwLock<HashMap<QueueKey, SubQueue>>,
    tolerance: ToleranceSettings,
    stats: RwLock<QueueStats>,
}

impl QueueManager {
    /// Create a manager with one empty sub-queue per key
    pub fn new(keys: impl IntoIterator<Item = QueueKey>, tolerance: ToleranceSettings) -> Self {
        let queues = keys
            .into_iter()
            .map(|key| (key, SubQueue::new()))
            .collect();

        Self {
            queues: RwLock::new(queues),
            tolerance,
            stats: RwLock::new(QueueStats::default()),
        }
    }

    pub fn tolerance_settings(&self) -> ToleranceSettings {
        self.tolerance
    }

    /// Add a player to a sub-queue; returns false if already there
    pub fn enqueue_at(&self, player_id: &PlayerId, key: &QueueKey, now: DateTime<Utc>) -> Result<bool> {
        let mut queues = self.write_queues()?;
        let queue = Self::sub_queue_mut(&mut queues, key)?;

        if queue.contains_key(player_id) {
            debug!("Player {} already queued on {}", player_id, key);
            return Ok(false);
        }

        queue.insert(
            player_id.clone(),
            QueuedPlayer::new(player_id.clone(), now, self.tolerance.initial),
        );
        drop(queues);

        self.update_stats(|stats| stats.total_enqueued += 1)?;
        Ok(true)
    }

    /// Remove a player from a sub-queue; returns false if absent
    pub fn dequeue(&self, player_id: &PlayerId, key: &QueueKey) -> Result<bool> {
        let mut queues = self.write_queues()?;
        let queue = Self::sub_queue_mut(&mut queues, key)?;
        let removed = queue.shift_remove(player_id).is_some();
        drop(queues);

        if removed {
            self.update_stats(|stats| stats.total_dequeued += 1)?;
        }
        Ok(removed)
    }

    /// Remove a player from every game under a platform
    pub fn dequeue_all(&self, player_id: &PlayerId, platform: &str) -> Result<usize> {
        self.remove_where(player_id, |key| key.platform == platform)
    }

    /// Remove a player from every sub-queue
    pub fn dequeue_everywhere(&self, player_id: &PlayerId) -> Result<usize> {
        self.remove_where(player_id, |_| true)
    }

    /// Widen the tolerance of every waiting, unpaired entry whose last widening
    /// is older than the configured interval. Returns the number widened.
    pub fn age_tolerances_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut queues = self.write_queues()?;
        let mut widened = 0;

        for entry in queues
            .values_mut()
            .flat_map(|queue| queue.values_mut())
            .filter(|entry| !entry.in_match)
        {
            if now - entry.last_widened_at > self.tolerance.interval {
                entry.tolerance += self.tolerance.step;
                entry.last_widened_at = now;
                widened += 1;
            }
        }
        drop(queues);

        if widened > 0 {
            self.update_stats(|stats| stats.tolerance_widenings += widened as u64)?;
        }
        Ok(widened)
    }

    /// Set the in-match flag of a queue entry; false when absent or unchanged
    pub fn update_match_state(&self, player_id: &PlayerId, key: &QueueKey, in_match: bool) -> Result<bool> {
        let mut queues = self.write_queues()?;
        let queue = Self::sub_queue_mut(&mut queues, key)?;

        match queue.get_mut(player_id) {
            Some(entry) if entry.in_match != in_match => {
                entry.in_match = in_match;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Entries of one sub-queue in join order
    pub fn snapshot(&self, key: &QueueKey) -> Result<Vec<QueuedPlayer>> {
        let queues = self.read_queues()?;
        let queue = queues
            .get(key)
            .ok_or_else(|| Self::unknown_queue(key))?;
        Ok(queue.values().cloned().collect())
    }

    /// Entries of every sub-queue, in sorted key order
    pub fn snapshot_all(&self) -> Result<BTreeMap<QueueKey, Vec<QueuedPlayer>>> {
        let queues = self.read_queues()?;
        Ok(queues
            .iter()
            .map(|(key, queue)| (key.clone(), queue.values().cloned().collect()))
            .collect())
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Result<Vec<QueueKey>> {
        let queues = self.read_queues()?;
        let mut keys: Vec<QueueKey> = queues.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn has_queue(&self, key: &QueueKey) -> Result<bool> {
        Ok(self.read_queues()?.contains_key(key))
    }

    pub fn is_queued(&self, player_id: &PlayerId, key: &QueueKey) -> Result<bool> {
        Ok(self
            .read_queues()?
            .get(key)
            .is_some_and(|queue| queue.contains_key(player_id)))
    }

    /// Keys of every sub-queue the player waits in
    pub fn queues_of(&self, player_id: &PlayerId) -> Result<Vec<QueueKey>> {
        let queues = self.read_queues()?;
        let mut keys: Vec<QueueKey> = queues
            .iter()
            .filter(|(_, queue)| queue.contains_key(player_id))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Largest tolerance across the player's entries
    pub fn tolerance_of(&self, player_id: &PlayerId) -> Result<Option<f64>> {
        let queues = self.read_queues()?;
        Ok(queues
            .values()
            .filter_map(|queue| queue.get(player_id))
            .map(|entry| entry.tolerance)
            .reduce(f64::max))
    }

    pub fn waiting_count(&self) -> Result<usize> {
        Ok(self.read_queues()?.values().map(|queue| queue.len()).sum())
    }

    /// Get queue statistics
    pub fn get_stats(&self) -> Result<QueueStats> {
        let waiting_by_queue: BTreeMap<String, usize> = self
            .read_queues()?
            .iter()
            .map(|(key, queue)| (key.to_string(), queue.len()))
            .collect();

        let stats = self.stats.read().map_err(|_| MatchmakingError::InternalError {
            message: "Failed to acquire queue stats lock".to_string(),
        })?;

        let mut snapshot = stats.clone();
        snapshot.players_waiting = waiting_by_queue.values().sum();
        snapshot.waiting_by_queue = waiting_by_queue;
        Ok(snapshot)
    }

    fn remove_where(&self, player_id: &PlayerId, matches: impl Fn(&QueueKey) -> bool) -> Result<usize> {
        let mut queues = self.write_queues()?;
        let mut removed = 0;
        for (key, queue) in queues.iter_mut() {
            if matches(key) && queue.shift_remove(player_id).is_some() {
                removed += 1;
            }
        }
        drop(queues);

        if removed > 0 {
            self.update_stats(|stats| stats.total_dequeued += removed as u64)?;
        }
        Ok(removed)
    }

    fn sub_queue_mut<'a>(
        queues: &'a mut HashMap<QueueKey, SubQueue>,
        key: &QueueKey,
    ) -> Result<&'a mut SubQueue> {
        queues.get_mut(key).ok_or_else(|| Self::unknown_queue(key))
    }

    fn unknown_queue(key: &QueueKey) -> anyhow::Error {
        MatchmakingError::InvalidQueueRequest {
            reason: format!("Unknown queue {}", key),
        }
        .into()
    }

    fn read_queues(&self) -> Result<RwLockReadGuard<'_, HashMap<QueueKey, SubQueue>>> {
        self.queues.read().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire queues read lock".to_string(),
            }
            .into()
        })
    }

    fn write_queues(&self) -> Result<RwLockWriteGuard<'_, HashMap<QueueKey, SubQueue>>> {
        self.queues.write().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire queues write lock".to_string(),
            }
            .into()
        })
    }

    fn update_stats(&self, update: impl FnOnce(&mut QueueStats)) -> Result<()> {
        let mut stats = self.stats.write().map_err(|_| MatchmakingError::InternalError {
            message: "Failed to acquire queue stats lock".to_string(),
        })?;
        update(&mut stats);
        Ok(())
    }
}

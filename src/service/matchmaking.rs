//! Command facade over the queue manager and the match handler
//!
//! Every inbound command, whether it arrives over AMQP or from a test, goes
//! through [`MatchmakingService`]. Queue commands never fail for duplicates;
//! they report the outcome instead.

use crate::amqp::handlers::MessageHandler;
use crate::amqp::messages::MessageUtils;
use crate::error::{MatchmakingError, Result};
use crate::matches::{Match, MatchHandler};
use crate::metrics::MetricsCollector;
use crate::player::PlayerRegistry;
use crate::queue::QueueManager;
use crate::types::*;
use crate::utils::current_timestamp;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct MatchmakingService {
    queues: Arc<QueueManager>,
    players: PlayerRegistry,
    handler: Arc<MatchHandler>,
    /// Highest score a report may carry; 0 disables the bound
    first_to: u32,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchmakingService {
    pub fn new(
        queues: Arc<QueueManager>,
        players: PlayerRegistry,
        handler: Arc<MatchHandler>,
        first_to: u32,
    ) -> Self {
        Self {
            queues,
            players,
            handler,
            first_to,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn queues(&self) -> Arc<QueueManager> {
        self.queues.clone()
    }

    pub fn handler(&self) -> Arc<MatchHandler> {
        self.handler.clone()
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    pub async fn enqueue(&self, player_id: &PlayerId, key: &QueueKey) -> Result<CommandOutcome> {
        self.enqueue_at(player_id, key, current_timestamp()).await
    }

    /// Put a player into one platform/game queue, creating the player on first contact
    pub async fn enqueue_at(
        &self,
        player_id: &PlayerId,
        key: &QueueKey,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        MessageUtils::require_player_id(player_id)?;
        if !self.queues.has_queue(key)? {
            return Err(MatchmakingError::InvalidQueueRequest {
                reason: format!("Unknown queue {}", key),
            }
            .into());
        }

        let snapshot = {
            let mut players = self.players.write().await;
            let player = self.players.resolve(&mut players, player_id, true, now).await?;

            if player.in_match {
                debug!("Player {} is in a match, not queueing on {}", player_id, key);
                return Ok(CommandOutcome::AlreadyInMatch);
            }

            if !self.queues.enqueue_at(player_id, key, now)? {
                debug!("Player {} already waiting on {}", player_id, key);
                return Ok(CommandOutcome::AlreadyQueued);
            }

            player.mark_queued(now);
            player.add_platform(key.platform.clone());
            player.clone()
        };

        if let Err(e) = self.players.storage().save_player(&snapshot).await {
            warn!("Failed to persist queued player {}: {}", player_id, e);
        }

        info!(
            "Player {} queued on {} (rating {:.1}±{:.1})",
            player_id, key, snapshot.rating.rating, snapshot.rating.deviation
        );
        Ok(CommandOutcome::Queued)
    }

    /// Leave one game queue, or every game on the platform when `game` is `None`
    pub async fn dequeue(
        &self,
        player_id: &PlayerId,
        platform: &str,
        game: Option<&str>,
    ) -> Result<CommandOutcome> {
        let snapshot = {
            let mut players = self.players.write().await;

            let removed = match game {
                Some(game) => {
                    let key = QueueKey::new(platform, game);
                    if !self.queues.has_queue(&key)? {
                        return Err(MatchmakingError::InvalidQueueRequest {
                            reason: format!("Unknown queue {}", key),
                        }
                        .into());
                    }
                    usize::from(self.queues.dequeue(player_id, &key)?)
                }
                None => self.queues.dequeue_all(player_id, platform)?,
            };

            if removed == 0 {
                debug!("Player {} was not queued on {}", player_id, platform);
                return Ok(CommandOutcome::NotQueued);
            }

            let still_waiting = !self.queues.queues_of(player_id)?.is_empty();
            match players.get_mut(player_id) {
                Some(player) if !still_waiting => {
                    player.mark_dequeued();
                    Some(player.clone())
                }
                _ => None,
            }
        };

        if let Some(player) = snapshot {
            if let Err(e) = self.players.storage().save_player(&player).await {
                warn!("Failed to persist dequeued player {}: {}", player_id, e);
            }
        }

        info!("Player {} left the queue on {}", player_id, platform);
        Ok(CommandOutcome::Dequeued)
    }

    pub async fn start_match(&self, match_id: MatchId) -> Result<Match> {
        self.handler.start_match_at(match_id, current_timestamp()).await
    }

    /// Record the final score of an in-progress match
    pub async fn report_score(
        &self,
        match_id: MatchId,
        player1_score: u32,
        player2_score: u32,
    ) -> Result<Match> {
        self.report_score_at(match_id, player1_score, player2_score, current_timestamp())
            .await
    }

    pub async fn report_score_at(
        &self,
        match_id: MatchId,
        player1_score: u32,
        player2_score: u32,
        now: DateTime<Utc>,
    ) -> Result<Match> {
        self.validate_scores(match_id, player1_score, player2_score)?;
        self.handler
            .report_score_at(match_id, player1_score, player2_score, now)
            .await
    }

    pub async fn cancel_match(&self, match_id: MatchId) -> Result<Match> {
        self.handler
            .cancel_match_at(match_id, CancelReason::Requested, current_timestamp())
            .await
    }

    /// Dispatch one inbound command
    pub async fn handle_command(&self, command: QueueCommand) -> Result<CommandOutcome> {
        let name = command.name();
        let started = Instant::now();

        let result = match command {
            QueueCommand::Enqueue(request) => {
                let key = QueueKey::new(request.platform, request.game);
                self.enqueue(&request.player_id, &key).await
            }
            QueueCommand::Dequeue(request) => {
                self.dequeue(&request.player_id, &request.platform, request.game.as_deref())
                    .await
            }
            QueueCommand::StartMatch(request) => self
                .start_match(request.match_id)
                .await
                .map(|_| CommandOutcome::MatchStarted),
            QueueCommand::ReportScore(report) => self
                .report_score(report.match_id, report.player1_score, report.player2_score)
                .await
                .map(|_| CommandOutcome::MatchCompleted),
            QueueCommand::CancelMatch(request) => self
                .cancel_match(request.match_id)
                .await
                .map(|_| CommandOutcome::MatchCancelled),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_command(name, result.is_ok(), started.elapsed());
        }
        result
    }

    fn validate_scores(&self, match_id: MatchId, player1_score: u32, player2_score: u32) -> Result<()> {
        if self.first_to > 0 && player1_score.max(player2_score) > self.first_to {
            return Err(MatchmakingError::InvalidMatchData {
                reason: format!(
                    "Score {}-{} for match {} exceeds first-to {}",
                    player1_score, player2_score, match_id, self.first_to
                ),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for MatchmakingService {
    async fn handle_command(&self, command: QueueCommand) -> Result<CommandOutcome> {
        MatchmakingService::handle_command(self, command).await
    }

    async fn handle_error(&self, error: &anyhow::Error, message_data: &[u8]) {
        match MatchmakingError::kind_of(error) {
            Some(kind) if kind.is_contract_violation() => {
                warn!("Rejected command ({} bytes): {}", message_data.len(), error);
            }
            _ => {
                error!(
                    "Command handling failed - error: '{}', message_size: {} bytes",
                    error,
                    message_data.len()
                );
                if !message_data.is_empty() {
                    let preview_len = std::cmp::min(100, message_data.len());
                    let preview = String::from_utf8_lossy(&message_data[..preview_len]);
                    error!("Message preview: {:?}", preview);
                }
            }
        }
    }
}

//! In-process fan-out of lifecycle events
//!
//! Core components publish through the [`EventPublisher`] trait without
//! knowing who listens. The AMQP relay and the metrics feeder each hold their
//! own receiver, so a slow consumer only lags itself.

use crate::amqp::EventPublisher;
use crate::error::Result;
use crate::types::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Broadcast channel carrying every [`MatchmakingEvent`]
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<MatchmakingEvent>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchmakingEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream; lagged receivers surface as stream errors
    pub fn stream(&self) -> BroadcastStream<MatchmakingEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Events accepted by the bus
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events sent while nobody was subscribed
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn send(&self, event: MatchmakingEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => debug!("Event {} delivered to {} subscribers", name, receivers),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Event {} had no subscribers", name);
            }
        }
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish_match_created(&self, event: MatchCreated) -> Result<()> {
        self.send(MatchmakingEvent::MatchCreated(event));
        Ok(())
    }

    async fn publish_match_started(&self, event: MatchStarted) -> Result<()> {
        self.send(MatchmakingEvent::MatchStarted(event));
        Ok(())
    }

    async fn publish_match_completed(&self, event: MatchCompleted) -> Result<()> {
        self.send(MatchmakingEvent::MatchCompleted(event));
        Ok(())
    }

    async fn publish_match_cancelled(&self, event: MatchCancelled) -> Result<()> {
        self.send(MatchmakingEvent::MatchCancelled(event));
        Ok(())
    }

    async fn publish_rating_period_ended(&self, event: RatingPeriodEnded) -> Result<()> {
        self.send(MatchmakingEvent::RatingPeriodEnded(event));
        Ok(())
    }
}

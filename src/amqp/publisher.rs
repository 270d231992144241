//! AMQP event publisher for outbound events

use crate::amqp::messages::{
    MessageEnvelope, EVENTS_EXCHANGE, MATCH_CANCELLED_ROUTING_KEY, MATCH_COMPLETED_ROUTING_KEY,
    MATCH_CREATED_ROUTING_KEY, MATCH_STARTED_ROUTING_KEY, RATING_PERIOD_ENDED_ROUTING_KEY,
};
use crate::error::{MatchmakingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing matchmaking events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a MatchCreated event
    async fn publish_match_created(&self, event: MatchCreated) -> Result<()>;

    /// Publish a MatchStarted event
    async fn publish_match_started(&self, event: MatchStarted) -> Result<()>;

    /// Publish a MatchCompleted event
    async fn publish_match_completed(&self, event: MatchCompleted) -> Result<()>;

    /// Publish a MatchCancelled event
    async fn publish_match_cancelled(&self, event: MatchCancelled) -> Result<()>;

    /// Publish a RatingPeriodEnded event
    async fn publish_rating_period_ended(&self, event: RatingPeriodEnded) -> Result<()>;
}

/// Route a tagged event to the matching publisher method
pub async fn publish_event(publisher: &dyn EventPublisher, event: MatchmakingEvent) -> Result<()> {
    match event {
        MatchmakingEvent::MatchCreated(e) => publisher.publish_match_created(e).await,
        MatchmakingEvent::MatchStarted(e) => publisher.publish_match_started(e).await,
        MatchmakingEvent::MatchCompleted(e) => publisher.publish_match_completed(e).await,
        MatchmakingEvent::MatchCancelled(e) => publisher.publish_match_cancelled(e).await,
        MatchmakingEvent::RatingPeriodEnded(e) => publisher.publish_rating_period_ended(e).await,
    }
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    /// Correlation ids remembered for de-duplication before the cache is reset
    pub deduplication_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            deduplication_capacity: 10_000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: std::sync::Mutex::new(std::collections::HashSet::new()),
        };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare events exchange {}: {}",
                    self.config.exchange_name, e
                ),
            }
        })?;

        info!(
            "Successfully set up AMQP exchange '{}'",
            self.config.exchange_name
        );
        Ok(())
    }

    /// Publish to the events exchange with retry logic
    async fn publish_envelope<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if self.config.enable_deduplication {
            let published_messages =
                self.published_messages
                    .lock()
                    .map_err(|_| MatchmakingError::InternalError {
                        message: "Failed to acquire published messages lock".to_string(),
                    })?;
            if published_messages.contains(&envelope.correlation_id) {
                debug!(
                    "Message {} already published, skipping",
                    envelope.correlation_id
                );
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published_messages =
                            self.published_messages.lock().map_err(|_| {
                                MatchmakingError::InternalError {
                                    message: "Failed to acquire published messages lock"
                                        .to_string(),
                                }
                            })?;
                        if published_messages.len() >= self.config.deduplication_capacity {
                            published_messages.clear();
                        }
                        published_messages.insert(envelope.correlation_id.clone());
                    }

                    debug!(
                        "Published {} ({})",
                        envelope.routing_key, envelope.correlation_id
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    /// Get number of cached message IDs (for monitoring)
    pub fn cached_message_count(&self) -> usize {
        self.published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_match_created(&self, event: MatchCreated) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_CREATED_ROUTING_KEY.to_string());
        self.publish_envelope(&envelope).await
    }

    async fn publish_match_started(&self, event: MatchStarted) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_STARTED_ROUTING_KEY.to_string());
        self.publish_envelope(&envelope).await
    }

    async fn publish_match_completed(&self, event: MatchCompleted) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_COMPLETED_ROUTING_KEY.to_string());
        self.publish_envelope(&envelope).await
    }

    async fn publish_match_cancelled(&self, event: MatchCancelled) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_CANCELLED_ROUTING_KEY.to_string());
        self.publish_envelope(&envelope).await
    }

    async fn publish_rating_period_ended(&self, event: RatingPeriodEnded) -> Result<()> {
        let envelope = MessageEnvelope::new(event, RATING_PERIOD_ENDED_ROUTING_KEY.to_string());
        self.publish_envelope(&envelope).await
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<String>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published event types (for testing)
    pub fn get_published_events(&self) -> Vec<String> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, name: &str) {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(name.to_string());
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_match_created(&self, _event: MatchCreated) -> Result<()> {
        self.record("MatchCreated");
        Ok(())
    }

    async fn publish_match_started(&self, _event: MatchStarted) -> Result<()> {
        self.record("MatchStarted");
        Ok(())
    }

    async fn publish_match_completed(&self, _event: MatchCompleted) -> Result<()> {
        self.record("MatchCompleted");
        Ok(())
    }

    async fn publish_match_cancelled(&self, _event: MatchCancelled) -> Result<()> {
        self.record("MatchCancelled");
        Ok(())
    }

    async fn publish_rating_period_ended(&self, _event: RatingPeriodEnded) -> Result<()> {
        self.record("RatingPeriodEnded");
        Ok(())
    }
}

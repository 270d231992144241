//! AMQP message handlers for processing inbound commands
//!
//! The consumer decodes each delivery into a [`QueueCommand`] and forwards it
//! to a [`MessageHandler`]. Failures are reported to the handler and logged;
//! they never stop consumption.

use crate::amqp::messages::MessageUtils;
use crate::error::{MatchmakingError, Result};
use crate::types::{CommandOutcome, QueueCommand};
use amqprs::{
    channel::{BasicCancelArguments, BasicConsumeArguments, Channel, QueueDeclareArguments},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Trait defining the interface for handling inbound commands
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one decoded command
    async fn handle_command(&self, command: QueueCommand) -> Result<CommandOutcome>;

    /// Handle processing errors
    async fn handle_error(&self, error: &anyhow::Error, message_data: &[u8]);
}

/// Consumer for the command queue
pub struct CommandConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("ranked-arena-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Declare the durable command queue
    pub async fn declare_queue(&self, queue_name: &str) -> Result<()> {
        let args = QueueDeclareArguments::new(queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();

        self.channel
            .queue_declare(args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        info!("Queue '{}' declared successfully", queue_name);
        Ok(())
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag)
            .manual_ack(false)
            .finish();

        self.channel
            .basic_consume(CommandDelivery::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming commands");
        Ok(())
    }
}

/// Internal consumer implementation
struct CommandDelivery {
    handler: Arc<dyn MessageHandler>,
}

impl CommandDelivery {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for CommandDelivery {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, size: {} bytes",
            delivery_tag,
            content.len()
        );

        let start_time = std::time::Instant::now();
        match process_message(self.handler.as_ref(), &content).await {
            Ok(outcome) => {
                info!(
                    "Command processed - delivery_tag: {}, outcome: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    outcome,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Command processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                self.handler.handle_error(&e, &content).await;
            }
        }
    }
}

/// Decode and dispatch one message body
pub async fn process_message(handler: &dyn MessageHandler, content: &[u8]) -> Result<CommandOutcome> {
    let command = MessageUtils::deserialize_command(content)?;
    debug!("Dispatching {} command", command.name());
    handler.handle_command(command).await
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received_commands: Arc<tokio::sync::Mutex<Vec<QueueCommand>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl Default for MockMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageHandler {
    pub fn new() -> Self {
        Self {
            received_commands: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_command(&self, command: QueueCommand) -> Result<CommandOutcome> {
        let outcome = match &command {
            QueueCommand::Enqueue(_) => CommandOutcome::Queued,
            QueueCommand::Dequeue(_) => CommandOutcome::Dequeued,
            QueueCommand::StartMatch(_) => CommandOutcome::MatchStarted,
            QueueCommand::ReportScore(_) => CommandOutcome::MatchCompleted,
            QueueCommand::CancelMatch(_) => CommandOutcome::MatchCancelled,
        };
        self.received_commands.lock().await.push(command);
        Ok(outcome)
    }

    async fn handle_error(&self, error: &anyhow::Error, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

//! AMQP consumer for inbound chat commands
//!
//! Every delivery is decoded into a `CommandRequest` and handed to a
//! `MessageHandler` on its own task, then acknowledged. Undecodable messages are
//! reported to the handler and acknowledged so they are not redelivered forever.

use crate::amqp::messages::MessageUtils;
use crate::error::{Result, ScrimError};
use crate::types::CommandRequest;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling inbound commands
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one command from the chat gateway
    async fn handle_command(&self, request: CommandRequest) -> Result<()>;

    /// Handle a message that could not be decoded or processed
    async fn handle_error(&self, error: anyhow::Error, message_data: &[u8]);
}

/// Consumer bound to the command queue
pub struct CommandConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("scrim-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag)
            .manual_ack(true)
            .finish();

        self.channel
            .basic_consume(CommandDelivery::new(self.handler.clone()), args)
            .await
            .map_err(|e| ScrimError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| ScrimError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

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
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let handler = self.handler.clone();
        let channel = channel.clone();
        tokio::spawn(async move {
            let start_time = std::time::Instant::now();

            if let Err(e) = process_message(handler.as_ref(), &content).await {
                error!(
                    "Message processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                handler.handle_error(e, &content).await;
            }

            let ack = BasicAckArguments::new(delivery_tag, false);
            if let Err(e) = channel.basic_ack(ack).await {
                warn!(
                    "Failed to acknowledge message - delivery_tag: {}, error: {}",
                    delivery_tag, e
                );
            }
        });
    }
}

/// Decode a delivery and forward it to the handler
pub async fn process_message(handler: &dyn MessageHandler, content: &[u8]) -> Result<()> {
    let request = MessageUtils::deserialize_command_request(content)?;

    debug!(
        "Command parsed - guild: '{}', player: '{}', command: {}",
        request.guild_id,
        request.player.player_id,
        request.command.name()
    );

    handler.handle_command(request).await
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received_requests: Arc<tokio::sync::Mutex<Vec<CommandRequest>>>,
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
            received_requests: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_command(&self, request: CommandRequest) -> Result<()> {
        self.received_requests.lock().await.push(request);
        Ok(())
    }

    async fn handle_error(&self, error: anyhow::Error, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatCommand, PlayerRef};

    fn request_bytes(command: ChatCommand) -> Vec<u8> {
        let request = CommandRequest {
            guild_id: "guild-1".to_string(),
            player: PlayerRef {
                player_id: "42".to_string(),
                display_name: "tester".to_string(),
            },
            command,
            correlation_id: "corr-1".to_string(),
            timestamp: chrono::Utc::now(),
        };
        MessageUtils::serialize_command_request(&request).unwrap()
    }

    #[tokio::test]
    async fn test_process_message_forwards_valid_commands() {
        let handler = MockMessageHandler::new();
        process_message(&handler, &request_bytes(ChatCommand::JoinQueue))
            .await
            .unwrap();

        let received = handler.received_requests.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].command, ChatCommand::JoinQueue);
    }

    #[tokio::test]
    async fn test_process_message_rejects_garbage() {
        let handler = MockMessageHandler::new();
        let err = process_message(&handler, b"{\"guild_id\":").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ScrimError>(),
            Some(ScrimError::UserInput { .. })
        ));
        assert!(handler.received_requests.lock().await.is_empty());
    }
}

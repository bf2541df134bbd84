//! AMQP publisher for lobby events and command replies

use crate::amqp::messages::{
    MessageEnvelope, MessageUtils, LOBBY_EVENTS_EXCHANGE, REPLY_EXCHANGE,
};
use crate::error::{Result, ScrimError};
use crate::types::{CommandReply, LobbyEvent};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Outbound side of the service
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Broadcast a lifecycle event to the guild
    async fn publish_lobby_event(&self, event: LobbyEvent) -> Result<()>;

    /// Answer the player who issued a command
    async fn publish_reply(&self, reply: CommandReply) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub reply_exchange: String,
    pub event_exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    /// Deduplication cache is cleared once it grows past this
    pub dedup_cache_limit: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            reply_exchange: REPLY_EXCHANGE.to_string(),
            event_exchange: LOBBY_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            dedup_cache_limit: 10_000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: Mutex<HashSet<String>>,
}

impl AmqpEventPublisher {
    /// Create a new publisher and declare its exchanges
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: Mutex::new(HashSet::new()),
        };

        publisher.setup_exchanges().await?;

        Ok(publisher)
    }

    async fn setup_exchanges(&self) -> Result<()> {
        for exchange in [&self.config.reply_exchange, &self.config.event_exchange] {
            let args = ExchangeDeclareArguments::new(exchange, "topic");
            self.channel.exchange_declare(args).await.map_err(|e| {
                ScrimError::AmqpConnectionFailed {
                    message: format!("Failed to declare exchange '{}': {}", exchange, e),
                }
            })?;
        }

        info!(
            "Successfully set up AMQP exchanges - replies: '{}', events: '{}'",
            self.config.reply_exchange, self.config.event_exchange
        );
        Ok(())
    }

    fn already_published(&self, correlation_id: &str) -> Result<bool> {
        if !self.config.enable_deduplication {
            return Ok(false);
        }
        let published = self
            .published_messages
            .lock()
            .map_err(|_| ScrimError::InternalError {
                message: "Failed to acquire published messages lock".to_string(),
            })?;
        Ok(published.contains(correlation_id))
    }

    fn remember(&self, correlation_id: &str) -> Result<()> {
        if !self.config.enable_deduplication {
            return Ok(());
        }
        let mut published = self
            .published_messages
            .lock()
            .map_err(|_| ScrimError::InternalError {
                message: "Failed to acquire published messages lock".to_string(),
            })?;
        if published.len() >= self.config.dedup_cache_limit {
            published.clear();
        }
        published.insert(correlation_id.to_string());
        Ok(())
    }

    /// Publish to an exchange with exponential-backoff retries
    async fn publish_to_exchange<T>(
        &self,
        exchange: &str,
        envelope: &MessageEnvelope<T>,
    ) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if self.already_published(&envelope.correlation_id)? {
            debug!(
                "Message {} already published, skipping",
                envelope.correlation_id
            );
            return Ok(());
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(exchange, envelope).await {
                Ok(_) => {
                    self.remember(&envelope.correlation_id)?;
                    debug!(
                        "Successfully published message {} to exchange {} ({})",
                        envelope.correlation_id, exchange, envelope.routing_key
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

    async fn try_publish<T>(&self, exchange: &str, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_correlation_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| ScrimError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    /// Number of cached message ids
    pub fn cached_message_count(&self) -> usize {
        self.published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_lobby_event(&self, event: LobbyEvent) -> Result<()> {
        let routing_key = MessageUtils::event_routing_key(&event).to_string();
        let envelope = MessageEnvelope::new(event, routing_key);
        self.publish_to_exchange(&self.config.event_exchange, &envelope)
            .await
    }

    async fn publish_reply(&self, reply: CommandReply) -> Result<()> {
        let routing_key = format!("reply.{}", reply.command);
        let correlation_id = reply.correlation_id.clone();
        let envelope = MessageEnvelope::with_correlation_id(reply, routing_key, correlation_id);
        self.publish_to_exchange(&self.config.reply_exchange, &envelope)
            .await
    }
}

/// Publisher that records everything in memory
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    events: Mutex<Vec<LobbyEvent>>,
    replies: Mutex<Vec<CommandReply>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LobbyEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of published events in order
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|events| events.iter().map(LobbyEvent::name).collect())
            .unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn count_events(&self, name: &str) -> usize {
        self.event_names().iter().filter(|n| **n == name).count()
    }

    pub fn replies(&self) -> Vec<CommandReply> {
        self.replies
            .lock()
            .map(|replies| replies.clone())
            .unwrap_or_default()
    }

    pub fn last_reply(&self) -> Option<CommandReply> {
        self.replies().pop()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
        if let Ok(mut replies) = self.replies.lock() {
            replies.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_lobby_event(&self, event: LobbyEvent) -> Result<()> {
        let mut events = self.events.lock().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire mock events lock".to_string(),
        })?;
        events.push(event);
        Ok(())
    }

    async fn publish_reply(&self, reply: CommandReply) -> Result<()> {
        let mut replies = self.replies.lock().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire mock replies lock".to_string(),
        })?;
        replies.push(reply);
        Ok(())
    }
}

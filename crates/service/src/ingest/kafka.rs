//! Kafka message source (requires the `kafka` feature).
//!
//! Joins a consumer group and subscribes to one topic. Offsets are stored
//! when a message is received and committed in the background, so delivery
//! is at-most-once: a message received but not yet persisted when the
//! process dies is not redelivered.

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::Message as _;
use rdkafka::consumer::{Consumer, StreamConsumer};
use tracing::info;

use super::source::{Message, MessageSource, TransportError};
use crate::config::KafkaConfig;

/// Source backed by an `rdkafka` stream consumer.
pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl KafkaSource {
    /// Create a consumer and subscribe it to the configured topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be created or subscribed.
    pub fn connect(config: &KafkaConfig) -> Result<Self, TransportError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;
        info!(topic = %config.topic, group_id = %config.group_id, "Kafka consumer subscribed");

        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn recv(&mut self) -> Option<Result<Message, TransportError>> {
        let result = self.consumer.recv().await.map(|m| Message {
            payload: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            partition: Some(m.partition()),
            offset: Some(m.offset()),
        });
        Some(result.map_err(TransportError::from))
    }
}

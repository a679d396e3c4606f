//! Publishing canonical events to Kafka.
//!
//! Each event becomes one record: the key is the author id as 8 big-endian
//! bytes and the value is the canonical JSON payload. Batching, compression
//! and acks are handled by the rdkafka producer according to
//! [`ProducerConfig`].
//!
//! Sending only queues the record. The broker acknowledgment arrives later
//! through the returned [`PendingDelivery`], so the caller can keep feeding
//! the producer while earlier records are still in flight.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use tracing::{debug, info};

use crate::error::ConnectorError;
use crate::event::CanonicalEvent;
use crate::kafka::config::ProducerConfig;

/// Pause before re-offering a record to a full producer queue.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(100);

/// Resolves once the broker has acknowledged (or rejected) one record.
pub type PendingDelivery = BoxFuture<'static, Result<(), ConnectorError>>;

/// Sends canonical events to a topic.
///
/// Failures are not retried here; the calling worker treats them as fatal.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Queues `event` for `topic`, keyed by its author id.
    ///
    /// Returns as soon as the record is accepted for sending. Awaiting the
    /// returned delivery yields `ConnectorError::WriteError` if the broker
    /// rejects the record.
    async fn send(
        &self,
        topic: &str,
        event: &CanonicalEvent,
    ) -> Result<PendingDelivery, ConnectorError>;
}

/// [`EventPublisher`] backed by an rdkafka [`FutureProducer`].
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    /// Creates a producer for `bootstrap_servers`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConnectionFailed` if the producer cannot be
    /// created.
    pub fn new(bootstrap_servers: &str, config: &ProducerConfig) -> Result<Self, ConnectorError> {
        info!(
            brokers = %bootstrap_servers,
            compression = %config.compression_type,
            acks = %config.acks,
            idempotence = config.enable_idempotence,
            "creating Kafka producer"
        );
        let producer: FutureProducer = config
            .to_rdkafka_config(bootstrap_servers)
            .create()
            .map_err(|e| {
                ConnectorError::ConnectionFailed(format!("failed to create producer: {e}"))
            })?;
        Ok(Self { producer })
    }
}

impl std::fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPublisher").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn send(
        &self,
        topic: &str,
        event: &CanonicalEvent,
    ) -> Result<PendingDelivery, ConnectorError> {
        let payload = event.to_json_bytes()?;
        let key = event.key_bytes();
        let mut record = FutureRecord::to(topic).key(&key[..]).payload(&payload);

        // The record is copied into the producer queue; only a full queue
        // holds us here.
        let delivery = loop {
            match self.producer.send_result(record) {
                Ok(delivery) => break delivery,
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    debug!(topic, "producer queue full, waiting");
                    record = returned;
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((err, _record)) => {
                    return Err(ConnectorError::WriteError(format!(
                        "Kafka produce to '{topic}' failed: {err}"
                    )));
                }
            }
        };

        let topic = topic.to_string();
        let id = event.id.clone();
        Ok(Box::pin(async move {
            match delivery.await {
                Ok(Ok(delivery)) => {
                    debug!(topic = %topic, id = %id, delivery = ?delivery, "event published");
                    Ok(())
                }
                Ok(Err((err, _msg))) => Err(ConnectorError::WriteError(format!(
                    "Kafka produce to '{topic}' failed: {err}"
                ))),
                Err(_canceled) => Err(ConnectorError::WriteError(format!(
                    "delivery report for '{topic}' was dropped"
                ))),
            }
        }))
    }
}

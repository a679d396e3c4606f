//! The shared transform-and-publish path.
//!
//! A single consumer takes raw payloads off the source channel, transforms
//! each into a [`CanonicalEvent`] and hands it to the publisher. It does not
//! wait for the broker acknowledgment before taking the next payload:
//! pending deliveries are drained alongside the channel. Malformed payloads
//! are logged and dropped. A failed delivery ends the pipeline.
//!
//! [`CanonicalEvent`]: crate::event::CanonicalEvent

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ConnectorError;
use crate::kafka::{EventPublisher, PendingDelivery};
use crate::metrics::PipelineMetrics;
use crate::transform::{EventTransformer, RawPayload};

/// What happened to one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transformed and published.
    Published,
    /// Dropped as malformed.
    Dropped,
}

/// Transform-and-publish consumer.
pub struct Pipeline {
    transformer: EventTransformer,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Creates a pipeline publishing to `topic`.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            transformer: EventTransformer::new(),
            publisher,
            topic: topic.into(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Returns the shared counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Transforms one payload and queues it for publishing.
    ///
    /// Returns `None` for a malformed payload. The returned delivery counts
    /// the event as published once the broker acknowledges it.
    ///
    /// # Errors
    ///
    /// Returns the publisher's error if the record cannot be queued.
    pub async fn submit(&self, raw: &RawPayload) -> Result<Option<PendingDelivery>, ConnectorError> {
        self.metrics.record_received();

        let event = match self.transformer.transform(raw) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_dropped();
                warn!(source = %raw.source, error = %e, "dropping malformed payload");
                return Ok(None);
            }
        };

        let delivery = self.publisher.send(&self.topic, &event).await?;
        debug!(topic = %self.topic, id = %event.id, "event queued");

        let metrics = Arc::clone(&self.metrics);
        Ok(Some(Box::pin(async move {
            delivery.await?;
            metrics.record_published();
            Ok(())
        })))
    }

    /// Transforms and publishes one payload, waiting for its delivery.
    ///
    /// # Errors
    ///
    /// Returns the publisher's error. Malformed payloads are not errors.
    pub async fn process(&self, raw: &RawPayload) -> Result<Disposition, ConnectorError> {
        match self.submit(raw).await? {
            Some(delivery) => {
                delivery.await?;
                Ok(Disposition::Published)
            }
            None => Ok(Disposition::Dropped),
        }
    }

    /// Consumes `rx` until every sender is gone and every delivery has
    /// resolved.
    ///
    /// # Errors
    ///
    /// Returns the first publish failure.
    pub async fn run(self, mut rx: mpsc::Receiver<RawPayload>) -> Result<(), ConnectorError> {
        info!(topic = %self.topic, "pipeline started");
        let mut in_flight = FuturesUnordered::<PendingDelivery>::new();
        let mut open = true;

        while open || !in_flight.is_empty() {
            tokio::select! {
                biased;
                Some(delivered) = in_flight.next(), if !in_flight.is_empty() => delivered?,
                raw = rx.recv(), if open => match raw {
                    Some(raw) => {
                        if let Some(delivery) = self.submit(&raw).await? {
                            in_flight.push(delivery);
                        }
                    }
                    None => open = false,
                },
            }
        }

        let snap = self.metrics.snapshot();
        info!(
            received = snap.received_total,
            published = snap.published_total,
            dropped = snap.dropped_total,
            "pipeline drained"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("topic", &self.topic)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

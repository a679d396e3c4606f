//! Broker administration: topic provisioning and visibility polling.
//!
//! [`BrokerAdmin`] is the raw admin seam (one request per call, no retry).
//! [`KafkaAdminClient`] layers the retry disciplines on top:
//!
//! - topic creation and topic listing run under the capped policy;
//! - topic visibility and schema-registry health are polled under the
//!   unbounded policy, one fresh budget per topic.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RetryConfig;
use crate::error::ConnectorError;
use crate::kafka::config::{KafkaConfig, TopicSpec};
use crate::kafka::schema_registry::{RegistryProbe, SchemaRegistryStatus};
use crate::retry::{poll_until, sleep_or_cancel, with_retry};

/// Raw broker admin operations.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    /// Requests creation of `topics`.
    ///
    /// Topics that already exist are not an error.
    async fn create_topics(&self, topics: &[TopicSpec]) -> Result<(), ConnectorError>;

    /// Lists the names of all topics known to the cluster.
    async fn list_topics(&self) -> Result<Vec<String>, ConnectorError>;
}

/// [`BrokerAdmin`] backed by an rdkafka [`AdminClient`].
pub struct RdKafkaAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
    timeout: Duration,
}

impl RdKafkaAdmin {
    /// Creates an admin client for the configured cluster.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConnectionFailed` if the client cannot be
    /// created.
    pub fn new(config: &KafkaConfig) -> Result<Self, ConnectorError> {
        let client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .create()
            .map_err(|e| {
                ConnectorError::ConnectionFailed(format!("failed to create admin client: {e}"))
            })?;

        Ok(Self {
            client: Arc::new(client),
            timeout: config.admin_timeout(),
        })
    }
}

impl std::fmt::Debug for RdKafkaAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdKafkaAdmin")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerAdmin for RdKafkaAdmin {
    async fn create_topics(&self, topics: &[TopicSpec]) -> Result<(), ConnectorError> {
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|t| {
                NewTopic::new(
                    &t.name,
                    t.partitions,
                    TopicReplication::Fixed(t.replication_factor),
                )
            })
            .collect();
        let options = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = self
            .client
            .create_topics(&new_topics, &options)
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(format!("create topics: {e}")))?;

        for result in results {
            match result {
                Ok(name) => info!(topic = %name, "topic created"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %name, "topic already exists");
                }
                Err((name, code)) => return Err(topic_create_error(&name, code)),
            }
        }
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>, ConnectorError> {
        // Metadata fetch blocks the calling thread.
        let client = Arc::clone(&self.client);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            client.inner().fetch_metadata(None, timeout).map(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .map(|t| t.name().to_string())
                    .collect::<Vec<_>>()
            })
        })
        .await
        .map_err(|e| ConnectorError::Internal(format!("metadata task failed: {e}")))?
        .map_err(|e| ConnectorError::ConnectionFailed(format!("list topics: {e}")))
    }
}

/// Maps a per-topic creation failure.
///
/// Rejections of the topic settings or of our permissions will not change
/// on retry and surface as configuration errors. Everything else is treated
/// as a broker-side transient.
fn topic_create_error(name: &str, code: RDKafkaErrorCode) -> ConnectorError {
    match code {
        RDKafkaErrorCode::InvalidTopic
        | RDKafkaErrorCode::InvalidPartitions
        | RDKafkaErrorCode::InvalidReplicationFactor
        | RDKafkaErrorCode::InvalidReplicaAssignment
        | RDKafkaErrorCode::InvalidConfig
        | RDKafkaErrorCode::PolicyViolation
        | RDKafkaErrorCode::TopicAuthorizationFailed
        | RDKafkaErrorCode::ClusterAuthorizationFailed => ConnectorError::ConfigurationError(
            format!("broker rejected topic '{name}': {code}"),
        ),
        _ => ConnectorError::ConnectionFailed(format!("create topic '{name}': {code}")),
    }
}

/// Retry-wrapped broker readiness checks.
pub struct KafkaAdminClient {
    admin: Arc<dyn BrokerAdmin>,
    registry: Arc<dyn RegistryProbe>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl KafkaAdminClient {
    /// Creates a client over the given admin and registry seams.
    ///
    /// `cancel` interrupts any retry or poll sleep.
    #[must_use]
    pub fn new(
        admin: Arc<dyn BrokerAdmin>,
        registry: Arc<dyn RegistryProbe>,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            admin,
            registry,
            retry,
            cancel,
        }
    }

    /// Creates `specs` under the capped retry policy.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::RetryExhausted` once the attempt budget is
    /// spent, or `ConnectorError::Cancelled` on shutdown.
    pub async fn ensure_topics(&self, specs: &[TopicSpec]) -> Result<(), ConnectorError> {
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        info!(topics = ?names, "creating topics");

        let policy = self.retry.create_policy();
        with_retry("create topics", &policy, &self.cancel, |attempt| {
            debug!(attempt, "create topics attempt");
            self.admin.create_topics(specs)
        })
        .await
    }

    /// Lists topics under the capped retry policy.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::RetryExhausted` once the attempt budget is
    /// spent, or `ConnectorError::Cancelled` on shutdown.
    pub async fn list_topics(&self) -> Result<HashSet<String>, ConnectorError> {
        let policy = self.retry.create_policy();
        let topics = with_retry("list topics", &policy, &self.cancel, |_| {
            self.admin.list_topics()
        })
        .await?;
        Ok(topics.into_iter().collect())
    }

    /// Waits until every name in `names` is listed by the broker.
    ///
    /// One listing is taken up front. Topics are checked in order; while a
    /// topic is missing the client sleeps, grows the interval and re-lists.
    /// Each topic starts with a fresh poll budget.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::RetryExhausted` if a topic stays invisible
    /// or a listing exhausts its own retries, or `ConnectorError::Cancelled`
    /// on shutdown.
    pub async fn await_topics_visible(&self, names: &[String]) -> Result<(), ConnectorError> {
        let policy = self.retry.poll_policy();
        let mut topics = self.list_topics().await?;

        for name in names {
            let mut backoff = policy.backoff();
            let mut retries: u32 = 0;

            while !topics.contains(name) {
                retries += 1;
                if retries > policy.max_attempts {
                    return Err(ConnectorError::RetryExhausted {
                        operation: format!("await topic '{name}'"),
                        attempts: policy.max_attempts,
                        last_error: Box::new(ConnectorError::TopicNotVisible(name.clone())),
                    });
                }
                let delay = backoff.next_delay();
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                info!(
                    topic = %name,
                    retry = retries,
                    max_attempts = policy.max_attempts,
                    delay_ms,
                    "topic not visible yet, waiting"
                );
                sleep_or_cancel(delay, &self.cancel).await?;
                topics = self.list_topics().await?;
            }
            info!(topic = %name, "topic is visible");
        }
        Ok(())
    }

    /// Waits until the schema registry answers with a 2xx status.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::RetryExhausted` if the registry stays
    /// unhealthy, or `ConnectorError::Cancelled` on shutdown.
    pub async fn await_schema_registry_healthy(
        &self,
    ) -> Result<SchemaRegistryStatus, ConnectorError> {
        let policy = self.retry.poll_policy();
        let url = self.registry.url().to_string();

        let status = poll_until("await schema registry", &policy, &self.cancel, || {
            let registry = Arc::clone(&self.registry);
            async move {
                let status = registry.probe().await;
                debug!(
                    url = %registry.url(),
                    healthy = status.healthy,
                    detail = %status.detail,
                    "schema registry probed"
                );
                if status.healthy {
                    Ok(status)
                } else {
                    Err(ConnectorError::RegistryUnhealthy(status.detail))
                }
            }
        })
        .await?;

        info!(url = %url, "schema registry is healthy");
        Ok(status)
    }
}

impl std::fmt::Debug for KafkaAdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaAdminClient")
            .field("registry", &self.registry.url())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

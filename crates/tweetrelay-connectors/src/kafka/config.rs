//! Kafka broker, topic and producer configuration.
//!
//! [`KafkaConfig`] names the cluster, the schema registry and the topics to
//! provision. [`ProducerConfig`] carries the producer tuning knobs and
//! renders them into an rdkafka [`ClientConfig`].

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::ClientConfig;
use serde::Deserialize;

use crate::error::ConnectorError;

/// A topic to provision on the broker.
///
/// Immutable once the creation request is issued. Creating a topic that
/// already exists is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub partitions: i32,
    /// Per-partition replica count.
    pub replication_factor: i32,
}

impl TopicSpec {
    /// Creates a topic spec. The name is trimmed.
    #[must_use]
    pub fn new(name: &str, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.trim().to_string(),
            partitions,
            replication_factor,
        }
    }
}

/// Broker and topic configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka broker addresses (comma-separated).
    pub bootstrap_servers: String,
    /// Schema Registry URL, probed for health before ingestion starts.
    pub schema_registry_url: String,
    /// Topic canonical events are published to.
    pub topic_name: String,
    /// Topics provisioned at startup.
    pub topic_names_to_create: Vec<String>,
    /// Partition count for provisioned topics.
    pub num_of_partitions: i32,
    /// Replication factor for provisioned topics.
    pub replication_factor: i32,
    /// Timeout for a single admin request (milliseconds).
    pub admin_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:19092,localhost:29092,localhost:39092".to_string(),
            schema_registry_url: "http://localhost:8081".to_string(),
            topic_name: "twitter-topic".to_string(),
            topic_names_to_create: vec!["twitter-topic".to_string()],
            num_of_partitions: 3,
            replication_factor: 3,
            admin_timeout_ms: 10_000,
        }
    }
}

impl KafkaConfig {
    /// Returns one [`TopicSpec`] per configured topic.
    #[must_use]
    pub fn topic_specs(&self) -> Vec<TopicSpec> {
        self.topic_names_to_create
            .iter()
            .map(|name| TopicSpec::new(name, self.num_of_partitions, self.replication_factor))
            .collect()
    }

    /// Returns the trimmed names of the topics to provision.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.topic_names_to_create
            .iter()
            .map(|name| name.trim().to_string())
            .collect()
    }

    /// Returns the admin request timeout.
    #[must_use]
    pub fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.admin_timeout_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::MissingConfig` or
    /// `ConnectorError::ConfigurationError` on invalid values.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConnectorError::MissingConfig("kafka.bootstrap_servers".into()));
        }
        if self.topic_name.trim().is_empty() {
            return Err(ConnectorError::MissingConfig("kafka.topic_name".into()));
        }
        if self.schema_registry_url.trim().is_empty() {
            return Err(ConnectorError::MissingConfig("kafka.schema_registry_url".into()));
        }
        if self.topic_names_to_create.is_empty()
            || self.topic_names_to_create.iter().any(|t| t.trim().is_empty())
        {
            return Err(ConnectorError::ConfigurationError(
                "kafka.topic_names_to_create must list at least one non-empty topic".into(),
            ));
        }
        if self.num_of_partitions <= 0 {
            return Err(ConnectorError::ConfigurationError(
                "kafka.num_of_partitions must be > 0".into(),
            ));
        }
        if self.replication_factor <= 0 {
            return Err(ConnectorError::ConfigurationError(
                "kafka.replication_factor must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Kafka producer tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Compression algorithm.
    pub compression_type: CompressionType,
    /// Acknowledgment level.
    pub acks: Acks,
    /// Whether the idempotent producer is enabled.
    pub enable_idempotence: bool,
    /// Maximum number of in-flight requests per connection.
    pub max_in_flight_requests_per_connection: u32,
    /// Base batch size in bytes.
    pub batch_size: u32,
    /// Multiplier applied to `batch_size`.
    pub batch_size_boost_factor: u32,
    /// Time to wait for more records before sending a batch (milliseconds).
    pub linger_ms: u64,
    /// Broker request timeout (milliseconds).
    pub request_timeout_ms: u64,
    /// Transport-level send retries.
    pub retry_count: u32,
    /// Backoff between transport-level retries (milliseconds).
    pub retry_backoff_ms: u64,
    /// Additional rdkafka client properties (pass-through).
    pub properties: HashMap<String, String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            compression_type: CompressionType::Snappy,
            acks: Acks::All,
            enable_idempotence: true,
            max_in_flight_requests_per_connection: 5,
            batch_size: 16_384,
            batch_size_boost_factor: 100,
            linger_ms: 5,
            request_timeout_ms: 60_000,
            retry_count: 5,
            retry_backoff_ms: 1_000,
            properties: HashMap::new(),
        }
    }
}

impl ProducerConfig {
    /// Returns the effective batch size in bytes.
    #[must_use]
    pub fn effective_batch_size(&self) -> u64 {
        u64::from(self.batch_size) * u64::from(self.batch_size_boost_factor.max(1))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` on invalid combinations.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.max_in_flight_requests_per_connection == 0 {
            return Err(ConnectorError::ConfigurationError(
                "producer.max_in_flight_requests_per_connection must be > 0".into(),
            ));
        }
        // Idempotent producer requires max 5 in-flight.
        if self.enable_idempotence && self.max_in_flight_requests_per_connection > 5 {
            return Err(ConnectorError::ConfigurationError(
                "idempotence requires max_in_flight_requests_per_connection <= 5".into(),
            ));
        }
        if self.enable_idempotence && self.acks != Acks::All {
            return Err(ConnectorError::ConfigurationError(
                "idempotence requires acks = all".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConnectorError::ConfigurationError(
                "producer.batch_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Builds an rdkafka [`ClientConfig`] for the given brokers.
    #[must_use]
    pub fn to_rdkafka_config(&self, bootstrap_servers: &str) -> ClientConfig {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("compression.type", self.compression_type.as_rdkafka_str())
            .set("acks", self.acks.as_rdkafka_str())
            .set("enable.idempotence", self.enable_idempotence.to_string())
            .set(
                "max.in.flight.requests.per.connection",
                self.max_in_flight_requests_per_connection.to_string(),
            )
            .set("batch.size", self.effective_batch_size().to_string())
            .set("linger.ms", self.linger_ms.to_string())
            .set("request.timeout.ms", self.request_timeout_ms.to_string())
            .set("retries", self.retry_count.to_string())
            .set("retry.backoff.ms", self.retry_backoff_ms.to_string());

        for (key, value) in &self.properties {
            config.set(key, value);
        }

        config
    }
}

/// Producer compression codec, spelled as in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Uncompressed batches.
    None,
    /// gzip.
    Gzip,
    /// snappy, the relay default.
    Snappy,
    /// lz4.
    Lz4,
    /// zstd.
    #[serde(alias = "zstandard")]
    Zstd,
}

impl CompressionType {
    /// Value for `compression.type`.
    #[must_use]
    pub fn as_rdkafka_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_rdkafka_str())
    }
}

/// Replicas that must confirm a write before it counts as delivered.
///
/// Written as `"0"`, `"1"` or `"all"` (aliases `"none"`, `"leader"`, `"-1"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Acks {
    /// No confirmation.
    #[serde(rename = "0", alias = "none")]
    None,
    /// The partition leader only.
    #[serde(rename = "1", alias = "leader")]
    Leader,
    /// Every in-sync replica. Required by idempotence.
    #[serde(rename = "all", alias = "-1")]
    All,
}

impl Acks {
    /// Value for `acks`.
    #[must_use]
    pub fn as_rdkafka_str(&self) -> &'static str {
        match self {
            Self::None => "0",
            Self::Leader => "1",
            Self::All => "all",
        }
    }
}

impl std::fmt::Display for Acks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_rdkafka_str())
    }
}

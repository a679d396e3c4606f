//! Kafka integration.
//!
//! - [`admin`]: topic provisioning and visibility polling
//! - [`schema_registry`]: registry health probing
//! - [`producer`]: publishing canonical events
//! - [`config`]: broker, topic and producer settings

pub mod admin;
pub mod config;
pub mod producer;
pub mod schema_registry;

pub use admin::{BrokerAdmin, KafkaAdminClient, RdKafkaAdmin};
pub use config::{Acks, CompressionType, KafkaConfig, ProducerConfig, TopicSpec};
pub use producer::{EventPublisher, KafkaPublisher, PendingDelivery};
pub use schema_registry::{HttpRegistryProbe, RegistryProbe, SchemaRegistryStatus};

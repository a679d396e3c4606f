//! Relay configuration.
//!
//! The configuration is a TOML document with four sections:
//!
//! ```toml
//! [source]
//! keywords = ["Java", "Kafka"]
//! enable_mock_tweets = true
//!
//! [kafka]
//! bootstrap_servers = "localhost:9092"
//! topic_name = "twitter-topic"
//!
//! [producer]
//! compression_type = "snappy"
//!
//! [retry]
//! max_attempts = 3
//! ```
//!
//! Every key is optional and falls back to the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConnectorError;
use crate::kafka::{KafkaConfig, ProducerConfig};
use crate::retry::BackoffPolicy;

/// Environment variable holding the streaming API bearer token.
pub const BEARER_TOKEN_ENV: &str = "TWITTER_BEARER_TOKEN";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Ingestion source settings.
    pub source: SourceConfig,
    /// Broker and topic settings.
    pub kafka: KafkaConfig,
    /// Producer tuning.
    pub producer: ProducerConfig,
    /// Retry and polling budgets.
    pub retry: RetryConfig,
}

impl AppConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if the text is not valid
    /// TOML or does not match the expected shape.
    pub fn from_toml_str(text: &str) -> Result<Self, ConnectorError> {
        toml::from_str(text)
            .map_err(|e| ConnectorError::ConfigurationError(format!("invalid config: {e}")))
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Io` if the file cannot be read, or a
    /// configuration error if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Fills unset values from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Fills unset values using `lookup` as the environment.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.source.bearer_token.is_none() {
            self.source.bearer_token = lookup(BEARER_TOKEN_ENV).filter(|t| !t.trim().is_empty());
        }
        self
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        self.source.validate()?;
        self.kafka.validate()?;
        self.producer.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

/// Ingestion source settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Keywords to track. Also the vocabulary for synthetic keywords and
    /// the desired rule set for the rule-based stream.
    pub keywords: Vec<String>,
    /// Message logged once at startup.
    pub welcome_message: String,
    /// Selects the synthetic generator.
    pub enable_mock_tweets: bool,
    /// Selects the rule-based poll stream.
    pub enable_v2_tweets: bool,
    /// Minimum number of body words in a synthetic tweet.
    pub mock_min_tweet_length: usize,
    /// Maximum number of body words in a synthetic tweet.
    pub mock_max_tweet_length: usize,
    /// Pause between synthetic tweets (milliseconds).
    pub mock_sleep_ms: u64,
    /// Endpoint of the persistent filtered stream.
    pub filter_url: String,
    /// Endpoint of the rule-based line stream.
    pub v2_base_url: String,
    /// Endpoint for listing, adding and deleting stream rules.
    pub v2_rules_base_url: String,
    /// Bearer token for the streaming API. Usually taken from
    /// [`BEARER_TOKEN_ENV`].
    pub bearer_token: Option<String>,
    /// Capacity of the source-to-pipeline channel.
    pub channel_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            keywords: ["Java", "Microservices", "Kafka", "Elasticsearch"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            welcome_message: "Hello microservices!".to_string(),
            enable_mock_tweets: false,
            enable_v2_tweets: true,
            mock_min_tweet_length: 5,
            mock_max_tweet_length: 15,
            mock_sleep_ms: 10_000,
            filter_url: "https://stream.twitter.com/1.1/statuses/filter.json".to_string(),
            v2_base_url: "https://api.twitter.com/2/tweets/search/stream?tweet.fields=created_at&expansions=author_id".to_string(),
            v2_rules_base_url: "https://api.twitter.com/2/tweets/search/stream/rules".to_string(),
            bearer_token: None,
            channel_capacity: 1024,
        }
    }
}

impl SourceConfig {
    /// Returns the pause between synthetic tweets.
    #[must_use]
    pub fn mock_sleep(&self) -> Duration {
        Duration::from_millis(self.mock_sleep_ms)
    }

    /// Validates the source settings.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` on invalid values.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.keywords.is_empty() || self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConnectorError::ConfigurationError(
                "source.keywords must list at least one non-empty keyword".into(),
            ));
        }
        if self.enable_mock_tweets && self.enable_v2_tweets {
            return Err(ConnectorError::ConfigurationError(
                "source.enable_mock_tweets and source.enable_v2_tweets are mutually exclusive"
                    .into(),
            ));
        }
        if self.mock_min_tweet_length > self.mock_max_tweet_length {
            return Err(ConnectorError::ConfigurationError(format!(
                "source.mock_min_tweet_length ({}) exceeds mock_max_tweet_length ({})",
                self.mock_min_tweet_length, self.mock_max_tweet_length
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConnectorError::ConfigurationError(
                "source.channel_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Retry and polling budgets for broker readiness.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First retry delay of the capped policy (milliseconds).
    pub initial_interval_ms: u64,
    /// Ceiling of the capped policy (milliseconds).
    pub max_interval_ms: u64,
    /// Growth factor for both policies.
    pub multiplier: f64,
    /// Attempt budget for both policies.
    pub max_attempts: u32,
    /// First sleep of the polling policy (milliseconds).
    pub sleep_time_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            max_interval_ms: 10_000,
            multiplier: 2.0,
            max_attempts: 3,
            sleep_time_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Policy for topic creation, topic listing and rule reconciliation.
    #[must_use]
    pub fn create_policy(&self) -> BackoffPolicy {
        BackoffPolicy::capped(
            Duration::from_millis(self.initial_interval_ms),
            Duration::from_millis(self.max_interval_ms),
            self.multiplier,
            self.max_attempts,
        )
    }

    /// Policy for topic visibility and schema-registry health polling.
    #[must_use]
    pub fn poll_policy(&self) -> BackoffPolicy {
        BackoffPolicy::unbounded(
            Duration::from_millis(self.sleep_time_ms),
            self.multiplier,
            self.max_attempts,
        )
    }

    /// Validates the retry settings.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` on invalid values.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(ConnectorError::ConfigurationError(format!(
                "retry.multiplier must be > 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConnectorError::ConfigurationError(
                "retry.max_attempts must be > 0".into(),
            ));
        }
        if self.initial_interval_ms > self.max_interval_ms {
            return Err(ConnectorError::ConfigurationError(
                "retry.initial_interval_ms exceeds retry.max_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Growth;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.source.keywords.len(), 4);
        assert_eq!(cfg.kafka.num_of_partitions, 3);
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [source]
            keywords = ["cats"]
            enable_mock_tweets = true
            enable_v2_tweets = false
            mock_min_tweet_length = 5
            mock_max_tweet_length = 5

            [kafka]
            bootstrap_servers = "broker:9092"
            topic_names_to_create = ["a", "b"]

            [producer]
            compression_type = "lz4"
            acks = "all"

            [producer.properties]
            "client.id" = "relay-1"

            [retry]
            multiplier = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.source.keywords, vec!["cats"]);
        assert!(cfg.source.enable_mock_tweets);
        assert_eq!(cfg.kafka.bootstrap_servers, "broker:9092");
        assert_eq!(cfg.kafka.topic_names_to_create, vec!["a", "b"]);
        assert_eq!(cfg.kafka.replication_factor, 3);
        assert_eq!(
            cfg.producer.compression_type,
            crate::kafka::CompressionType::Lz4
        );
        assert_eq!(
            cfg.producer.properties.get("client.id").map(String::as_str),
            Some("relay-1")
        );
        assert!((cfg.retry.multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.retry.sleep_time_ms, 2_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_enum() {
        let err = AppConfig::from_toml_str("[producer]\nacks = \"most\"\n").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_both_source_flags_rejected() {
        let mut cfg = AppConfig::default();
        cfg.source.enable_mock_tweets = true;
        cfg.source.enable_v2_tweets = true;
        assert!(cfg.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_source_validation() {
        let mut cfg = SourceConfig::default();
        cfg.mock_min_tweet_length = 10;
        cfg.mock_max_tweet_length = 5;
        assert!(cfg.validate().is_err());

        let mut cfg = SourceConfig::default();
        cfg.keywords.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_retry_validation() {
        let mut cfg = RetryConfig::default();
        cfg.multiplier = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = RetryConfig::default();
        cfg.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_policies_from_retry_config() {
        let cfg = RetryConfig::default();

        let create = cfg.create_policy();
        assert_eq!(create.growth, Growth::Capped);
        assert_eq!(create.initial_interval, Duration::from_secs(1));
        assert_eq!(create.max_interval, Duration::from_secs(10));

        let poll = cfg.poll_policy();
        assert_eq!(poll.growth, Growth::Unbounded);
        assert_eq!(poll.initial_interval, Duration::from_secs(2));
        assert_eq!(poll.max_attempts, 3);
    }

    #[test]
    fn test_bearer_token_from_env_lookup() {
        let cfg = AppConfig::default().with_overrides_from(|key| {
            (key == BEARER_TOKEN_ENV).then(|| "secret".to_string())
        });
        assert_eq!(cfg.source.bearer_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_file_token_wins_over_env() {
        let mut cfg = AppConfig::default();
        cfg.source.bearer_token = Some("from-file".into());
        let cfg = cfg.with_overrides_from(|_| Some("from-env".into()));
        assert_eq!(cfg.source.bearer_token.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_blank_env_token_ignored() {
        let cfg = AppConfig::default().with_overrides_from(|_| Some("  ".into()));
        assert!(cfg.source.bearer_token.is_none());
    }
}

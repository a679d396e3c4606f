//! Synthetic tweet generator.
//!
//! Emits one status payload every `mock_sleep_ms`. The body is a random
//! run of words from a fixed vocabulary followed by one configured keyword.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::ConnectorError;
use crate::event::format_status_timestamp;
use crate::source::SourceKind;
use crate::transform::RawPayload;

/// Vocabulary of synthetic tweet bodies.
pub const WORDS: [&str; 22] = [
    "Lorem",
    "ipsum",
    "dolor",
    "sit",
    "amet",
    "consectetuer",
    "adipiscing",
    "elit",
    "Maecenas",
    "porttitor",
    "congue",
    "massa",
    "Fusce",
    "posuere",
    "magna",
    "sed",
    "pulvinar",
    "ultricies",
    "purus",
    "lectus",
    "malesuada",
    "libero",
];

/// Pseudo-random status generator.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    keywords: Vec<String>,
    min_len: usize,
    max_len: usize,
    sleep: Duration,
}

impl SyntheticGenerator {
    /// Creates a generator from the source settings.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if there are no
    /// keywords or the length bounds are inverted.
    pub fn new(config: &SourceConfig) -> Result<Self, ConnectorError> {
        if config.keywords.is_empty() {
            return Err(ConnectorError::ConfigurationError(
                "synthetic generator needs at least one keyword".into(),
            ));
        }
        if config.mock_min_tweet_length > config.mock_max_tweet_length {
            return Err(ConnectorError::ConfigurationError(format!(
                "synthetic length bounds inverted: {} > {}",
                config.mock_min_tweet_length, config.mock_max_tweet_length
            )));
        }
        Ok(Self {
            keywords: config.keywords.clone(),
            min_len: config.mock_min_tweet_length,
            max_len: config.mock_max_tweet_length,
            sleep: config.mock_sleep(),
        })
    }

    /// Builds a body of `[min_len, max_len]` words plus one trailing keyword.
    pub fn build_text<R: Rng>(&self, rng: &mut R) -> String {
        let len = rng.gen_range(self.min_len..=self.max_len);
        let mut words: Vec<&str> = (0..len)
            .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
            .collect();
        words.push(&self.keywords[rng.gen_range(0..self.keywords.len())]);
        words.join(" ")
    }

    /// Builds a complete status payload stamped with the current time.
    pub fn build_status<R: Rng>(&self, rng: &mut R) -> String {
        json!({
            "created_at": format_status_timestamp(&Utc::now()),
            "id": rng.gen_range(1..i64::MAX).to_string(),
            "text": self.build_text(rng),
            "user": { "id": rng.gen_range(1..i64::MAX).to_string() },
        })
        .to_string()
    }

    /// Generates payloads until the pipeline goes away.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::InvalidState` once the channel is closed.
    pub async fn run(self, tx: mpsc::Sender<RawPayload>) -> Result<(), ConnectorError> {
        loop {
            let body = self.build_status(&mut rand::thread_rng());
            debug!(payload = %body, "generated synthetic tweet");

            tx.send(RawPayload::new(SourceKind::Synthetic, body))
                .await
                .map_err(|_| ConnectorError::InvalidState {
                    expected: "pipeline running".into(),
                    actual: "pipeline channel closed".into(),
                })?;

            tokio::time::sleep(self.sleep).await;
        }
    }
}

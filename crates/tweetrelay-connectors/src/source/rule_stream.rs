//! Rule-based line stream.
//!
//! Runs in two phases. First the remote rule set is replaced with one rule
//! per keyword (retried under the capped policy). Then a bearer-authenticated
//! GET is held open and every non-empty line is forwarded as a v2 payload.
//! Lines that fail to parse are dropped by the pipeline.
//!
//! There is no shutdown primitive: the worker ends only when the stream ends
//! or fails, and both are fatal to the worker.

use std::sync::Arc;

use reqwest::Client;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{RetryConfig, SourceConfig};
use crate::error::ConnectorError;
use crate::retry::{with_retry, BackoffPolicy};
use crate::source::rules::{default_rules, reconcile_rules, HttpRulesClient, RulesApi, StreamRule};
use crate::source::{forward_lines, open_line_stream, SourceKind};
use crate::transform::RawPayload;

/// Bearer-authenticated rule-based stream.
pub struct RuleBasedPollStream {
    client: Client,
    stream_url: String,
    bearer_token: String,
    rules_api: Arc<dyn RulesApi>,
    desired_rules: Vec<StreamRule>,
    policy: BackoffPolicy,
}

impl RuleBasedPollStream {
    /// Creates the stream from the source settings.
    ///
    /// `rules_api` defaults to an [`HttpRulesClient`] against
    /// `v2_rules_base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::MissingConfig` if no bearer token is set.
    pub fn new(
        config: &SourceConfig,
        retry: &RetryConfig,
        rules_api: Option<Arc<dyn RulesApi>>,
    ) -> Result<Self, ConnectorError> {
        let bearer_token = config
            .bearer_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ConnectorError::MissingConfig(format!(
                    "source.bearer_token (or {})",
                    crate::config::BEARER_TOKEN_ENV
                ))
            })?;

        let rules_api = rules_api.unwrap_or_else(|| {
            Arc::new(HttpRulesClient::new(
                config.v2_rules_base_url.clone(),
                bearer_token.clone(),
            ))
        });

        Ok(Self {
            client: Client::new(),
            stream_url: config.v2_base_url.clone(),
            bearer_token,
            rules_api,
            desired_rules: default_rules(&config.keywords),
            policy: retry.create_policy(),
        })
    }

    /// The rule set installed before streaming.
    #[must_use]
    pub fn desired_rules(&self) -> &[StreamRule] {
        &self.desired_rules
    }

    /// Replaces the remote rules under the capped retry policy.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::RetryExhausted` if the rules endpoint keeps
    /// failing, or the first non-transient error.
    pub async fn setup_rules(&self) -> Result<(), ConnectorError> {
        // No shutdown primitive: the sleeps here are never interrupted.
        let never = CancellationToken::new();
        with_retry("reconcile stream rules", &self.policy, &never, |_| {
            let api = Arc::clone(&self.rules_api);
            let desired = self.desired_rules.clone();
            async move { reconcile_rules(api.as_ref(), &desired).await }
        })
        .await
    }

    /// Forwards every non-empty line of `reader` until it ends.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ReadError` at end of stream, I/O errors, or
    /// `ConnectorError::InvalidState` if the pipeline has gone away.
    pub async fn stream_from<R>(
        reader: R,
        tx: &mpsc::Sender<RawPayload>,
    ) -> Result<(), ConnectorError>
    where
        R: AsyncBufRead + Unpin,
    {
        let never = CancellationToken::new();
        forward_lines(reader, SourceKind::RuleBasedPollStream, tx, &never).await
    }

    /// Reconciles rules, then streams until the connection ends.
    ///
    /// # Errors
    ///
    /// Always returns an error: rule setup failures, connection failures or
    /// the end of the stream.
    pub async fn run(self, tx: mpsc::Sender<RawPayload>) -> Result<(), ConnectorError> {
        self.setup_rules().await?;

        info!(url = %self.stream_url, "opening rule-based stream");
        let request = self
            .client
            .get(&self.stream_url)
            .bearer_auth(&self.bearer_token);
        let reader = open_line_stream(request).await?;

        Self::stream_from(reader, &tx).await
    }
}

impl std::fmt::Debug for RuleBasedPollStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleBasedPollStream")
            .field("stream_url", &self.stream_url)
            .field("desired_rules", &self.desired_rules)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRulesApi, RulesCall};
    use crate::transform::EventTransformer;

    fn config() -> SourceConfig {
        SourceConfig {
            keywords: vec!["cats".into()],
            enable_v2_tweets: true,
            bearer_token: Some("token".into()),
            ..SourceConfig::default()
        }
    }

    fn stream(api: &Arc<MockRulesApi>) -> RuleBasedPollStream {
        RuleBasedPollStream::new(
            &config(),
            &RetryConfig::default(),
            Some(Arc::clone(api) as Arc<dyn RulesApi>),
        )
        .unwrap()
    }

    #[test]
    fn test_blank_token_is_missing() {
        let mut cfg = config();
        cfg.bearer_token = Some("   ".into());
        let err = RuleBasedPollStream::new(&cfg, &RetryConfig::default(), None).unwrap_err();
        assert!(matches!(err, ConnectorError::MissingConfig(_)));
    }

    #[test]
    fn test_default_rules_from_keywords() {
        let api = Arc::new(MockRulesApi::new());
        assert_eq!(
            stream(&api).desired_rules(),
            &[StreamRule::new("cats", "Keyword: cats")]
        );
    }

    #[tokio::test]
    async fn test_setup_rules_replaces_remote_set() {
        let api = Arc::new(MockRulesApi::with_rules(vec![StreamRule {
            id: Some("r9".into()),
            value: "dogs".into(),
            tag: "Keyword: dogs".into(),
        }]));
        stream(&api).setup_rules().await.unwrap();

        assert_eq!(
            api.calls(),
            vec![
                RulesCall::List,
                RulesCall::Delete(vec!["r9".into()]),
                RulesCall::Add(vec![StreamRule::new("cats", "Keyword: cats")]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_rules_retries_transient_failure() {
        let api = Arc::new(MockRulesApi::new());
        api.fail_next_adds(1);
        stream(&api).setup_rules().await.unwrap();

        let adds = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RulesCall::Add(_)))
            .count();
        assert_eq!(adds, 2);
        assert_eq!(api.remote_rules().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_forwards_lines_and_ends_with_error() {
        let body = concat!(
            r#"{"data":{"created_at":"2024-04-08T12:34:56.000Z","id":"1","text":"a \"quoted\" cat","author_id":"42"}}"#,
            "\n\n",
            "not json\n",
            r#"{"data":{"created_at":"2024-04-08T12:35:00.000Z","id":"2","text":"b","author_id":"43"}}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);

        let err = RuleBasedPollStream::stream_from(body.as_bytes(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::ReadError(_)));

        let transformer = EventTransformer::new();
        let mut ok = Vec::new();
        let mut bad = 0;
        while let Ok(raw) = rx.try_recv() {
            match transformer.transform(&raw) {
                Ok(event) => ok.push(event),
                Err(_) => bad += 1,
            }
        }
        assert_eq!(ok.len(), 2);
        assert_eq!(bad, 1);
        assert_eq!(ok[0].text, "a \"quoted\" cat");
        assert_eq!(ok[1].user_id, 43);
    }
}

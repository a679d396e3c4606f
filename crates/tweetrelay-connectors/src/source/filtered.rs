//! Persistent keyword-filtered stream.
//!
//! Opens one long-lived GET against `filter_url` with the keywords in the
//! `track` query parameter. Each line of the body is one status object.
//! This is the only source with a shutdown contract: cancelling its token
//! drops the connection and ends the read loop.

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SourceConfig;
use crate::error::ConnectorError;
use crate::source::{forward_lines, open_line_stream, SourceKind};
use crate::transform::RawPayload;

/// Keyword-filtered status stream.
#[derive(Debug, Clone)]
pub struct FilteredStream {
    client: Client,
    url: String,
    keywords: Vec<String>,
    bearer_token: Option<String>,
}

impl FilteredStream {
    /// Creates the stream from the source settings.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if there are no keywords
    /// to track.
    pub fn new(config: &SourceConfig) -> Result<Self, ConnectorError> {
        if config.keywords.is_empty() {
            return Err(ConnectorError::ConfigurationError(
                "filtered stream needs at least one keyword".into(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            url: config.filter_url.clone(),
            keywords: config.keywords.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    /// The comma-joined `track` parameter.
    #[must_use]
    pub fn track(&self) -> String {
        self.keywords.join(",")
    }

    /// Streams statuses until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns connection errors, `ConnectorError::ReadError` if the server
    /// ends the stream, or `ConnectorError::InvalidState` if the pipeline
    /// has gone away.
    pub async fn run(
        self,
        tx: mpsc::Sender<RawPayload>,
        shutdown: CancellationToken,
    ) -> Result<(), ConnectorError> {
        info!(url = %self.url, track = %self.track(), "opening filtered stream");

        let mut request = self
            .client
            .get(&self.url)
            .query(&[("track", self.track())]);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let reader = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                info!("filtered stream shut down before connecting");
                return Ok(());
            }
            reader = open_line_stream(request) => reader?,
        };

        forward_lines(reader, SourceKind::FilteredStream, &tx, &shutdown).await?;
        info!("filtered stream closed");
        Ok(())
    }
}

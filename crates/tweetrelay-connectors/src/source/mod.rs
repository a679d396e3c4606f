//! Ingestion sources.
//!
//! Exactly one source runs per process, chosen from two configuration
//! flags:
//!
//! | `enable_mock_tweets` | `enable_v2_tweets` | source                  |
//! |----------------------|--------------------|-------------------------|
//! | true                 | false              | [`SyntheticGenerator`]  |
//! | false                | true               | [`RuleBasedPollStream`] |
//! | false                | false              | [`FilteredStream`]      |
//! | true                 | true               | configuration error     |
//!
//! A started source owns one tokio task that pushes [`RawPayload`]s onto a
//! bounded channel. Only [`FilteredStream`] can be shut down; the other two
//! run until the process exits.

pub mod filtered;
pub mod rule_stream;
pub mod rules;
pub mod synthetic;

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use reqwest::RequestBuilder;
use tokio::io::{AsyncBufRead, AsyncRead};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{RetryConfig, SourceConfig};
use crate::error::ConnectorError;
use crate::transform::{PayloadFormat, RawPayload};

pub use filtered::FilteredStream;
pub use rule_stream::RuleBasedPollStream;
pub use rules::{reconcile_rules, HttpRulesClient, RulesApi, StreamRule};
pub use synthetic::SyntheticGenerator;

/// Which source variant produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Pseudo-random generator.
    Synthetic,
    /// Persistent keyword-filtered stream.
    FilteredStream,
    /// Rule-based line stream.
    RuleBasedPollStream,
}

impl SourceKind {
    /// Chooses the source variant from the configuration flags.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if both flags are set.
    pub fn select(config: &SourceConfig) -> Result<Self, ConnectorError> {
        match (config.enable_mock_tweets, config.enable_v2_tweets) {
            (true, false) => Ok(Self::Synthetic),
            (false, true) => Ok(Self::RuleBasedPollStream),
            (false, false) => Ok(Self::FilteredStream),
            (true, true) => Err(ConnectorError::ConfigurationError(
                "enable_mock_tweets and enable_v2_tweets are mutually exclusive".into(),
            )),
        }
    }

    /// Wire format of the payloads this source emits.
    #[must_use]
    pub fn payload_format(self) -> PayloadFormat {
        match self {
            Self::Synthetic | Self::FilteredStream => PayloadFormat::Status,
            Self::RuleBasedPollStream => PayloadFormat::V2,
        }
    }

    /// Whether a started source of this kind can be shut down.
    #[must_use]
    pub fn supports_shutdown(self) -> bool {
        matches!(self, Self::FilteredStream)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synthetic => write!(f, "synthetic"),
            Self::FilteredStream => write!(f, "filtered-stream"),
            Self::RuleBasedPollStream => write!(f, "rule-based-stream"),
        }
    }
}

/// The selected ingestion source, not yet started.
#[derive(Debug)]
pub enum IngestionSource {
    /// Pseudo-random generator.
    Synthetic(SyntheticGenerator),
    /// Persistent keyword-filtered stream.
    FilteredStream(FilteredStream),
    /// Rule-based line stream.
    RuleBasedPollStream(RuleBasedPollStream),
}

impl IngestionSource {
    /// Builds the source chosen by the configuration flags.
    ///
    /// `rules_api` replaces the HTTP rules client of the rule-based stream
    /// when given.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for conflicting flags, or
    /// `ConnectorError::MissingConfig` when the rule-based stream has no
    /// bearer token.
    pub fn from_config(
        config: &SourceConfig,
        retry: &RetryConfig,
        rules_api: Option<Arc<dyn RulesApi>>,
    ) -> Result<Self, ConnectorError> {
        let kind = SourceKind::select(config)?;
        info!(source = %kind, "selected ingestion source");

        match kind {
            SourceKind::Synthetic => Ok(Self::Synthetic(SyntheticGenerator::new(config)?)),
            SourceKind::FilteredStream => Ok(Self::FilteredStream(FilteredStream::new(config)?)),
            SourceKind::RuleBasedPollStream => Ok(Self::RuleBasedPollStream(
                RuleBasedPollStream::new(config, retry, rules_api)?,
            )),
        }
    }

    /// Returns the variant.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Synthetic(_) => SourceKind::Synthetic,
            Self::FilteredStream(_) => SourceKind::FilteredStream,
            Self::RuleBasedPollStream(_) => SourceKind::RuleBasedPollStream,
        }
    }

    /// Spawns the source's worker task.
    #[must_use]
    pub fn start(self, tx: mpsc::Sender<RawPayload>) -> SourceHandle {
        let kind = self.kind();
        info!(source = %kind, "starting ingestion source");

        let (task, shutdown) = match self {
            Self::Synthetic(generator) => (tokio::spawn(generator.run(tx)), None),
            Self::FilteredStream(stream) => {
                let shutdown = CancellationToken::new();
                let task = tokio::spawn(stream.run(tx, shutdown.clone()));
                (task, Some(shutdown))
            }
            Self::RuleBasedPollStream(stream) => (tokio::spawn(stream.run(tx)), None),
        };

        SourceHandle {
            kind,
            task,
            shutdown,
        }
    }
}

/// A running source worker.
#[derive(Debug)]
pub struct SourceHandle {
    kind: SourceKind,
    task: JoinHandle<Result<(), ConnectorError>>,
    shutdown: Option<CancellationToken>,
}

impl SourceHandle {
    /// Returns the variant.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Whether [`SourceHandle::shutdown`] has any effect.
    #[must_use]
    pub fn supports_shutdown(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Asks the worker to stop by closing its connection.
    ///
    /// Returns `false` if the source has no shutdown primitive.
    pub fn shutdown(&self) -> bool {
        match &self.shutdown {
            Some(token) => {
                info!(source = %self.kind, "shutting down ingestion source");
                token.cancel();
                true
            }
            None => {
                warn!(
                    source = %self.kind,
                    "source has no shutdown primitive; it stops when the process exits"
                );
                false
            }
        }
    }

    /// Waits for the worker to finish.
    ///
    /// # Errors
    ///
    /// Returns the worker's error, or `ConnectorError::Internal` if the task
    /// panicked.
    pub async fn wait(&mut self) -> Result<(), ConnectorError> {
        (&mut self.task)
            .await
            .map_err(|e| ConnectorError::Internal(format!("source worker failed: {e}")))?
    }
}

/// Sends `request` and exposes the response body as a line reader.
///
/// # Errors
///
/// Returns `ConnectorError::ConnectionFailed` on transport errors or a
/// non-2xx status.
pub(crate) async fn open_line_stream(
    request: RequestBuilder,
) -> Result<impl AsyncBufRead + Unpin + Send, ConnectorError> {
    let resp = request
        .send()
        .await
        .map_err(|e| ConnectorError::ConnectionFailed(format!("stream connect: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ConnectorError::ConnectionFailed(format!(
            "stream rejected: {status} {text}"
        )));
    }

    let body = resp.bytes_stream().map_err(std::io::Error::other);
    Ok(StreamReader::new(Box::pin(body)))
}

/// Longest line accepted from a stream, in bytes.
pub(crate) const MAX_LINE_BYTES: usize = 1 << 20;

enum LineFrame {
    Line(String),
    Oversized,
}

/// [`LinesCodec`] that yields an overlong line as a frame to skip rather
/// than an error, so the stream keeps going past it.
struct CappedLines(LinesCodec);

impl CappedLines {
    fn map(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<LineFrame>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(LineFrame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(LineFrame::Oversized)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for CappedLines {
    type Item = LineFrame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<LineFrame>, LinesCodecError> {
        Self::map(self.0.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<LineFrame>, LinesCodecError> {
        Self::map(self.0.decode_eof(buf))
    }
}

/// Forwards each non-empty line of `reader` to `tx` as a payload of `kind`.
///
/// Returns `Ok(())` when `cancel` fires. Lines longer than
/// [`MAX_LINE_BYTES`] are dropped.
///
/// # Errors
///
/// Returns `ConnectorError::ReadError` when the stream ends,
/// `ConnectorError::Io` on read failures, or `ConnectorError::InvalidState`
/// if the pipeline has gone away.
pub(crate) async fn forward_lines<R>(
    reader: R,
    kind: SourceKind,
    tx: &mpsc::Sender<RawPayload>,
    cancel: &CancellationToken,
) -> Result<(), ConnectorError>
where
    R: AsyncRead + Unpin,
{
    forward_capped_lines(reader, MAX_LINE_BYTES, kind, tx, cancel).await
}

async fn forward_capped_lines<R>(
    reader: R,
    max_len: usize,
    kind: SourceKind,
    tx: &mpsc::Sender<RawPayload>,
    cancel: &CancellationToken,
) -> Result<(), ConnectorError>
where
    R: AsyncRead + Unpin,
{
    let codec = CappedLines(LinesCodec::new_with_max_length(max_len));
    let mut frames = FramedRead::new(reader, codec);
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = frames.next() => frame,
        };

        let line = match frame {
            None => return Err(ConnectorError::ReadError(format!("{kind} ended"))),
            Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
            Some(Err(e)) => return Err(ConnectorError::ReadError(format!("{kind}: {e}"))),
            Some(Ok(LineFrame::Oversized)) => {
                warn!(source = %kind, max_len, "dropping line over the length limit");
                continue;
            }
            Some(Ok(LineFrame::Line(line))) => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tx.send(RawPayload::new(kind, line))
            .await
            .map_err(|_| ConnectorError::InvalidState {
                expected: "pipeline running".into(),
                actual: "pipeline channel closed".into(),
            })?;
    }
}

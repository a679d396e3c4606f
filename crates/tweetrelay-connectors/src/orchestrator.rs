//! Startup sequencing.
//!
//! ```text
//! Idle ──ensure_ready──▶ AdminReady ──start_streaming──▶ Streaming ──shutdown──▶ Stopped
//!   │                        │                               │
//!   └────────────────────────┴──────── any failure ──────────┴──────────────▶ Fatal
//! ```
//!
//! Ingestion never starts before topics exist, are visible, and the schema
//! registry is healthy. `Streaming → Stopped` is only reachable for sources
//! with a shutdown primitive; for the others a shutdown request is logged
//! and the orchestrator stays in `Streaming` until the process exits.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::ConnectorError;
use crate::kafka::{EventPublisher, KafkaAdminClient};
use crate::metrics::PipelineMetrics;
use crate::pipeline::Pipeline;
use crate::source::{IngestionSource, RulesApi, SourceHandle};

/// Lifecycle state of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Nothing checked yet.
    Idle,
    /// Topics exist and are visible, and the registry is healthy.
    AdminReady,
    /// A source and the pipeline are running.
    Streaming,
    /// Shut down cleanly.
    Stopped,
    /// Startup or streaming failed.
    Fatal,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::AdminReady => write!(f, "AdminReady"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Fatal => write!(f, "Fatal"),
        }
    }
}

/// The running source and pipeline tasks.
#[derive(Debug)]
pub struct StreamingTasks {
    /// The active source worker.
    pub source: SourceHandle,
    /// The pipeline consumer.
    pub pipeline: JoinHandle<Result<(), ConnectorError>>,
}

enum Exit {
    ShutdownRequested,
    Source(Result<(), ConnectorError>),
    Pipeline(Result<(), ConnectorError>),
}

/// Sequences broker readiness and source startup.
pub struct Orchestrator {
    config: AppConfig,
    admin: KafkaAdminClient,
    publisher: Arc<dyn EventPublisher>,
    rules_api: Option<Arc<dyn RulesApi>>,
    cancel: CancellationToken,
    state: OrchestratorState,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Orchestrator {
    /// Creates an orchestrator in the `Idle` state.
    ///
    /// `cancel` interrupts readiness waits and stops a source that supports
    /// shutdown.
    #[must_use]
    pub fn new(
        config: AppConfig,
        admin: KafkaAdminClient,
        publisher: Arc<dyn EventPublisher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            admin,
            publisher,
            rules_api: None,
            cancel,
            state: OrchestratorState::Idle,
            metrics: None,
        }
    }

    /// Uses `api` instead of the HTTP rules client.
    #[must_use]
    pub fn with_rules_api(mut self, api: Arc<dyn RulesApi>) -> Self {
        self.rules_api = Some(api);
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Pipeline counters, once streaming has started.
    #[must_use]
    pub fn metrics(&self) -> Option<Arc<PipelineMetrics>> {
        self.metrics.clone()
    }

    fn transition(&mut self, to: OrchestratorState) {
        info!(from = %self.state, to = %to, "orchestrator state change");
        self.state = to;
    }

    fn expect_state(&self, expected: OrchestratorState) -> Result<(), ConnectorError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ConnectorError::InvalidState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            })
        }
    }

    /// Moves to `Stopped` on cancellation and to `Fatal` otherwise.
    fn fail(&mut self, err: ConnectorError) -> ConnectorError {
        if matches!(err, ConnectorError::Cancelled) {
            self.transition(OrchestratorState::Stopped);
        } else {
            error!(state = %self.state, error = %err, "relay failed");
            self.transition(OrchestratorState::Fatal);
        }
        err
    }

    /// `Idle → AdminReady`: creates topics, waits for them to be listed and
    /// waits for the schema registry.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the state becomes `Fatal`, or `Stopped`
    /// if the wait was cancelled.
    pub async fn ensure_ready(&mut self) -> Result<(), ConnectorError> {
        self.expect_state(OrchestratorState::Idle)?;

        let specs = self.config.kafka.topic_specs();
        let names = self.config.kafka.topic_names();

        let result = async {
            self.admin.ensure_topics(&specs).await?;
            self.admin.await_topics_visible(&names).await?;
            self.admin.await_schema_registry_healthy().await?;
            Ok::<(), ConnectorError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.transition(OrchestratorState::AdminReady);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `AdminReady → Streaming`: builds the configured source, spawns the
    /// pipeline and starts the source.
    ///
    /// # Errors
    ///
    /// Returns the source construction error (for example a missing bearer
    /// token); the state becomes `Fatal`.
    pub fn start_streaming(&mut self) -> Result<StreamingTasks, ConnectorError> {
        self.expect_state(OrchestratorState::AdminReady)?;

        let source = match IngestionSource::from_config(
            &self.config.source,
            &self.config.retry,
            self.rules_api.clone(),
        ) {
            Ok(source) => source,
            Err(e) => return Err(self.fail(e)),
        };

        let (tx, rx) = mpsc::channel(self.config.source.channel_capacity.max(1));
        let pipeline = Pipeline::new(Arc::clone(&self.publisher), self.config.kafka.topic_name.trim());
        self.metrics = Some(pipeline.metrics());

        let pipeline = tokio::spawn(pipeline.run(rx));
        let source = source.start(tx);
        self.transition(OrchestratorState::Streaming);

        Ok(StreamingTasks { source, pipeline })
    }

    /// Runs the full lifecycle until shutdown or failure.
    ///
    /// Returns the final state: `Stopped` after a clean shutdown, or
    /// `Streaming` when shutdown was requested for a source that cannot be
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the relay to `Fatal`.
    pub async fn run(&mut self) -> Result<OrchestratorState, ConnectorError> {
        info!(message = %self.config.source.welcome_message, "relay starting");

        match self.ensure_ready().await {
            Ok(()) => {}
            Err(ConnectorError::Cancelled) => return Ok(self.state),
            Err(e) => return Err(e),
        }
        let mut tasks = self.start_streaming()?;

        let cancel = self.cancel.clone();
        let exit = tokio::select! {
            () = cancel.cancelled() => Exit::ShutdownRequested,
            result = tasks.source.wait() => Exit::Source(result),
            result = &mut tasks.pipeline => Exit::Pipeline(flatten(result)),
        };

        match exit {
            Exit::ShutdownRequested => {
                if !tasks.source.shutdown() {
                    return Ok(self.state);
                }
                let source_result = tasks.source.wait().await;
                let pipeline_result = flatten(tasks.pipeline.await);
                if let Err(e) = pipeline_result.and(source_result) {
                    return Err(self.fail(e));
                }
                self.transition(OrchestratorState::Stopped);
                Ok(self.state)
            }
            Exit::Source(result) => {
                // A source that lost its pipeline reports the pipeline's error.
                let err = match result {
                    Err(ConnectorError::InvalidState { .. }) => flatten(tasks.pipeline.await)
                        .err()
                        .unwrap_or_else(|| ConnectorError::Internal("pipeline closed".into())),
                    Err(e) => e,
                    Ok(()) => ConnectorError::ReadError(format!(
                        "{} ended unexpectedly",
                        tasks.source.kind()
                    )),
                };
                Err(self.fail(err))
            }
            Exit::Pipeline(result) => {
                let err = result
                    .err()
                    .unwrap_or_else(|| ConnectorError::Internal("pipeline ended".into()));
                Err(self.fail(err))
            }
        }
    }
}

fn flatten(
    result: Result<Result<(), ConnectorError>, tokio::task::JoinError>,
) -> Result<(), ConnectorError> {
    result.map_err(|e| ConnectorError::Internal(format!("pipeline task failed: {e}")))?
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("admin", &self.admin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::{BrokerAdmin, RegistryProbe};
    use crate::testing::{MockBrokerAdmin, MockRegistryProbe, RecordingPublisher};
    use std::time::Duration;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.source.enable_mock_tweets = true;
        config.source.enable_v2_tweets = false;
        config.source.mock_sleep_ms = 1_000;
        config.kafka.topic_name = "tweets".into();
        config.kafka.topic_names_to_create = vec!["tweets".into()];
        config.retry.sleep_time_ms = 1_000;
        config
    }

    fn orchestrator(
        config: AppConfig,
        admin: Arc<MockBrokerAdmin>,
        registry: Arc<MockRegistryProbe>,
        publisher: Arc<RecordingPublisher>,
        cancel: CancellationToken,
    ) -> Orchestrator {
        let admin_client = KafkaAdminClient::new(
            admin as Arc<dyn BrokerAdmin>,
            registry as Arc<dyn RegistryProbe>,
            config.retry.clone(),
            cancel.clone(),
        );
        Orchestrator::new(config, admin_client, publisher, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_ready_reaches_admin_ready() {
        let admin = Arc::new(MockBrokerAdmin::new());
        let mut orch = orchestrator(
            config(),
            Arc::clone(&admin),
            Arc::new(MockRegistryProbe::healthy()),
            Arc::new(RecordingPublisher::new()),
            CancellationToken::new(),
        );

        assert_eq!(orch.state(), OrchestratorState::Idle);
        orch.ensure_ready().await.unwrap();
        assert_eq!(orch.state(), OrchestratorState::AdminReady);
        assert_eq!(admin.topic_names(), vec!["tweets".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_exhaustion_is_fatal() {
        let mut orch = orchestrator(
            config(),
            Arc::new(MockBrokerAdmin::new()),
            Arc::new(MockRegistryProbe::unhealthy("HTTP 503")),
            Arc::new(RecordingPublisher::new()),
            CancellationToken::new(),
        );

        let err = orch.run().await.unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(orch.state(), OrchestratorState::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_requires_admin_ready() {
        let mut orch = orchestrator(
            config(),
            Arc::new(MockBrokerAdmin::new()),
            Arc::new(MockRegistryProbe::healthy()),
            Arc::new(RecordingPublisher::new()),
            CancellationToken::new(),
        );
        let err = orch.start_streaming().unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidState { .. }));
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bearer_token_is_fatal() {
        let mut cfg = config();
        cfg.source.enable_mock_tweets = false;
        cfg.source.enable_v2_tweets = true;
        cfg.source.bearer_token = None;
        let mut orch = orchestrator(
            cfg,
            Arc::new(MockBrokerAdmin::new()),
            Arc::new(MockRegistryProbe::healthy()),
            Arc::new(RecordingPublisher::new()),
            CancellationToken::new(),
        );

        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, ConnectorError::MissingConfig(_)));
        assert_eq!(orch.state(), OrchestratorState::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_readiness_stops() {
        let cancel = CancellationToken::new();
        let mut orch = orchestrator(
            config(),
            Arc::new(MockBrokerAdmin::new()),
            Arc::new(MockRegistryProbe::unhealthy("HTTP 503")),
            Arc::new(RecordingPublisher::new()),
            cancel.clone(),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });
        let state = orch.run().await.unwrap();
        canceller.await.unwrap();
        assert_eq!(state, OrchestratorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_is_fatal() {
        let publisher = Arc::new(RecordingPublisher::new());
        publisher.fail_after(2);
        let mut orch = orchestrator(
            config(),
            Arc::new(MockBrokerAdmin::new()),
            Arc::new(MockRegistryProbe::healthy()),
            Arc::clone(&publisher),
            CancellationToken::new(),
        );

        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, ConnectorError::WriteError(_)));
        assert_eq!(orch.state(), OrchestratorState::Fatal);
        assert_eq!(publisher.sent().len(), 2);
    }
}

//! # Tweet Relay Connectors
//!
//! Ingests short social-media status messages from one of three sources,
//! normalizes them into a canonical event and publishes each event to a
//! Kafka topic keyed by author id.
//!
//! - [`kafka`] - Topic administration, schema registry probe, producer
//! - [`source`] - Synthetic generator, filtered stream, rule-based stream
//! - [`transform`] - Raw payload to [`CanonicalEvent`] conversion
//! - [`pipeline`] - Transform-and-publish consumer
//! - [`orchestrator`] - Startup sequencing and lifecycle
//! - [`testing`] - In-memory doubles for the external seams
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator
//!   ensure_ready: create topics -> await visibility -> await registry
//!   start_streaming:
//!     Source --RawPayload--> mpsc --> Pipeline --CanonicalEvent--> Kafka
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Common test patterns that are acceptable
#![cfg_attr(
    test,
    allow(
        clippy::field_reassign_with_default,
        clippy::float_cmp,
        clippy::manual_let_else,
        clippy::unreadable_literal,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        unused_mut
    )
)]

/// Relay error types.
pub mod error;

/// Application configuration.
pub mod config;

/// Retry and polling with exponential backoff.
pub mod retry;

/// The canonical event and its timestamp formats.
pub mod event;

/// Raw payload transformation.
pub mod transform;

/// Pipeline counters.
pub mod metrics;

/// Kafka admin, schema registry and producer.
pub mod kafka;

/// Ingestion sources.
pub mod source;

/// Transform-and-publish consumer.
pub mod pipeline;

/// Startup sequencing.
pub mod orchestrator;

/// Testing utilities (mock admin, registry, rules endpoint, publisher).
pub mod testing;

pub use config::AppConfig;
pub use error::{ConnectorError, SerdeError};
pub use event::CanonicalEvent;
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use pipeline::Pipeline;
pub use source::{IngestionSource, SourceHandle, SourceKind};
pub use transform::{EventTransformer, RawPayload};

//! Relay error types.
//!
//! Provides a unified error hierarchy for the admin, ingestion and publish
//! paths:
//! - `ConnectorError`: Top-level error for every relay operation
//! - `SerdeError`: Decoding errors for a single raw payload
//!
//! Errors fall into four families. Transient failures are retried under a
//! backoff policy, exhausted retries are fatal, malformed input drops one
//! item, and configuration errors fail fast before anything starts.

use thiserror::Error;

/// Errors that can occur during relay operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Failed to connect to the external system.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Required configuration key is missing.
    #[error("missing required config: {0}")]
    MissingConfig(String),

    /// Error reading data from an upstream stream.
    #[error("read error: {0}")]
    ReadError(String),

    /// Error publishing data to the broker.
    #[error("write error: {0}")]
    WriteError(String),

    /// A configured topic is not yet listed by the broker.
    #[error("topic '{0}' is not visible yet")]
    TopicNotVisible(String),

    /// The schema registry did not answer with a 2xx status.
    #[error("schema registry unhealthy: {0}")]
    RegistryUnhealthy(String),

    /// Serialization or deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] SerdeError),

    /// A retried operation ran out of attempts.
    #[error("{operation}: retries exhausted after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        /// The operation that was retried.
        operation: String,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        last_error: Box<ConnectorError>,
    },

    /// The connector is not in the expected state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// The expected state.
        expected: String,
        /// The actual state.
        actual: String,
    },

    /// Operation timed out.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// A shutdown signal interrupted the operation.
    #[error("operation cancelled by shutdown")]
    Cancelled,

    /// An internal error that doesn't fit other categories.
    #[error("internal error: {0}")]
    Internal(String),

    /// An I/O error from the underlying system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Returns `true` if the failure is worth retrying under a backoff policy.
    ///
    /// Configuration errors, malformed input and exhausted retries are never
    /// transient: retrying them cannot change the outcome.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed(_)
                | ConnectorError::ReadError(_)
                | ConnectorError::TopicNotVisible(_)
                | ConnectorError::RegistryUnhealthy(_)
                | ConnectorError::Timeout(_)
                | ConnectorError::Io(_)
        )
    }

    /// Returns `true` if the error describes a single bad input item.
    ///
    /// The pipeline drops such items and keeps going.
    #[must_use]
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, ConnectorError::Serde(_))
    }

    /// Returns `true` if retries were exhausted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ConnectorError::RetryExhausted { .. })
    }

    /// Returns `true` for configuration errors detected before startup.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConfigurationError(_) | ConnectorError::MissingConfig(_)
        )
    }
}

/// Errors that occur while decoding a raw upstream payload.
#[derive(Debug, Error)]
pub enum SerdeError {
    /// JSON parsing or encoding error.
    #[error("JSON error: {0}")]
    Json(String),

    /// A required field is missing from the input.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A timestamp did not match the expected wire format.
    #[error("invalid timestamp '{value}': {message}")]
    InvalidTimestamp {
        /// The raw timestamp text.
        value: String,
        /// Details about the parse failure.
        message: String,
    },

    /// The input data is malformed.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl From<serde_json::Error> for SerdeError {
    fn from(e: serde_json::Error) -> Self {
        SerdeError::Json(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_error_display() {
        let err = ConnectorError::ConnectionFailed("broker unreachable".into());
        assert_eq!(err.to_string(), "connection failed: broker unreachable");
    }

    #[test]
    fn test_serde_error_from_json() {
        let json_err: Result<serde_json::Value, _> = serde_json::from_str("{bad json");
        let serde_err: SerdeError = json_err.unwrap_err().into();
        assert!(matches!(serde_err, SerdeError::Json(_)));
    }

    #[test]
    fn test_serde_error_into_connector_error() {
        let serde_err = SerdeError::MissingField("created_at".into());
        let conn_err: ConnectorError = serde_err.into();
        assert!(conn_err.is_malformed_input());
        assert!(!conn_err.is_transient());
        assert!(conn_err.to_string().contains("created_at"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ConnectorError::ConnectionFailed("x".into()).is_transient());
        assert!(ConnectorError::TopicNotVisible("t".into()).is_transient());
        assert!(ConnectorError::RegistryUnhealthy("503".into()).is_transient());
        assert!(ConnectorError::Timeout(100).is_transient());

        assert!(!ConnectorError::ConfigurationError("x".into()).is_transient());
        assert!(!ConnectorError::MissingConfig("bearer_token".into()).is_transient());
        assert!(!ConnectorError::WriteError("x".into()).is_transient());
        assert!(!ConnectorError::Cancelled.is_transient());
    }

    #[test]
    fn test_exhausted_is_distinct_from_malformed() {
        let exhausted = ConnectorError::RetryExhausted {
            operation: "create topics".into(),
            attempts: 3,
            last_error: Box::new(ConnectorError::ConnectionFailed("down".into())),
        };
        let malformed: ConnectorError = SerdeError::MalformedInput("bad".into()).into();

        assert!(exhausted.is_exhausted());
        assert!(!exhausted.is_malformed_input());
        assert!(!exhausted.is_transient());
        assert!(malformed.is_malformed_input());
        assert!(!malformed.is_exhausted());
    }

    #[test]
    fn test_exhausted_display_carries_last_error() {
        let err = ConnectorError::RetryExhausted {
            operation: "list topics".into(),
            attempts: 3,
            last_error: Box::new(ConnectorError::Timeout(5000)),
        };
        let msg = err.to_string();
        assert!(msg.contains("list topics"));
        assert!(msg.contains('3'));
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn test_invalid_timestamp_error() {
        let err = SerdeError::InvalidTimestamp {
            value: "yesterday".into(),
            message: "input contains invalid characters".into(),
        };
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn test_config_error_classification() {
        assert!(ConnectorError::MissingConfig("bearer_token".into()).is_config_error());
        assert!(!ConnectorError::Cancelled.is_config_error());
    }
}

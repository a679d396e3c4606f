//! Schema Registry health probing.
//!
//! The registry is healthy when `GET {schema_registry_url}` answers with
//! any 2xx status. Other statuses and transport errors mean "not healthy
//! yet" and are retried by the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::ConnectorError;

/// Result of one registry health probe. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistryStatus {
    /// Whether the registry answered with a 2xx status.
    pub healthy: bool,
    /// HTTP status or transport error text, for logging.
    pub detail: String,
}

impl SchemaRegistryStatus {
    /// Classifies an HTTP status code.
    #[must_use]
    pub fn from_status_code(code: u16) -> Self {
        Self {
            healthy: (200..300).contains(&code),
            detail: format!("HTTP {code}"),
        }
    }

    /// An unhealthy status with the given reason.
    #[must_use]
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// Probes registry health.
#[async_trait]
pub trait RegistryProbe: Send + Sync {
    /// The probed URL.
    fn url(&self) -> &str;

    /// Issues one probe. Never fails; failures are unhealthy statuses.
    async fn probe(&self) -> SchemaRegistryStatus;
}

/// [`RegistryProbe`] issuing plain HTTP GETs.
#[derive(Debug, Clone)]
pub struct HttpRegistryProbe {
    client: Client,
    url: String,
}

impl HttpRegistryProbe {
    /// Creates a probe for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConnectorError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ConnectorError::ConfigurationError(format!("schema registry client: {e}"))
        })?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RegistryProbe for HttpRegistryProbe {
    fn url(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> SchemaRegistryStatus {
        match self.client.get(&self.url).send().await {
            Ok(resp) => SchemaRegistryStatus::from_status_code(resp.status().as_u16()),
            Err(e) => SchemaRegistryStatus::unhealthy(format!("schema registry: {e}")),
        }
    }
}

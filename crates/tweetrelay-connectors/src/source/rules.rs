//! Stream rule management.
//!
//! Rule sets are replaced wholesale: [`reconcile_rules`] deletes every
//! remote rule in one request, then adds the full desired set in one
//! request. Rules are never patched individually.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::ConnectorError;

/// A remote filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRule {
    /// Broker-assigned id. Absent for rules not yet added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Filter expression.
    pub value: String,
    /// Label.
    pub tag: String,
}

impl StreamRule {
    /// Creates a rule without an id.
    #[must_use]
    pub fn new(value: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: None,
            value: value.into(),
            tag: tag.into(),
        }
    }

    /// The default rule for a tracked keyword.
    #[must_use]
    pub fn for_keyword(keyword: &str) -> Self {
        Self::new(keyword, format!("Keyword: {keyword}"))
    }
}

/// One default rule per keyword.
#[must_use]
pub fn default_rules(keywords: &[String]) -> Vec<StreamRule> {
    keywords.iter().map(|k| StreamRule::for_keyword(k)).collect()
}

/// Remote rules endpoint.
#[async_trait]
pub trait RulesApi: Send + Sync {
    /// Lists the ids of all remote rules.
    async fn list_rule_ids(&self) -> Result<Vec<String>, ConnectorError>;

    /// Deletes the rules with the given ids in one request.
    async fn delete_rules(&self, ids: &[String]) -> Result<(), ConnectorError>;

    /// Adds `rules` in one request.
    async fn add_rules(&self, rules: &[StreamRule]) -> Result<(), ConnectorError>;
}

/// Replaces the remote rule set with `desired`.
///
/// # Errors
///
/// Propagates the first failing request.
pub async fn reconcile_rules(
    api: &dyn RulesApi,
    desired: &[StreamRule],
) -> Result<(), ConnectorError> {
    let existing = api.list_rule_ids().await?;
    if !existing.is_empty() {
        info!(count = existing.len(), "deleting existing stream rules");
        api.delete_rules(&existing).await?;
    }
    info!(count = desired.len(), "adding stream rules");
    api.add_rules(desired).await
}

#[derive(Deserialize)]
struct RulesResponse {
    #[serde(default)]
    data: Vec<RuleEntry>,
}

#[derive(Deserialize)]
struct RuleEntry {
    id: String,
}

/// [`RulesApi`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpRulesClient {
    client: Client,
    url: String,
    bearer_token: String,
}

impl HttpRulesClient {
    /// Creates a client for the rules endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            bearer_token: bearer_token.into(),
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<String, ConnectorError> {
        let resp = request
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(format!("rules endpoint: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ConnectorError::ReadError(format!("rules endpoint body: {e}")))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(classify_status(status, &text))
        }
    }

    async fn post(&self, body: serde_json::Value) -> Result<(), ConnectorError> {
        self.execute(self.client.post(&self.url).json(&body))
            .await
            .map(|_| ())
    }
}

/// Server errors and throttling are transient; other rejections are not.
fn classify_status(status: StatusCode, body: &str) -> ConnectorError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ConnectorError::ConnectionFailed(format!("rules endpoint: {status} {body}"))
    } else {
        ConnectorError::ConfigurationError(format!("rules endpoint rejected request: {status} {body}"))
    }
}

#[async_trait]
impl RulesApi for HttpRulesClient {
    async fn list_rule_ids(&self) -> Result<Vec<String>, ConnectorError> {
        let text = self.execute(self.client.get(&self.url)).await?;
        let parsed: RulesResponse = serde_json::from_str(&text)
            .map_err(|e| ConnectorError::ReadError(format!("rules response: {e}")))?;
        Ok(parsed.data.into_iter().map(|r| r.id).collect())
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<(), ConnectorError> {
        self.post(json!({ "delete": { "ids": ids } })).await
    }

    async fn add_rules(&self, rules: &[StreamRule]) -> Result<(), ConnectorError> {
        self.post(json!({ "add": rules })).await
    }
}

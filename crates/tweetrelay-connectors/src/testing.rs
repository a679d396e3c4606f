//! In-memory doubles for the external seams.
//!
//! - [`MockBrokerAdmin`]: topic store with scripted listings and injected
//!   create failures
//! - [`MockRegistryProbe`]: scripted health statuses
//! - [`MockRulesApi`]: remote rule store recording every call
//! - [`RecordingPublisher`]: captures published events

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::ConnectorError;
use crate::event::CanonicalEvent;
use crate::kafka::{
    BrokerAdmin, EventPublisher, PendingDelivery, RegistryProbe, SchemaRegistryStatus, TopicSpec,
};
use crate::source::{RulesApi, StreamRule};

/// Decrements `counter` if positive, returning whether it was.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        .is_ok()
}

/// Mock broker admin.
///
/// Listings come from the script while it lasts, then from the topics
/// created so far.
#[derive(Debug, Default)]
pub struct MockBrokerAdmin {
    topics: Mutex<BTreeSet<String>>,
    listings: Mutex<VecDeque<Vec<String>>>,
    rejection: Mutex<Option<String>>,
    create_failures: AtomicU32,
    list_failures: AtomicU32,
    create_calls: AtomicU64,
    list_calls: AtomicU64,
}

impl MockBrokerAdmin {
    /// Creates an admin with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an admin that already has `topics`.
    #[must_use]
    pub fn with_topics(topics: &[&str]) -> Self {
        let admin = Self::default();
        admin
            .topics
            .lock()
            .extend(topics.iter().map(ToString::to_string));
        admin
    }

    /// Makes the next `n` create calls fail transiently.
    pub fn fail_creates(&self, n: u32) {
        self.create_failures.store(n, Ordering::Relaxed);
    }

    /// Makes every create call fail with a configuration error.
    pub fn reject_creates(&self, detail: &str) {
        *self.rejection.lock() = Some(detail.to_string());
    }

    /// Makes the next `n` list calls fail transiently.
    pub fn fail_lists(&self, n: u32) {
        self.list_failures.store(n, Ordering::Relaxed);
    }

    /// Queues listings returned by the next list calls, in order.
    pub fn script_listings(&self, listings: Vec<Vec<String>>) {
        self.listings.lock().extend(listings);
    }

    /// Number of create calls so far.
    #[must_use]
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// Number of list calls so far.
    #[must_use]
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Sorted names of the created topics.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl BrokerAdmin for MockBrokerAdmin {
    async fn create_topics(&self, topics: &[TopicSpec]) -> Result<(), ConnectorError> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(detail) = self.rejection.lock().as_ref() {
            return Err(ConnectorError::ConfigurationError(detail.clone()));
        }
        if take_failure(&self.create_failures) {
            return Err(ConnectorError::ConnectionFailed("broker unavailable".into()));
        }
        self.topics
            .lock()
            .extend(topics.iter().map(|t| t.name.clone()));
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>, ConnectorError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        if take_failure(&self.list_failures) {
            return Err(ConnectorError::Timeout(1_000));
        }
        if let Some(listing) = self.listings.lock().pop_front() {
            return Ok(listing);
        }
        Ok(self.topic_names())
    }
}

/// Mock schema registry probe.
///
/// Returns scripted statuses in order, then repeats the last one.
#[derive(Debug)]
pub struct MockRegistryProbe {
    script: Mutex<VecDeque<SchemaRegistryStatus>>,
    last: Mutex<SchemaRegistryStatus>,
    probe_calls: AtomicU64,
}

impl MockRegistryProbe {
    /// A registry that is always healthy.
    #[must_use]
    pub fn healthy() -> Self {
        Self::scripted(vec![SchemaRegistryStatus::from_status_code(200)])
    }

    /// A registry that is never healthy.
    #[must_use]
    pub fn unhealthy(detail: &str) -> Self {
        Self::scripted(vec![SchemaRegistryStatus::unhealthy(detail)])
    }

    /// A registry answering with `statuses` in order.
    #[must_use]
    pub fn scripted(statuses: Vec<SchemaRegistryStatus>) -> Self {
        let last = statuses
            .last()
            .cloned()
            .unwrap_or_else(|| SchemaRegistryStatus::from_status_code(200));
        Self {
            script: Mutex::new(statuses.into()),
            last: Mutex::new(last),
            probe_calls: AtomicU64::new(0),
        }
    }

    /// Number of probes so far.
    #[must_use]
    pub fn probe_calls(&self) -> u64 {
        self.probe_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RegistryProbe for MockRegistryProbe {
    fn url(&self) -> &str {
        "mock://schema-registry"
    }

    async fn probe(&self) -> SchemaRegistryStatus {
        self.probe_calls.fetch_add(1, Ordering::Relaxed);
        match self.script.lock().pop_front() {
            Some(status) => {
                self.last.lock().clone_from(&status);
                status
            }
            None => self.last.lock().clone(),
        }
    }
}

/// A call made against [`MockRulesApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulesCall {
    /// Rule ids were listed.
    List,
    /// Rules were deleted by id.
    Delete(Vec<String>),
    /// Rules were added.
    Add(Vec<StreamRule>),
}

/// Mock rules endpoint keeping the remote rule set in memory.
#[derive(Debug, Default)]
pub struct MockRulesApi {
    rules: Mutex<Vec<StreamRule>>,
    calls: Mutex<Vec<RulesCall>>,
    add_failures: AtomicU32,
    next_id: AtomicU64,
}

impl MockRulesApi {
    /// An endpoint with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An endpoint holding `rules`.
    #[must_use]
    pub fn with_rules(rules: Vec<StreamRule>) -> Self {
        let api = Self::default();
        *api.rules.lock() = rules;
        api
    }

    /// Makes the next `n` add calls fail transiently.
    pub fn fail_next_adds(&self, n: u32) {
        self.add_failures.store(n, Ordering::Relaxed);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RulesCall> {
        self.calls.lock().clone()
    }

    /// The current remote rule set.
    #[must_use]
    pub fn remote_rules(&self) -> Vec<StreamRule> {
        self.rules.lock().clone()
    }
}

#[async_trait]
impl RulesApi for MockRulesApi {
    async fn list_rule_ids(&self) -> Result<Vec<String>, ConnectorError> {
        self.calls.lock().push(RulesCall::List);
        Ok(self
            .rules
            .lock()
            .iter()
            .filter_map(|r| r.id.clone())
            .collect())
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<(), ConnectorError> {
        self.calls.lock().push(RulesCall::Delete(ids.to_vec()));
        self.rules
            .lock()
            .retain(|r| r.id.as_ref().map_or(true, |id| !ids.contains(id)));
        Ok(())
    }

    async fn add_rules(&self, rules: &[StreamRule]) -> Result<(), ConnectorError> {
        self.calls.lock().push(RulesCall::Add(rules.to_vec()));
        if take_failure(&self.add_failures) {
            return Err(ConnectorError::ConnectionFailed("rules endpoint: 503".into()));
        }
        let mut remote = self.rules.lock();
        for rule in rules {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            remote.push(StreamRule {
                id: Some(format!("mock-{id}")),
                ..rule.clone()
            });
        }
        Ok(())
    }
}

/// Publisher that records every event.
///
/// Each send is recorded immediately. Its delivery resolves straight away
/// unless deliveries are held, in which case it waits for
/// [`release_deliveries`](Self::release_deliveries).
#[derive(Debug)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, CanonicalEvent)>>,
    fail_after: Mutex<Option<usize>>,
    gate: watch::Sender<bool>,
    delivered: Arc<AtomicU64>,
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPublisher {
    /// A publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            sent: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
            gate,
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fails the delivery of every send after the first `n` succeed.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock() = Some(n);
    }

    /// Keeps deliveries pending until released.
    pub fn hold_deliveries(&self) {
        self.gate.send_replace(true);
    }

    /// Lets pending and future deliveries complete.
    pub fn release_deliveries(&self) {
        self.gate.send_replace(false);
    }

    /// `(topic, event)` pairs sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, CanonicalEvent)> {
        self.sent.lock().clone()
    }

    /// Number of deliveries that completed successfully.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn send(
        &self,
        topic: &str,
        event: &CanonicalEvent,
    ) -> Result<PendingDelivery, ConnectorError> {
        {
            let mut sent = self.sent.lock();
            let rejected = self.fail_after.lock().is_some_and(|limit| sent.len() >= limit);
            if rejected {
                let err = ConnectorError::WriteError(format!(
                    "injected failure publishing to '{topic}'"
                ));
                return Ok(Box::pin(async move { Err(err) }));
            }
            sent.push((topic.to_string(), event.clone()));
        }

        let mut gate = self.gate.subscribe();
        let delivered = Arc::clone(&self.delivered);
        Ok(Box::pin(async move {
            if gate.wait_for(|held| !*held).await.is_err() {
                return Err(ConnectorError::WriteError(
                    "publisher dropped before delivery".into(),
                ));
            }
            delivered.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }))
    }
}

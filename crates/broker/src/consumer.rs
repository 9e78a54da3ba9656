//! Consumer registrations, delivered messages and subscription handles.

use crate::config::StartFrom;
use crate::filter::SharedFilter;
use async_trait::async_trait;
use broker_core::{Headers, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// How a consumer attaches to a topic.
#[derive(Clone)]
pub struct ConsumerOptions {
    pub group_id: String,
    pub topic: String,
    /// Fixed partitions; bypasses group rebalancing when set
    pub partitions: Option<Vec<i32>>,
    pub filter: Option<SharedFilter>,
    /// Overrides the broker-wide start position
    pub start_from: Option<StartFrom>,
    /// Member id within the group; a random id is generated when unset
    pub client_id: Option<String>,
}

impl ConsumerOptions {
    pub fn new(group_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            topic: topic.into(),
            partitions: None,
            filter: None,
            start_from: None,
            client_id: None,
        }
    }

    pub fn with_partitions(mut self, partitions: impl IntoIterator<Item = i32>) -> Self {
        self.partitions = Some(partitions.into_iter().collect());
        self
    }

    pub fn with_filter(mut self, filter: SharedFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_start_from(mut self, start_from: StartFrom) -> Self {
        self.start_from = Some(start_from);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

impl fmt::Debug for ConsumerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerOptions")
            .field("group_id", &self.group_id)
            .field("topic", &self.topic)
            .field("partitions", &self.partitions)
            .field("filter", &self.filter.is_some())
            .field("start_from", &self.start_from)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// A decoded record handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<K, V> {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<K>,
    pub value: V,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
}

/// Consumer callback.
///
/// Returning an error requests redelivery of the same record according to
/// the broker's retry policy.
#[async_trait]
pub trait MessageHandler<K, V>: Send + Sync + 'static {
    async fn handle(&self, message: Message<K, V>) -> Result<()>;
}

#[async_trait]
impl<K, V, F> MessageHandler<K, V> for F
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(Message<K, V>) -> Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, message: Message<K, V>) -> Result<()> {
        self(message)
    }
}

/// Per-subscription delivery counters.
#[derive(Debug)]
pub struct SubscriptionStats {
    delivered: watch::Sender<u64>,
    filtered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Default for SubscriptionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionStats {
    pub fn new() -> Self {
        let (delivered, _) = watch::channel(0);
        Self {
            delivered,
            filtered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.send_modify(|n| *n += 1);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        *self.delivered.borrow()
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    /// Failed delivery attempts, retries included.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to a registered consumer.
///
/// Counters stay readable after the consumer is unsubscribed.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    group_id: String,
    topic: String,
    consumer_id: String,
    stats: Arc<SubscriptionStats>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        group_id: impl Into<String>,
        topic: impl Into<String>,
        consumer_id: impl Into<String>,
        stats: Arc<SubscriptionStats>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            topic: topic.into(),
            consumer_id: consumer_id.into(),
            stats,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// Records the handler accepted so far.
    pub fn delivered_count(&self) -> u64 {
        self.stats.delivered()
    }

    /// Waits until at least `target` records were delivered.
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for_delivered(&self, target: u64, timeout: Duration) -> bool {
        let mut rx = self.stats.delivered.subscribe();
        let reached = tokio::time::timeout(timeout, async move {
            rx.wait_for(|&n| n >= target).await.is_ok()
        })
        .await;
        matches!(reached, Ok(true))
    }
}

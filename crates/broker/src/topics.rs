//! Topic definitions and the topic registry.

use crate::log::PartitionLog;
use broker_core::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use telemetry::metrics;
use tokio::sync::watch;
use tracing::{debug, info};

/// Topic names used by the demo.
pub mod topic {
    pub const MESSAGE: &str = "baeldung";
    pub const PARTITIONED: &str = "partitioned";
    pub const FILTERED: &str = "filtered";
    pub const GREETING: &str = "greeting";
}

/// Topic declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: i32,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
        }
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }
}

/// Topics declared up front by the demo. Everything else is auto-created.
pub fn default_topic_configs() -> Vec<TopicConfig> {
    vec![TopicConfig::new(topic::PARTITIONED).with_partitions(5)]
}

/// A named topic with a fixed number of partition logs.
#[derive(Debug)]
pub struct Topic {
    name: String,
    partitions: Vec<PartitionLog>,
    next_partition: AtomicUsize,
    /// Bumped on every append and every rebalance touching this topic
    activity: watch::Sender<u64>,
}

impl Topic {
    fn new(name: impl Into<String>, partition_count: i32) -> Self {
        let (activity, _) = watch::channel(0);
        Self {
            name: name.into(),
            partitions: (0..partition_count).map(PartitionLog::new).collect(),
            next_partition: AtomicUsize::new(0),
            activity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_count(&self) -> i32 {
        self.partitions.len() as i32
    }

    pub fn partition(&self, partition: i32) -> Option<&PartitionLog> {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.partitions.get(p))
    }

    /// Looks up a partition, failing with `OutOfRange` if it doesn't exist.
    pub fn partition_checked(&self, partition: i32) -> Result<&PartitionLog> {
        self.partition(partition)
            .ok_or_else(|| Error::out_of_range(&self.name, partition, self.partition_count()))
    }

    pub(crate) fn next_round_robin(&self) -> i32 {
        let n = self.next_partition.fetch_add(1, Ordering::Relaxed);
        (n % self.partitions.len()) as i32
    }

    /// Receiver woken on appends and rebalances.
    pub fn activity(&self) -> watch::Receiver<u64> {
        self.activity.subscribe()
    }

    pub(crate) fn notify(&self) {
        self.activity.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// Registry of all topics. Each name is created at most once.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.read().get(name).cloned()
    }

    /// Returns the existing topic, or creates it with `partition_count`.
    ///
    /// The partition count of an existing topic is never changed.
    pub fn ensure_topic(&self, name: &str, partition_count: i32) -> Result<Arc<Topic>> {
        if let Some(topic) = self.get(name) {
            return Ok(topic);
        }
        if partition_count <= 0 {
            return Err(Error::InvalidPartitionCount(partition_count));
        }

        let mut topics = self.topics.write();
        let topic = topics
            .entry(name.to_string())
            .or_insert_with(|| {
                metrics().topics_created.inc();
                info!(topic = %name, partitions = partition_count, "Created topic");
                Arc::new(Topic::new(name, partition_count))
            })
            .clone();
        Ok(topic)
    }

    /// Creates a topic; idempotent when the shape matches.
    pub fn create_topic(&self, name: &str, partition_count: i32) -> Result<Arc<Topic>> {
        let topic = self.ensure_topic(name, partition_count)?;
        if topic.partition_count() != partition_count {
            return Err(Error::TopicConflict {
                topic: name.to_string(),
                existing: topic.partition_count(),
                requested: partition_count,
            });
        }
        Ok(topic)
    }

    /// Creates every declared topic.
    pub fn declare_topics(&self, configs: &[TopicConfig]) -> Result<()> {
        for config in configs {
            self.create_topic(&config.name, config.partitions)?;
            debug!(topic = %config.name, "Declared topic");
        }
        Ok(())
    }

    /// Names of all topics, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }
}

//! Broker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a consumer group starts reading a partition it has no cursor for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    /// Offset 0.
    Earliest,
    /// The log end at the time of assignment.
    #[default]
    Latest,
}

/// What to do with a record whose payload cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Log, count and advance past the record.
    #[default]
    Drop,
    /// Apply the retry policy, then drop.
    Retry,
}

/// Redelivery policy for failed handler invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total delivery attempts per record, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff step between attempts in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff before the given attempt (attempt 0 is the first delivery).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms) * attempt
    }

    /// Never retry: a failed record is dropped immediately.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

/// In-process broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Bootstrap address. Kept for configuration parity; the in-process
    /// broker never connects anywhere.
    #[serde(default = "default_bootstrap_address")]
    pub bootstrap_address: String,
    /// Create topics on first produce/consume
    #[serde(default = "default_auto_create_topics")]
    pub auto_create_topics: bool,
    /// Partition count for auto-created topics
    #[serde(default = "default_partition_count")]
    pub default_partition_count: i32,
    /// Default start position for new group cursors
    #[serde(default)]
    pub start_from: StartFrom,
    /// Maximum records a worker takes from one partition per round
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub malformed: MalformedPolicy,
}

fn default_bootstrap_address() -> String {
    "localhost:9092".to_string()
}

fn default_auto_create_topics() -> bool {
    true
}

fn default_partition_count() -> i32 {
    1
}

fn default_max_poll_records() -> usize {
    500
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_address: default_bootstrap_address(),
            auto_create_topics: default_auto_create_topics(),
            default_partition_count: default_partition_count(),
            start_from: StartFrom::default(),
            max_poll_records: default_max_poll_records(),
            retry: RetryConfig::default(),
            malformed: MalformedPolicy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn with_auto_create_topics(mut self, enabled: bool) -> Self {
        self.auto_create_topics = enabled;
        self
    }

    pub fn with_default_partition_count(mut self, count: i32) -> Self {
        self.default_partition_count = count;
        self
    }

    pub fn with_start_from(mut self, start_from: StartFrom) -> Self {
        self.start_from = start_from;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }
}

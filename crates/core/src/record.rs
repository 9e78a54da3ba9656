//! Record types shared by producers, the partition log and consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record headers.
pub type Headers = BTreeMap<String, Vec<u8>>;

/// A record as stored in a partition log.
///
/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// Returns true if the value contains `needle` as a byte substring.
    pub fn value_contains(&self, needle: &[u8]) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.value.windows(needle.len()).any(|w| w == needle)
    }
}

/// Where a produced record landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A record to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    /// Explicit target partition; bypasses the partitioner when set.
    pub partition: Option<i32>,
    pub headers: Headers,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            partition: None,
            headers: Headers::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

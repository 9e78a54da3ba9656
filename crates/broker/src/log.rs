//! Append-only partition log.

use broker_core::{Headers, Record};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;

/// Ordered records of one partition. Offsets start at 0 and are never reused.
#[derive(Debug)]
pub struct PartitionLog {
    partition: i32,
    records: Mutex<Vec<Arc<Record>>>,
}

impl PartitionLog {
    pub fn new(partition: i32) -> Self {
        Self {
            partition,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Appends a record and returns its offset.
    pub fn append(&self, key: Option<Vec<u8>>, value: Vec<u8>, headers: Headers) -> i64 {
        let mut records = self.records.lock();
        let offset = records.len() as i64;
        records.push(Arc::new(Record {
            key,
            value,
            partition: self.partition,
            offset,
            headers,
            timestamp: Utc::now(),
        }));
        offset
    }

    /// Returns up to `max` records starting at `from`.
    pub fn read(&self, from: i64, max: usize) -> Vec<Arc<Record>> {
        let records = self.records.lock();
        let start = from.clamp(0, records.len() as i64) as usize;
        let end = start.saturating_add(max).min(records.len());
        records[start..end].to_vec()
    }

    /// Offset the next appended record will get.
    pub fn end_offset(&self) -> i64 {
        self.records.lock().len() as i64
    }
}

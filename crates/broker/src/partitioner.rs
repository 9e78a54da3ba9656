//! Partition routing for produced records.

use crate::topics::Topic;
use broker_core::{Error, Result};
use murmur2::{murmur2, KAFKA_SEED};

/// Computes a partition for `key`, matching the Kafka client's default
/// partitioner (`toPositive(murmur2(key)) % partitions`).
pub fn partition_hash(key: &[u8], num_partitions: i32) -> i32 {
    debug_assert!(num_partitions > 0, "num_partitions must be positive");
    let hash = murmur2(key, KAFKA_SEED) & 0x7fff_ffff;
    (hash % num_partitions as u32) as i32
}

/// Chooses the target partition within `topic`.
///
/// - explicit partition: validated and returned as-is
/// - key: stable hash of the key
/// - neither: round-robin across the topic's partitions
pub fn choose_partition(topic: &Topic, explicit: Option<i32>, key: Option<&[u8]>) -> Result<i32> {
    let count = topic.partition_count();

    if let Some(partition) = explicit {
        if partition < 0 || partition >= count {
            return Err(Error::out_of_range(topic.name(), partition, count));
        }
        return Ok(partition);
    }

    match key {
        Some(key) => Ok(partition_hash(key, count)),
        None => Ok(topic.next_round_robin()),
    }
}

//! Unified error types for the pub/sub engine.
//!
//! Error codes:
//! - TOPIC_001-004: Topic lookup and shape errors
//! - PART_001: Partition index errors
//! - CODEC_001-002: Payload encoding errors
//! - GROUP_001-003: Consumer group errors
//! - DELIVERY_001: Handler failures

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the pub/sub engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Produce/consume against a missing topic with auto-create disabled.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Explicit partition index outside `[0, partition_count)`.
    #[error("partition {partition} out of range for topic {topic} ({partition_count} partitions)")]
    OutOfRange {
        topic: String,
        partition: i32,
        partition_count: i32,
    },

    /// A topic already exists with a different partition count.
    #[error("topic {topic} already exists with {existing} partitions (requested {requested})")]
    TopicConflict {
        topic: String,
        existing: i32,
        requested: i32,
    },

    #[error("invalid partition count: {0}")]
    InvalidPartitionCount(i32),

    /// Bytes could not be decoded into the expected payload.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A rebalance produced overlapping or missing assignments.
    ///
    /// Always a defect, never an expected runtime condition.
    #[error("duplicate assignment in group {group} for {topic}/{partition}")]
    DuplicateAssignment {
        group: String,
        topic: String,
        partition: i32,
    },

    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    /// A consumer handler rejected a record.
    #[error("handler failure: {0}")]
    HandlerFailure(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn out_of_range(topic: impl Into<String>, partition: i32, partition_count: i32) -> Self {
        Self::OutOfRange {
            topic: topic.into(),
            partition,
            partition_count,
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    pub fn invalid_subscription(msg: impl Into<String>) -> Self {
        Self::InvalidSubscription(msg.into())
    }

    /// Create a handler failure. Handlers return this to request redelivery.
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::HandlerFailure(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the stable error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownTopic(_) => "TOPIC_001",
            Self::TopicConflict { .. } => "TOPIC_002",
            Self::InvalidPartitionCount(_) => "TOPIC_003",
            Self::OutOfRange { .. } => "PART_001",
            Self::MalformedPayload(_) => "CODEC_001",
            Self::Serialization(_) => "CODEC_002",
            Self::DuplicateAssignment { .. } => "GROUP_001",
            Self::InvalidSubscription(_) => "GROUP_002",
            Self::UnknownSubscription(_) => "GROUP_003",
            Self::HandlerFailure(_) => "DELIVERY_001",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

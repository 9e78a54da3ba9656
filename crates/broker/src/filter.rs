//! Per-consumer record filters.
//!
//! A filter sees the raw record before decoding. Records it rejects are
//! consumed and dropped: the cursor moves past them and the handler never
//! runs.

use broker_core::Record;
use std::sync::Arc;

/// Decides whether a record reaches the consumer's handler.
pub trait RecordFilter: Send + Sync + 'static {
    fn should_deliver(&self, record: &Record) -> bool;
}

impl<F> RecordFilter for F
where
    F: Fn(&Record) -> bool + Send + Sync + 'static,
{
    fn should_deliver(&self, record: &Record) -> bool {
        self(record)
    }
}

/// Shared filter handle stored in a consumer registration.
pub type SharedFilter = Arc<dyn RecordFilter>;

/// Drops records whose value contains `needle`.
pub fn discard_containing(needle: impl Into<String>) -> SharedFilter {
    let needle = needle.into().into_bytes();
    Arc::new(move |record: &Record| !record.value_contains(&needle))
}

/// Drops records whose value does not contain `needle`.
pub fn require_containing(needle: impl Into<String>) -> SharedFilter {
    let needle = needle.into().into_bytes();
    Arc::new(move |record: &Record| record.value_contains(&needle))
}

/// Passes a record only if every filter passes it.
pub fn all_of(filters: Vec<SharedFilter>) -> SharedFilter {
    Arc::new(move |record: &Record| filters.iter().all(|f| f.should_deliver(record)))
}

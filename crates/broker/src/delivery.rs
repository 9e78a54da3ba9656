//! Delivery worker: pushes records from assigned partitions to one consumer.
//!
//! Each registered consumer gets its own task:
//! 1. Read records from the group cursor of every owned partition
//! 2. Filter, decode, and hand them to the handler in offset order
//! 3. Advance the group cursor after each processed record
//! 4. Sleep until the topic reports new activity

use crate::codec::Codec;
use crate::config::{BrokerConfig, MalformedPolicy, RetryConfig};
use crate::consumer::{Message, MessageHandler, SubscriptionStats};
use crate::filter::SharedFilter;
use crate::group::GroupTable;
use crate::topics::Topic;
use broker_core::{Error, Record, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Delivery settings taken from the broker configuration.
#[derive(Debug, Clone)]
pub(crate) struct DeliverySettings {
    pub retry: RetryConfig,
    pub malformed: MalformedPolicy,
    pub max_poll_records: usize,
}

impl From<&BrokerConfig> for DeliverySettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            malformed: config.malformed,
            max_poll_records: config.max_poll_records.max(1),
        }
    }
}

pub(crate) struct DeliveryWorker<K: Codec, V: Codec> {
    pub topic: Arc<Topic>,
    pub groups: Arc<GroupTable>,
    pub group_id: String,
    pub consumer_id: String,
    pub key_codec: K,
    pub value_codec: V,
    pub handler: Arc<dyn MessageHandler<K::Value, V::Value>>,
    pub filter: Option<SharedFilter>,
    pub stats: Arc<SubscriptionStats>,
    pub settings: DeliverySettings,
}

impl<K: Codec, V: Codec> DeliveryWorker<K, V> {
    /// Main run loop. Returns once `stop` flips to true or its sender is dropped.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut activity = self.topic.activity();

        info!(
            topic = %self.topic.name(),
            group_id = %self.group_id,
            consumer_id = %self.consumer_id,
            "Delivery worker starting"
        );

        loop {
            if *stop.borrow() {
                break;
            }
            activity.borrow_and_update();

            let processed = self.poll_once(&stop).await;
            if processed > 0 {
                debug!(
                    consumer_id = %self.consumer_id,
                    count = processed,
                    "Processed records"
                );
                continue;
            }

            tokio::select! {
                res = stop.changed() => {
                    if res.is_err() || *stop.borrow() {
                        break;
                    }
                }
                res = activity.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            topic = %self.topic.name(),
            group_id = %self.group_id,
            consumer_id = %self.consumer_id,
            "Delivery worker stopped"
        );
    }

    /// One pass over every owned partition. Returns the number of records
    /// processed (delivered, filtered or dropped).
    async fn poll_once(&self, stop: &watch::Receiver<bool>) -> usize {
        let topic = self.topic.name();
        let Some(assignment) = self.groups.assignment(&self.group_id, topic, &self.consumer_id) else {
            return 0;
        };

        let mut processed = 0;
        for partition in assignment.partitions {
            let Some(position) = self
                .groups
                .position(&self.group_id, topic, &self.consumer_id, partition)
            else {
                continue;
            };
            let Some(log) = self.topic.partition(partition) else {
                continue;
            };

            for record in log.read(position, self.settings.max_poll_records) {
                if *stop.borrow() {
                    return processed;
                }

                self.process(&record).await;
                processed += 1;

                let committed = self.groups.commit(
                    &self.group_id,
                    topic,
                    &self.consumer_id,
                    partition,
                    record.offset + 1,
                );
                if !committed {
                    debug!(
                        consumer_id = %self.consumer_id,
                        partition = partition,
                        "Partition revoked during delivery"
                    );
                    break;
                }
            }
        }

        processed
    }

    /// Filters, decodes and delivers one record, applying the retry policy.
    /// Always resolves: the record ends up delivered, filtered or dropped.
    async fn process(&self, record: &Record) {
        if let Some(filter) = &self.filter {
            if !filter.should_deliver(record) {
                self.stats.record_filtered();
                metrics().records_filtered.inc();
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    consumer_id = %self.consumer_id,
                    "Record filtered"
                );
                return;
            }
        }

        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = match self.decode(record) {
                Ok(message) => {
                    let start = Instant::now();
                    let result = AssertUnwindSafe(self.handler.handle(message))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(Error::handler(panic_message(&*panic))));
                    metrics()
                        .handler_latency_ms
                        .observe(start.elapsed().as_millis() as u64);
                    result
                }
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(()) => {
                    self.stats.record_delivered();
                    metrics().records_delivered.inc();
                    return;
                }
                Err(e) => e,
            };

            attempt += 1;
            let malformed = matches!(err, Error::MalformedPayload(_));
            if malformed {
                metrics().malformed_payloads.inc();
            } else {
                metrics().handler_failures.inc();
            }
            self.stats.record_failed();

            let retryable = !malformed || self.settings.malformed == MalformedPolicy::Retry;
            if !retryable || attempt >= max_attempts {
                self.stats.record_dropped();
                metrics().records_dropped.inc();
                warn!(
                    topic = %self.topic.name(),
                    partition = record.partition,
                    offset = record.offset,
                    consumer_id = %self.consumer_id,
                    attempts = attempt,
                    code = err.error_code(),
                    error = %err,
                    "Dropping record"
                );
                return;
            }

            let backoff = self.settings.retry.backoff(attempt);
            warn!(
                partition = record.partition,
                offset = record.offset,
                attempt = attempt,
                backoff_ms = %backoff.as_millis(),
                error = %err,
                "Redelivering record"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    fn decode(&self, record: &Record) -> Result<Message<K::Value, V::Value>> {
        let key = record
            .key
            .as_deref()
            .map(|k| self.key_codec.decode(k))
            .transpose()?;
        let value = self.value_codec.decode(&record.value)?;

        Ok(Message {
            topic: self.topic.name().to_string(),
            partition: record.partition,
            offset: record.offset,
            key,
            value,
            headers: record.headers.clone(),
            timestamp: record.timestamp,
        })
    }
}

/// Text of a caught handler panic.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}

//! The in-process broker: topic registry, group table and delivery workers.

use crate::codec::{Codec, JsonCodec};
use crate::config::BrokerConfig;
use crate::consumer::{ConsumerOptions, MessageHandler, SubscriptionHandle, SubscriptionStats};
use crate::delivery::{DeliverySettings, DeliveryWorker};
use crate::group::GroupTable;
use crate::partitioner::choose_partition;
use crate::topics::{Topic, TopicConfig, TopicRegistry};
use broker_core::{Error, ProducerRecord, RecordMetadata, Result};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use telemetry::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

struct SubscriptionEntry {
    handle: SubscriptionHandle,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// In-process publish/subscribe broker.
pub struct Broker {
    config: BrokerConfig,
    topics: TopicRegistry,
    groups: Arc<GroupTable>,
    subscriptions: Mutex<HashMap<Uuid, SubscriptionEntry>>,
}

impl Broker {
    /// Creates a new broker.
    pub fn new(config: BrokerConfig) -> Self {
        info!(
            bootstrap_address = %config.bootstrap_address,
            auto_create_topics = config.auto_create_topics,
            default_partition_count = config.default_partition_count,
            "Creating in-process broker"
        );

        Self {
            config,
            topics: TopicRegistry::new(),
            groups: Arc::new(GroupTable::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    /// Creates a topic; idempotent if the partition count matches.
    pub fn create_topic(&self, name: &str, partition_count: i32) -> Result<Arc<Topic>> {
        self.topics.create_topic(name, partition_count)
    }

    pub fn declare_topics(&self, configs: &[TopicConfig]) -> Result<()> {
        self.topics.declare_topics(configs)
    }

    /// Looks up a topic, auto-creating it when enabled.
    fn resolve_topic(&self, name: &str) -> Result<Arc<Topic>> {
        if let Some(topic) = self.topics.get(name) {
            return Ok(topic);
        }
        if !self.config.auto_create_topics {
            return Err(Error::UnknownTopic(name.to_string()));
        }
        self.topics
            .ensure_topic(name, self.config.default_partition_count)
    }

    /// Appends a record and wakes the topic's consumers.
    pub fn produce(&self, record: ProducerRecord) -> Result<RecordMetadata> {
        let topic = self.resolve_topic(&record.topic)?;
        let partition = choose_partition(&topic, record.partition, record.key.as_deref())?;
        let log = topic.partition_checked(partition)?;

        let offset = log.append(record.key, record.value, record.headers);
        topic.notify();
        metrics().records_produced.inc();

        debug!(
            topic = %record.topic,
            partition = partition,
            offset = offset,
            "Produced record"
        );

        Ok(RecordMetadata {
            topic: record.topic,
            partition,
            offset,
        })
    }

    /// Produces a JSON-encoded value with an optional text key.
    pub fn produce_typed<T>(&self, topic: &str, key: Option<&str>, value: &T) -> Result<RecordMetadata>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let payload = JsonCodec::<T>::new().encode(value)?;
        let mut record = ProducerRecord::new(topic, payload);
        if let Some(key) = key {
            record = record.with_key(key.as_bytes());
        }
        self.produce(record)
    }

    /// Registers a consumer and starts its delivery worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register_consumer<K, V, H>(
        &self,
        options: ConsumerOptions,
        key_codec: K,
        value_codec: V,
        handler: H,
    ) -> Result<SubscriptionHandle>
    where
        K: Codec,
        V: Codec,
        H: MessageHandler<K::Value, V::Value>,
    {
        let topic = self.resolve_topic(&options.topic)?;
        let consumer_id = options
            .client_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", options.group_id, Uuid::new_v4()));
        let start_from = options.start_from.unwrap_or(self.config.start_from);

        match &options.partitions {
            Some(partitions) => self.groups.subscribe_explicit(
                &topic,
                &options.group_id,
                &consumer_id,
                partitions,
                start_from,
            )?,
            None => self
                .groups
                .subscribe(&topic, &options.group_id, &consumer_id, start_from)?,
        };

        let stats = Arc::new(SubscriptionStats::new());
        let handle = SubscriptionHandle::new(
            &options.group_id,
            topic.name(),
            &consumer_id,
            stats.clone(),
        );

        let worker = DeliveryWorker {
            topic: topic.clone(),
            groups: self.groups.clone(),
            group_id: options.group_id.clone(),
            consumer_id: consumer_id.clone(),
            key_codec,
            value_codec,
            handler: Arc::new(handler),
            filter: options.filter.clone(),
            stats,
            settings: DeliverySettings::from(&self.config),
        };

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(stop_rx));

        self.subscriptions.lock().insert(
            handle.id(),
            SubscriptionEntry {
                handle: handle.clone(),
                stop,
                task,
            },
        );
        metrics().active_subscriptions.inc();

        info!(
            group_id = %options.group_id,
            topic = %topic.name(),
            consumer_id = %consumer_id,
            explicit = options.partitions.is_some(),
            filtered = options.filter.is_some(),
            "Registered consumer"
        );

        Ok(handle)
    }

    /// Records delivered to a subscription so far.
    pub fn delivered_count(&self, handle: &SubscriptionHandle) -> u64 {
        handle.delivered_count()
    }

    /// All live subscriptions.
    pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
        self.subscriptions
            .lock()
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Stops a consumer and removes it from its group.
    ///
    /// Waits for the in-flight record to finish before leaving, so the
    /// group never sees a departed member commit.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        let entry = self
            .subscriptions
            .lock()
            .remove(&handle.id())
            .ok_or_else(|| Error::UnknownSubscription(handle.id().to_string()))?;

        self.stop_entry(entry).await
    }

    async fn stop_entry(&self, entry: SubscriptionEntry) -> Result<()> {
        let _ = entry.stop.send(true);
        if let Err(e) = entry.task.await {
            error!(
                consumer_id = %entry.handle.consumer_id(),
                error = %e,
                "Delivery worker terminated abnormally"
            );
        }
        metrics().active_subscriptions.dec();

        let topic = self
            .topics
            .get(entry.handle.topic())
            .ok_or_else(|| Error::UnknownTopic(entry.handle.topic().to_string()))?;
        self.groups
            .unsubscribe(&topic, entry.handle.group_id(), entry.handle.consumer_id())
    }

    /// Stops every consumer.
    pub async fn shutdown(&self) {
        let entries: Vec<SubscriptionEntry> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        info!(count = entries.len(), "Shutting down consumers");

        for entry in &entries {
            let _ = entry.stop.send(true);
        }
        for entry in entries {
            let consumer_id = entry.handle.consumer_id().to_string();
            if let Err(e) = self.stop_entry(entry).await {
                error!(consumer_id = %consumer_id, error = %e, "Failed to leave group on shutdown");
            }
        }

        info!("Broker shutdown complete");
    }
}

//! Typed producer templates.

use crate::broker::Broker;
use crate::codec::{Codec, JsonCodec, StringCodec};
use broker_core::{Headers, ProducerRecord, RecordMetadata, Result};
use std::sync::Arc;

/// Text key, text value.
pub type StringTemplate = Template<StringCodec, StringCodec>;

/// Text key, JSON value.
pub type JsonTemplate<T> = Template<StringCodec, JsonCodec<T>>;

/// Sends typed keys and values through a shared broker.
pub struct Template<K: Codec, V: Codec> {
    broker: Arc<Broker>,
    key_codec: K,
    value_codec: V,
}

impl<K: Codec, V: Codec> Template<K, V> {
    pub fn new(broker: Arc<Broker>, key_codec: K, value_codec: V) -> Self {
        Self {
            broker,
            key_codec,
            value_codec,
        }
    }

    /// Sends a value; the partition is picked round-robin.
    pub fn send(&self, topic: &str, value: &V::Value) -> Result<RecordMetadata> {
        self.send_record(topic, None, None, value, Headers::new())
    }

    /// Sends a keyed value; equal keys land on the same partition.
    pub fn send_with_key(&self, topic: &str, key: &K::Value, value: &V::Value) -> Result<RecordMetadata> {
        self.send_record(topic, None, Some(key), value, Headers::new())
    }

    /// Sends a value to an explicit partition.
    pub fn send_to_partition(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&K::Value>,
        value: &V::Value,
    ) -> Result<RecordMetadata> {
        self.send_record(topic, Some(partition), key, value, Headers::new())
    }

    pub fn send_record(
        &self,
        topic: &str,
        partition: Option<i32>,
        key: Option<&K::Value>,
        value: &V::Value,
        headers: Headers,
    ) -> Result<RecordMetadata> {
        let mut record = ProducerRecord::new(topic, self.value_codec.encode(value)?);
        if let Some(key) = key {
            record = record.with_key(self.key_codec.encode(key)?);
        }
        if let Some(partition) = partition {
            record = record.with_partition(partition);
        }
        record.headers = headers;
        self.broker.produce(record)
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }
}

impl StringTemplate {
    pub fn string(broker: Arc<Broker>) -> Self {
        Self::new(broker, StringCodec, StringCodec)
    }
}

impl<T> JsonTemplate<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
{
    pub fn json(broker: Arc<Broker>) -> Self {
        Self::new(broker, StringCodec, JsonCodec::new())
    }
}

//! Key/value codecs between raw record bytes and typed payloads.

use broker_core::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

/// Converts a typed value to and from record bytes.
pub trait Codec: Send + Sync + 'static {
    type Value: Send + 'static;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>>;

    /// Fails with `MalformedPayload` on bytes that are not a valid value.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value>;
}

/// UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::malformed(format!("invalid UTF-8: {e}")))
    }
}

/// Raw bytes, passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// JSON-encoded structured values.
#[derive(Debug)]
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::malformed(format!("invalid JSON: {e}")))
    }
}

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Reduces a user value (or aux payload) to bytes and back.
///
/// Codecs are supplied at construction and run on the caller thread when
/// encoding and on the dispatcher thread when decoding, so they must be
/// `Send + Sync`. Failures are reported through `anyhow` and wrapped into the
/// engine's error taxonomy at the boundary.
pub trait ByteCodec<T>: Send + Sync {
    fn to_bytes(&self, value: &T) -> Result<Vec<u8>>;
    fn from_bytes(&self, bytes: &[u8]) -> Result<T>;
}

/// A codec whose value type additionally knows how to fold an incoming value
/// into an existing one. Required only when the caller uses `append_update`.
pub trait AppendCodec<T>: ByteCodec<T> {
    fn merge(&self, existing: T, incoming: T) -> Result<T>;
}

/// Identity codec for raw byte payloads. Appending concatenates.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawBytesCodec;

impl ByteCodec<Vec<u8>> for RawBytesCodec {
    fn to_bytes(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }
    fn from_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

impl AppendCodec<Vec<u8>> for RawBytesCodec {
    fn merge(&self, mut existing: Vec<u8>, incoming: Vec<u8>) -> Result<Vec<u8>> {
        existing.extend_from_slice(&incoming);
        Ok(existing)
    }
}

/// UTF-8 string codec. Appending concatenates.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Codec;

impl ByteCodec<String> for Utf8Codec {
    fn to_bytes(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }
    fn from_bytes(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).context("value is not valid utf-8")
    }
}

impl AppendCodec<String> for Utf8Codec {
    fn merge(&self, mut existing: String, incoming: String) -> Result<String> {
        existing.push_str(&incoming);
        Ok(existing)
    }
}

/// Serde adapter: any `Serialize + DeserializeOwned` type rides as JSON.
///
/// Handy for structured aux payloads and for tests; callers that care about
/// wire size should bring their own codec instead.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
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

impl<T> ByteCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn to_bytes(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).context("json encode")
    }
    fn from_bytes(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).context("json decode")
    }
}

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

/// Turns a single list item into the bytes of its spill file and back.
///
/// Implementations must round-trip: `decode(encode(x))` is `x` for every value
/// the list is asked to store.
pub trait Codec<T>: Send + Sync {
    /// File extension used for spilled records, without the leading dot.
    fn extension(&self) -> &str;

    fn encode(&self, item: &T) -> anyhow::Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<T>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn extension(&self) -> &str {
        "json"
    }

    fn encode(&self, item: &T) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(item)?)
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Adapts a pair of closures into a [`Codec`], for item types that have their
/// own ad-hoc representation.
pub struct FnCodec<T, E, D> {
    extension: String,
    encode: E,
    decode: D,
    _marker: PhantomData<fn() -> T>,
}

impl<T, E, D> FnCodec<T, E, D>
where
    E: Fn(&T) -> anyhow::Result<Vec<u8>> + Send + Sync,
    D: Fn(&[u8]) -> anyhow::Result<T> + Send + Sync,
{
    pub fn new(extension: impl Into<String>, encode: E, decode: D) -> Self {
        FnCodec {
            extension: extension.into(),
            encode,
            decode,
            _marker: PhantomData,
        }
    }
}

impl<T, E, D> Codec<T> for FnCodec<T, E, D>
where
    E: Fn(&T) -> anyhow::Result<Vec<u8>> + Send + Sync,
    D: Fn(&[u8]) -> anyhow::Result<T> + Send + Sync,
{
    fn extension(&self) -> &str {
        &self.extension
    }

    fn encode(&self, item: &T) -> anyhow::Result<Vec<u8>> {
        (self.encode)(item)
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<T> {
        (self.decode)(bytes)
    }
}

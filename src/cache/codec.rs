//! Blob Codecs
//!
//! A codec turns the bytes stored on disk (or fetched from the origin) into
//! the value handed to callers, and back.
//!
//! # Example
//!
//! ```
//! use tiercache::cache::{BlobCodec, JsonCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Card { name: String, hp: u32 }
//!
//! let codec = JsonCodec::<Card>::new();
//! let card = codec.decode(br#"{"name":"Pikachu","hp":60}"#).unwrap();
//! assert_eq!(card.hp, 60);
//!
//! let bytes = codec.encode(&card).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), card);
//! ```

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Converts between stored bytes and decoded values
pub trait BlobCodec: Send + Sync + 'static {
    /// Decoded value kept in the memory tier and returned to callers
    type Value: Clone + Send + Sync + 'static;

    /// Codec name for logs and errors
    fn name(&self) -> &'static str;

    /// Decode stored or fetched bytes
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value>;

    /// Encode a value for the disk tier
    fn encode(&self, value: &Self::Value) -> Result<Bytes>;
}

// =============================================================================
// Raw Codec
// =============================================================================

/// Pass-through codec: values are the raw bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl BlobCodec for RawCodec {
    type Value = Bytes;

    fn name(&self) -> &'static str {
        "raw"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }
}

// =============================================================================
// JSON Codec
// =============================================================================

/// serde JSON documents; malformed payloads fail to decode
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a JSON codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
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

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> BlobCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Value = T;

    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::codec(self.name(), e))
    }

    fn encode(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::codec(self.name(), e))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Card {
        name: String,
        hp: u32,
    }

    #[test]
    fn test_raw_codec_identity() {
        let codec = RawCodec;
        let value = codec.decode(b"\x89PNG").unwrap();
        assert_eq!(value.as_ref(), b"\x89PNG");
        assert_eq!(codec.encode(&value).unwrap(), value);
    }

    #[test]
    fn test_json_codec_decode() {
        let codec = JsonCodec::<Card>::new();
        let card = codec.decode(br#"{"name":"Eevee","hp":50}"#).unwrap();
        assert_eq!(
            card,
            Card {
                name: "Eevee".into(),
                hp: 50
            }
        );
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec::<Card>::new();
        let err = codec.decode(b"<html>502</html>").unwrap_err();
        assert_matches!(err, Error::Codec { ref codec, .. } if codec == "json");
    }
}

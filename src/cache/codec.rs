//! Value codecs for byte-oriented backends
//!
//! The memory backend keeps `serde_json::Value`s as they are. The file and
//! Redis backends store bytes and go through a `ValueCodec`, which callers
//! can replace with their own implementation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use super::error::CacheError;

/// Encoder/decoder pair turning cached values into bytes and back
pub trait ValueCodec: Send + Sync + Debug {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Bytes, CacheError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CacheError>;
}

/// Built-in codec selection used in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Json,
    #[serde(alias = "msgpack")]
    MessagePack,
    #[serde(alias = "str")]
    Text,
}

/// Codec for a built-in serializer kind
pub fn default_serializer(kind: SerializerKind) -> Arc<dyn ValueCodec> {
    match kind {
        SerializerKind::Json => Arc::new(JsonCodec),
        SerializerKind::MessagePack => Arc::new(MessagePackCodec),
        SerializerKind::Text => Arc::new(TextCodec),
    }
}

/// JSON text, the default encoding
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CacheError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary encoding using MessagePack
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackCodec;

impl ValueCodec for MessagePackCodec {
    fn name(&self) -> &'static str {
        "messagepack"
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CacheError> {
        Ok(Bytes::from(rmp_serde::to_vec(value)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CacheError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Integer counter in the form Redis INCRBY reads and writes
pub fn encode_native_integer(value: &Value) -> Option<Bytes> {
    value.as_i64().map(|n| Bytes::from(n.to_string()))
}

/// Parse a canonical decimal integer (`-?[0-9]+`, no padding or sign noise)
pub fn parse_native_integer(bytes: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(bytes).ok()?;
    let value: i64 = text.parse().ok()?;
    (value.to_string() == text).then_some(value)
}

/// Plain text: strings are stored raw, other values as their JSON text.
/// Canonical integers decode as numbers, everything else as a string.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl ValueCodec for TextCodec {
    fn name(&self) -> &'static str {
        "text"
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CacheError> {
        match value {
            Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            other => Ok(Bytes::from(other.to_string())),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CacheError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CacheError::Serialization(format!("stored text is not UTF-8: {}", e)))?;
        match parse_native_integer(bytes) {
            Some(n) => Ok(Value::from(n)),
            None => Ok(Value::String(text.to_string())),
        }
    }
}

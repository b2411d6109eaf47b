//! Values flowing through a slot's hook pipeline.

use std::borrow::Cow;

use bytes::Bytes;
use serde_json::Value;

/// The result held by a slot.
///
/// Starts as the raw response payload and is replaced by each transform or
/// finisher hook in turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    /// Raw payload bytes, exactly as received.
    Raw(Bytes),
    /// Structured value produced by a hook (or given to `emulate`).
    Json(Value),
}

impl SlotValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(bytes) => Some(&bytes[..]),
            Self::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Integer view: a JSON number, or raw text holding one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Json(value) => value.as_i64(),
            Self::Raw(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        }
    }

    /// Text view; JSON values are serialized.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Raw(bytes) => String::from_utf8_lossy(bytes),
            Self::Json(Value::String(text)) => Cow::Borrowed(text.as_str()),
            Self::Json(value) => Cow::Owned(value.to_string()),
        }
    }

    /// Byte view; JSON values are serialized.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Raw(bytes) => bytes.clone(),
            Self::Json(Value::String(text)) => Bytes::from(text.clone()),
            Self::Json(value) => Bytes::from(value.to_string()),
        }
    }

    /// Parse raw payloads as JSON; structured values pass through.
    pub fn into_json(self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Raw(bytes) => serde_json::from_slice(&bytes),
            Self::Json(value) => Ok(value),
        }
    }
}

impl Default for SlotValue {
    fn default() -> Self {
        Self::Raw(Bytes::new())
    }
}

impl From<Bytes> for SlotValue {
    fn from(bytes: Bytes) -> Self {
        Self::Raw(bytes)
    }
}

impl From<Vec<u8>> for SlotValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(Bytes::from(bytes))
    }
}

impl From<&'static str> for SlotValue {
    fn from(text: &'static str) -> Self {
        Self::Raw(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for SlotValue {
    fn from(text: String) -> Self {
        Self::Raw(Bytes::from(text))
    }
}

impl From<Value> for SlotValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<i64> for SlotValue {
    fn from(number: i64) -> Self {
        Self::Json(Value::from(number))
    }
}

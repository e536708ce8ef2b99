//! Stored Values and Expiry
//!
//! An [`Entry`] is what the engine keeps per key: a [`Value`] plus an
//! [`Expiry`]. Values are either opaque byte strings or structured JSON
//! documents. A JSON document keeps the exact text the client sent so that
//! `GET` returns it unchanged, alongside the parsed tree.

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Wall-clock time (rather than `Instant`) is used so that expiry times
/// written to the append-only log stay meaningful across restarts.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Tag describing how a value is serialized to the wire and to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Json,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Json => "json",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ValueKind::String),
            "json" => Ok(ValueKind::Json),
            other => Err(format!("unknown value kind '{}'", other)),
        }
    }
}

/// A parsed JSON document together with its original text.
#[derive(Debug, PartialEq)]
pub struct JsonDocument {
    raw: Bytes,
    tree: serde_json::Value,
}

impl JsonDocument {
    /// The text exactly as it was stored.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn tree(&self) -> &serde_json::Value {
        &self.tree
    }
}

/// A value held by the store.
///
/// Cloning is cheap: strings share their `Bytes` buffer and documents are
/// reference counted.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Bytes),
    Json(Arc<JsonDocument>),
}

impl Value {
    /// Parses `text` as JSON, keeping the original bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use ledgerkv::storage::{Value, ValueKind};
    ///
    /// let value = Value::parse_json("{\"x\":1}").unwrap();
    /// assert_eq!(value.kind(), ValueKind::Json);
    /// assert!(Value::parse_json("not json").is_err());
    /// ```
    pub fn parse_json(text: impl Into<Bytes>) -> Result<Self, serde_json::Error> {
        let raw = text.into();
        let tree = serde_json::from_slice(&raw)?;
        Ok(Value::Json(Arc::new(JsonDocument { raw, tree })))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Json(_) => ValueKind::Json,
        }
    }

    /// The textual encoding returned by `GET` and written to the log.
    pub fn as_bytes(&self) -> &Bytes {
        match self {
            Value::String(b) => b,
            Value::Json(doc) => doc.raw(),
        }
    }

    /// Approximate number of bytes held by this value.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::String(b)
    }
}

impl From<&'static str> for Value {
    fn from(s: &'static str) -> Self {
        Value::String(Bytes::from_static(s.as_bytes()))
    }
}

/// When an entry stops being visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    /// Unix time in milliseconds
    At(u64),
}

impl Expiry {
    /// Expiry for a value written at `now_ms` with an optional TTL.
    pub fn from_ttl(now_ms: u64, ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => {
                let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                Expiry::At(now_ms.saturating_add(ttl_ms))
            }
            None => Expiry::Never,
        }
    }

    /// An entry is expired strictly after its expiry time.
    #[inline]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => now_ms > *at,
        }
    }

    /// Remaining lifetime at `now_ms`, or `None` if the entry never expires.
    pub fn remaining(&self, now_ms: u64) -> Option<Duration> {
        match self {
            Expiry::Never => None,
            Expiry::At(at) => Some(Duration::from_millis(at.saturating_sub(now_ms))),
        }
    }
}

/// The record kept for one key.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expiry: Expiry,
}

impl Entry {
    pub fn new(value: Value, expiry: Expiry) -> Self {
        Self { value, expiry }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expiry.is_expired_at(now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keeps_original_text() {
        let value = Value::parse_json("{ \"x\" : 1 }").unwrap();
        assert_eq!(value.as_bytes(), &Bytes::from("{ \"x\" : 1 }"));
        match value {
            Value::Json(doc) => assert_eq!(doc.tree()["x"], 1),
            Value::String(_) => panic!("expected a JSON value"),
        }
    }

    #[test]
    fn test_json_rejects_invalid_text() {
        assert!(Value::parse_json("not json").is_err());
        assert!(Value::parse_json("{\"x\":").is_err());
    }

    #[test]
    fn test_kind_round_trips_through_text() {
        for kind in [ValueKind::String, ValueKind::Json] {
            assert_eq!(kind.as_str().parse::<ValueKind>(), Ok(kind));
        }
        assert!("list".parse::<ValueKind>().is_err());
    }

    #[test]
    fn test_expiry_is_strictly_after() {
        let expiry = Expiry::At(1_000);
        assert!(!expiry.is_expired_at(999));
        assert!(!expiry.is_expired_at(1_000));
        assert!(expiry.is_expired_at(1_001));
        assert!(!Expiry::Never.is_expired_at(u64::MAX));
    }

    #[test]
    fn test_expiry_from_ttl() {
        assert_eq!(
            Expiry::from_ttl(5_000, Some(Duration::from_secs(2))),
            Expiry::At(7_000)
        );
        assert_eq!(Expiry::from_ttl(5_000, None), Expiry::Never);
        assert_eq!(
            Expiry::At(7_000).remaining(6_500),
            Some(Duration::from_millis(500))
        );
        assert_eq!(Expiry::At(7_000).remaining(8_000), Some(Duration::ZERO));
    }
}

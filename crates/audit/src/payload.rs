use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Arbitrary request/response content as it reaches the audit pipeline.
///
/// Wider than JSON: callers may hand over timestamps, raw bytes and
/// non-finite floats, which the redaction engine renders into bounded JSON.
/// Object entries keep insertion order.
///
/// Serde goes through `serde_json::Value`. The conversion into JSON is lossy
/// in the same way the redaction engine is: timestamps become ISO-8601
/// strings, bytes become `"[bytes]"`, non-finite floats become
/// `"[non-finite-number]"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Array(Vec<Payload>),
    Object(Vec<(String, Payload)>),
}

impl Payload {
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Payload>,
    {
        Self::Array(items.into_iter().collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

pub(crate) fn iso_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// JSON numbers for floats that are whole and safely representable collapse to
/// integers, so `1.0` and `1` serialize identically.
pub(crate) fn number_value(n: f64) -> Option<Value> {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return Some(Value::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number)
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(b),
            Payload::Int(i) => Value::from(i),
            Payload::Float(f) => number_value(f).unwrap_or_else(|| Value::String("[non-finite-number]".into())),
            Payload::String(s) => Value::String(s),
            Payload::Timestamp(at) => Value::String(iso_timestamp(&at)),
            Payload::Bytes(_) => Value::String("[bytes]".into()),
            Payload::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Payload::Object(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k, Value::from(v));
                }
                Value::Object(map)
            }
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<DateTime<Utc>> for Payload {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

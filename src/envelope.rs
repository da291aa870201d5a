//! Versioned message envelope and its schema-light value type.
//!
//! Every message exchanged with the server is a map of string keys to
//! [`Value`]s that carries the protocol-version tag [`PROTOCOL_VERSION_TAG`].
//! The codecs only move this generic structure; business content is read by
//! the session through typed accessors.
//!
//! # Example
//!
//! ```
//! use inferlink_client::envelope::{Envelope, Value, CURRENT_PROTOCOL_VERSION};
//!
//! let mut env = Envelope::with_op("modelzoo");
//! assert!(env.version().is_none());
//!
//! env.ensure_version();
//! assert_eq!(env.version(), Some(CURRENT_PROTOCOL_VERSION));
//! assert_eq!(env.get("op"), Some(&Value::from("modelzoo")));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::{ClientError, Result};

/// Key of the protocol-version field.
pub const PROTOCOL_VERSION_TAG: &str = "VERSION";

/// Protocol version stamped on outgoing envelopes.
pub const CURRENT_PROTOCOL_VERSION: i64 = 4;

/// Oldest server protocol version this client talks to.
pub const MIN_COMPATIBLE_PROTOCOL_VERSION: i64 = 4;

/// Key of the command opcode field.
pub const OP_TAG: &str = "op";

/// Key of the application-level success flag.
pub const SUCCESS_TAG: &str = "success";

/// Key of the server-supplied error message.
pub const MESSAGE_TAG: &str = "msg";

/// Tagged union of everything an envelope field can hold.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// Unsigned values above `i64::MAX`.
    UInt(u64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::UInt(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }
}

macro_rules! value_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Int(n as i64)
            }
        })*
    };
}

value_from_signed!(i8, i16, i32, i64);

macro_rules! value_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                let n = n as u64;
                match i64::try_from(n) {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::UInt(n),
                }
            }
        })*
    };
}

value_from_unsigned!(u8, u16, u32, u64, usize);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::UInt(u) => serde_json::Value::from(u),
            Value::Float(f) => serde_json::Value::from(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::Binary(b) => serde_json::Value::from(b),
            Value::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(m) => serde_json::Value::Object(
                m.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Binary(b) => serializer.serialize_bytes(b),
            Value::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for item in a {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any envelope value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Value, E> {
        Ok(Value::Binary(v.to_vec()))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<Value, E> {
        Ok(Value::Binary(v))
    }

    fn visit_none<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            entries.insert(k, v);
        }
        Ok(Value::Map(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// A versioned structured message.
///
/// Constructed per call and discarded after use. Serializes as a plain map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    fields: BTreeMap<String, Value>,
}

impl Envelope {
    /// Empty envelope (no version tag yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelope carrying a command opcode.
    pub fn with_op(op: &str) -> Self {
        let mut env = Self::new();
        env.insert(OP_TAG, op);
        env
    }

    /// Builder-style insert.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// The command opcode, if any.
    pub fn op(&self) -> Option<&str> {
        self.get(OP_TAG).and_then(Value::as_str)
    }

    /// The protocol version, if tagged.
    pub fn version(&self) -> Option<i64> {
        self.get(PROTOCOL_VERSION_TAG).and_then(Value::as_i64)
    }

    /// Stamp the current protocol version unless a version is already present.
    pub fn ensure_version(&mut self) {
        if !self.contains(PROTOCOL_VERSION_TAG) {
            self.insert(PROTOCOL_VERSION_TAG, CURRENT_PROTOCOL_VERSION);
        }
    }

    /// Convert a decoded value into an envelope. Only maps qualify.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Map(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Map(self.fields)
    }

    /// Server error text when the envelope reports `success: false`.
    ///
    /// A missing `msg` yields `"unspecified error"`.
    pub fn error_message(&self) -> Option<String> {
        match self.get(SUCCESS_TAG) {
            Some(Value::Bool(false)) => Some(
                self.get(MESSAGE_TAG)
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified error")
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Fail with [`ClientError::Operation`] when the server reported failure.
    ///
    /// `source` names the calling operation and prefixes the message.
    pub fn check_success(&self, source: &str) -> Result<()> {
        match self.error_message() {
            None => Ok(()),
            Some(msg) if source.is_empty() => Err(ClientError::Operation(msg)),
            Some(msg) => Err(ClientError::Operation(format!("{}: {}", source, msg))),
        }
    }

    /// Fail with [`ClientError::Protocol`] when the version tag is missing or too old.
    ///
    /// `endpoint` names the server in the error message.
    pub fn check_version(&self, endpoint: &str) -> Result<()> {
        match self.get(PROTOCOL_VERSION_TAG) {
            None => Err(ClientError::Protocol(format!(
                "protocol version data is missing in response from server '{}'. \
                 Please upgrade the server instance to a newer one.",
                endpoint
            ))),
            Some(v) => match v.as_i64() {
                Some(ver) if ver >= MIN_COMPATIBLE_PROTOCOL_VERSION => Ok(()),
                _ => Err(ClientError::Protocol(format!(
                    "server '{}' speaks protocol version {:?}, minimum supported is {}. \
                     Please upgrade the server instance to a newer one.",
                    endpoint, v, MIN_COMPATIBLE_PROTOCOL_VERSION
                ))),
            },
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Map(fields) => Ok(Self { fields }),
            _ => Err(de::Error::custom("envelope must be a map")),
        }
    }
}

impl From<BTreeMap<String, Value>> for Envelope {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

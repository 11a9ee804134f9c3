//! Dynamic JSON tree shared by tool-call parameters and provider metadata.
//!
//! Unlike `serde_json::Value`, integers and doubles are kept distinct so that
//! JSON-Schema `integer` vs `number` distinctions survive a round trip, and
//! the type is structurally hashable so parameter maps can be compared and
//! deduplicated.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Recursive tagged JSON variant.
///
/// Objects are ordered maps so that encoding is deterministic and the type
/// can implement [`Hash`]. Conversion with `serde_json::Value` is loss-free:
/// JSON integers in `i64` range stay [`Value::Int`], anything fractional or
/// out of range becomes [`Value::Double`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Reserved object key carrying the partial-JSON byte buffer on an
    /// in-flight tool-use input. Stripped when projecting parameters.
    pub const JSON_BUFFER_KEY: &'static str = "_jsonBuf";

    /// Creates an empty object value.
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Coerces to an integer.
    ///
    /// Strict mode accepts only [`Value::Int`]. Lossy mode additionally
    /// accepts exactly-representable doubles, parseable strings, and bools.
    /// Failing cases return `None` rather than erroring.
    ///
    /// # Examples
    ///
    /// ```
    /// use hashi::value::Value;
    ///
    /// assert_eq!(Value::Int(3).to_int(true), Some(3));
    /// assert_eq!(Value::Double(3.0).to_int(false), Some(3));
    /// assert_eq!(Value::Double(3.5).to_int(false), None);
    /// assert_eq!(Value::String("42".into()).to_int(false), Some(42));
    /// assert_eq!(Value::String("42".into()).to_int(true), None);
    /// ```
    pub fn to_int(&self, strict: bool) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ if strict => None,
            Self::Double(v) if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 => {
                Some(*v as i64)
            }
            Self::String(s) => s.trim().parse().ok(),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Coerces to a double; lossy mode accepts ints, parseable strings, and bools.
    pub fn to_double(&self, strict: bool) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ if strict => None,
            Self::Int(v) => Some(*v as f64),
            Self::String(s) => s.trim().parse().ok(),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Coerces to a bool; lossy mode accepts 0/1 ints and true/false strings.
    pub fn to_bool(&self, strict: bool) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ if strict => None,
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            Self::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Coerces to text; lossy mode renders scalars with their canonical form.
    pub fn to_text(&self, strict: bool) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            _ if strict => None,
            Self::Int(v) => Some(v.to_string()),
            Self::Double(v) => Some(v.to_string()),
            Self::Bool(v) => Some(v.to_string()),
            _ => None,
        }
    }

    /// Returns the string slice for string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the object map for object values.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Encodes to the canonical shortest JSON byte form.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_json()).unwrap_or_default()
    }

    /// Parses a value from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<serde_json::Value>(bytes).map(Self::from_json)
    }

    /// Converts from the host-native `serde_json` form.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts into the host-native `serde_json` form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Double(d) => {
                serde_json::Number::from_f64(*d).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Drops internal (`_`-prefixed) bookkeeping keys from a parameter map,
/// returning the caller-visible projection.
pub fn strip_internal(params: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    params
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            // Doubles hash by bit pattern so structural equality and hashing agree.
            Self::Double(d) => d.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Array(items) => items.hash(state),
            Self::Object(map) => map.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Object(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::from_json(value)
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Double(d) => serializer.serialize_f64(*d),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(map) => {
                let mut obj = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    obj.serialize_entry(key, value)?;
                }
                obj.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("any JSON value")
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Int(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Value, E> {
                Ok(i64::try_from(v).map_or(Value::Double(v as f64), Value::Int))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Double(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::String(v.to_string()))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::String(v))
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
                Deserialize::deserialize(deserializer)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Value::Array(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
                let mut object = BTreeMap::new();
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    object.insert(key, value);
                }
                Ok(Value::Object(object))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

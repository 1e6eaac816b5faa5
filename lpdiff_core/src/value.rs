use crate::binary::Bytes;
use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use std::borrow::Cow;
use std::fmt;

/// Text used for a NaN float in serialized form.
const NAN_TEXT: &str = "NaN";
/// Text used for an infinite float in serialized form. The sign is not kept.
const INF_TEXT: &str = "Inf";

/// The kind of scalar a [`Value`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Int,
    Uint,
    Float,
    Bool,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Int => "int",
            ValueKind::Uint => "uint",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line-protocol field value.
///
/// Numeric kinds share a single 64-bit slot; only strings carry a byte
/// payload. Equality compares the kind, the raw numeric bits and the bytes,
/// so two NaN floats are equal to each other.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Value {
    kind: ValueKind,
    number: u64,
    bytes: Bytes,
}

impl Value {
    fn numeric(kind: ValueKind, number: u64) -> Self {
        Value {
            kind,
            number,
            bytes: Bytes::default(),
        }
    }

    pub fn int(x: i64) -> Self {
        Value::numeric(ValueKind::Int, x as u64)
    }

    pub fn uint(x: u64) -> Self {
        Value::numeric(ValueKind::Uint, x)
    }

    /// Every NaN is stored with the same bit pattern.
    pub fn float(x: f64) -> Self {
        let bits = if x.is_nan() { f64::NAN.to_bits() } else { x.to_bits() };
        Value::numeric(ValueKind::Float, bits)
    }

    pub fn bool(x: bool) -> Self {
        Value::numeric(ValueKind::Bool, u64::from(x))
    }

    pub fn string(x: impl Into<Bytes>) -> Self {
        Value {
            kind: ValueKind::String,
            number: 0,
            bytes: x.into(),
        }
    }

    /// Builds a value from a dynamically typed scalar.
    ///
    /// Accepts `i64`, `u64`, `f64`, `bool`, `String`, `&'static str`,
    /// `Vec<u8>` and [`Bytes`]. Returns `None` for anything else.
    pub fn new(x: &dyn Any) -> Option<Self> {
        if let Some(v) = x.downcast_ref::<i64>() {
            Some(Value::int(*v))
        } else if let Some(v) = x.downcast_ref::<u64>() {
            Some(Value::uint(*v))
        } else if let Some(v) = x.downcast_ref::<f64>() {
            Some(Value::float(*v))
        } else if let Some(v) = x.downcast_ref::<bool>() {
            Some(Value::bool(*v))
        } else if let Some(v) = x.downcast_ref::<String>() {
            Some(Value::string(v.as_str()))
        } else if let Some(v) = x.downcast_ref::<&'static str>() {
            Some(Value::string(*v))
        } else if let Some(v) = x.downcast_ref::<Vec<u8>>() {
            Some(Value::string(v.as_slice()))
        } else {
            x.downcast_ref::<Bytes>().map(|v| Value::string(v.clone()))
        }
    }

    /// Like [`Value::new`] but panics on an unsupported type. Only for callers
    /// that have already checked the input domain.
    pub fn must_new(x: &dyn Any) -> Self {
        match Value::new(x) {
            Some(v) => v,
            None => panic!("invalid value for Value::new: unsupported type {:?}", x.type_id()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    fn must_be(&self, kind: ValueKind) {
        if self.kind != kind {
            panic!("value has unexpected kind; got {} want {}", self.kind, kind);
        }
    }

    pub fn int_v(&self) -> i64 {
        self.must_be(ValueKind::Int);
        self.number as i64
    }

    pub fn uint_v(&self) -> u64 {
        self.must_be(ValueKind::Uint);
        self.number
    }

    pub fn float_v(&self) -> f64 {
        self.must_be(ValueKind::Float);
        f64::from_bits(self.number)
    }

    pub fn bool_v(&self) -> bool {
        self.must_be(ValueKind::Bool);
        self.number != 0
    }

    pub fn bytes_v(&self) -> &[u8] {
        self.must_be(ValueKind::String);
        self.bytes.as_slice()
    }

    /// The string payload, with invalid UTF-8 replaced.
    pub fn string_v(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.bytes_v())
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Value::int(x)
    }
}

impl From<u64> for Value {
    fn from(x: u64) -> Self {
        Value::uint(x)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::float(x)
    }
}

impl From<bool> for Value {
    fn from(x: bool) -> Self {
        Value::bool(x)
    }
}

impl From<&str> for Value {
    fn from(x: &str) -> Self {
        Value::string(x)
    }
}

impl From<String> for Value {
    fn from(x: String) -> Self {
        Value::string(x)
    }
}

impl From<&[u8]> for Value {
    fn from(x: &[u8]) -> Self {
        Value::string(x)
    }
}

impl From<Vec<u8>> for Value {
    fn from(x: Vec<u8>) -> Self {
        Value::string(x)
    }
}

impl From<Bytes> for Value {
    fn from(x: Bytes) -> Self {
        Value::string(x)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ValueKind::String => write!(f, "String({:?})", self.bytes),
            ValueKind::Int => write!(f, "Int({})", self.int_v()),
            ValueKind::Uint => write!(f, "Uint({})", self.uint_v()),
            ValueKind::Float => write!(f, "Float({:?})", self.float_v()),
            ValueKind::Bool => write!(f, "Bool({})", self.bool_v()),
        }
    }
}

/// Renders the value the way it is written in a line-protocol field.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ValueKind::Float => write!(f, "{}", self.float_v()),
            ValueKind::Int => write!(f, "{}i", self.int_v()),
            ValueKind::Uint => write!(f, "{}u", self.uint_v()),
            ValueKind::Bool => write!(f, "{}", self.bool_v()),
            ValueKind::String => write!(f, "{:?}", self.string_v()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Value", 2)?;
        state.serialize_field("type", &self.kind)?;
        match self.kind {
            ValueKind::String => state.serialize_field("value", &self.bytes)?,
            ValueKind::Int => state.serialize_field("value", &self.int_v())?,
            ValueKind::Uint => state.serialize_field("value", &self.uint_v())?,
            ValueKind::Bool => state.serialize_field("value", &self.bool_v())?,
            ValueKind::Float => {
                let x = self.float_v();
                if x.is_nan() {
                    state.serialize_field("value", NAN_TEXT)?
                } else if x.is_infinite() {
                    state.serialize_field("value", INF_TEXT)?
                } else {
                    state.serialize_field("value", &x)?
                }
            }
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct EncodedValue {
    #[serde(rename = "type")]
    kind: ValueKind,
    value: serde_yaml::Value,
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let EncodedValue { kind, value } = EncodedValue::deserialize(deserializer)?;
        match (kind, value) {
            (ValueKind::String, node) => Bytes::from_yaml::<D::Error>(node).map(Value::string),
            (ValueKind::Int, serde_yaml::Value::Number(n)) => match n.as_i64() {
                Some(x) => Ok(Value::int(x)),
                None if n.is_f64() => Ok(Value::int(n.as_f64().unwrap_or_default() as i64)),
                None => Err(D::Error::custom(format!("int value {n} out of range"))),
            },
            (ValueKind::Uint, serde_yaml::Value::Number(n)) => match n.as_u64() {
                Some(x) => Ok(Value::uint(x)),
                None if n.is_f64() => Ok(Value::uint(n.as_f64().unwrap_or_default() as u64)),
                None => Err(D::Error::custom(format!("uint value {n} out of range"))),
            },
            (ValueKind::Float, serde_yaml::Value::Number(n)) => n
                .as_f64()
                .map(Value::float)
                .ok_or_else(|| D::Error::custom(format!("float value {n} out of range"))),
            (ValueKind::Float, serde_yaml::Value::String(s)) => match s.as_str() {
                NAN_TEXT => Ok(Value::float(f64::NAN)),
                INF_TEXT => Ok(Value::float(f64::INFINITY)),
                _ => Err(D::Error::custom(format!(
                    "unknown string value for float {s:?} (need {NAN_TEXT} or {INF_TEXT})"
                ))),
            },
            (ValueKind::Bool, serde_yaml::Value::Bool(b)) => Ok(Value::bool(b)),
            (kind, other) => Err(D::Error::custom(format!(
                "unexpected value for {kind}: {other:?}"
            ))),
        }
    }
}

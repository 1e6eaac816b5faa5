use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::value::{Tag, TaggedValue};
use std::fmt;
use std::ops::Deref;

/// Tag attached to byte strings that cannot travel as plain YAML text.
const BINARY_TAG: &str = "binary";

/// Spellings of the binary tag accepted on input. Local (`!binary`),
/// shorthand core (`!!binary`) and fully resolved core tags all mean the same.
const BINARY_TAG_FORMS: [&str; 3] = ["!binary", "!!binary", "!tag:yaml.org,2002:binary"];

/// A byte string that survives a round trip through text formats.
///
/// Valid UTF-8 without NUL bytes is written as a plain string. Anything else
/// is written as base64 under an explicit binary tag, so the exact bytes come
/// back on the way in.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes(Vec<u8>);

impl Bytes {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Bytes(data.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    /// Returns the contents as text when they can be serialized as plain text.
    pub fn as_text(&self) -> Option<&str> {
        if self.0.contains(&0) {
            return None;
        }
        std::str::from_utf8(&self.0).ok()
    }

    /// Reports whether serialization will use the tagged base64 form.
    pub fn is_binary(&self) -> bool {
        self.as_text().is_none()
    }

    pub(crate) fn from_yaml<E: serde::de::Error>(node: serde_yaml::Value) -> Result<Self, E> {
        match node {
            serde_yaml::Value::String(s) => Ok(Bytes(s.into_bytes())),
            serde_yaml::Value::Number(n) => Ok(Bytes(n.to_string().into_bytes())),
            serde_yaml::Value::Bool(b) => Ok(Bytes(b.to_string().into_bytes())),
            serde_yaml::Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                if !BINARY_TAG_FORMS.contains(&tag.as_str()) {
                    return Err(E::custom(format!("cannot unmarshal {tag} value into bytes")));
                }
                let TaggedValue { value, .. } = *tagged;
                let encoded = match value {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    other => {
                        return Err(E::custom(format!(
                            "binary-tagged value must be a string, got {other:?}"
                        )));
                    }
                };
                // Block scalars may carry line breaks inside the base64 text.
                let compact: String = encoded.split_whitespace().collect();
                STANDARD.decode(compact).map(Bytes).map_err(|e| {
                    E::custom(format!("invalid base64 value in binary-tagged value: {e}"))
                })
            }
            other => Err(E::custom(format!("cannot unmarshal {other:?} into bytes"))),
        }
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_text() {
            Some(text) => serializer.serialize_str(text),
            None => {
                let node = serde_yaml::Value::Tagged(Box::new(TaggedValue {
                    tag: Tag::new(BINARY_TAG),
                    value: serde_yaml::Value::String(STANDARD.encode(&self.0)),
                }));
                node.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let node = serde_yaml::Value::deserialize(deserializer)?;
        Bytes::from_yaml::<D::Error>(node)
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"{}\"", self.0.escape_ascii())
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(data: Vec<u8>) -> Self {
        Bytes(data)
    }
}

impl From<&[u8]> for Bytes {
    fn from(data: &[u8]) -> Self {
        Bytes(data.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Bytes {
    fn from(data: &[u8; N]) -> Self {
        Bytes(data.to_vec())
    }
}

impl From<&str> for Bytes {
    fn from(text: &str) -> Self {
        Bytes(text.as_bytes().to_vec())
    }
}

impl From<String> for Bytes {
    fn from(text: String) -> Self {
        Bytes(text.into_bytes())
    }
}

use crate::binary::Bytes;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One decoded line-protocol point.
///
/// Tags and fields keep the order the codec produced them in; duplicate keys
/// are kept as they are.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metric {
    pub time: i64,
    pub name: Bytes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub key: Bytes,
    pub value: Value,
}

impl Metric {
    pub fn new(name: impl Into<Bytes>, time: i64) -> Self {
        Metric {
            time,
            name: name.into(),
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.tags.push(Tag {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_field(mut self, key: impl Into<Bytes>, value: impl Into<Value>) -> Self {
        self.fields.push(Field {
            key: key.into(),
            value: value.into(),
        });
        self
    }
}

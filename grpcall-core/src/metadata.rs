use base64ct::{Base64, Encoding as _};
use bytes::Bytes;

use crate::descriptor::{self, MetadataDescriptor};

pub const BINARY_SUFFIX: &str = "-bin";

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    #[error("binary value for non-binary metadata key '{0}'")]
    BinaryValueForTextKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Text(String),
    Binary(Bytes),
}

impl MetadataValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(v) => v.as_bytes(),
            Self::Binary(v) => v,
        }
    }

    /// Wire form: text as-is, binary as standard base64.
    #[must_use]
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Text(v) => v.clone(),
            Self::Binary(v) => Base64::encode_string(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Bytes> for MetadataValue {
    fn from(v: Bytes) -> Self {
        Self::Binary(v)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

impl From<&[u8]> for MetadataValue {
    fn from(v: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(v))
    }
}

impl PartialEq<&str> for MetadataValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

#[must_use]
pub fn is_binary_key(key: &str) -> bool {
    key.ends_with(BINARY_SUFFIX)
}

fn normalize_key(key: &str) -> Result<String> {
    let key = key.to_ascii_lowercase();
    let valid = !key.is_empty()
        && key.bytes().all(|b| {
            b.is_ascii_digit() || b.is_ascii_lowercase() || matches!(b, b'-' | b'_' | b'.')
        });
    if valid {
        Ok(key)
    } else {
        Err(MetadataError::InvalidKey(key))
    }
}

fn coerce_value(key: &str, value: MetadataValue) -> Result<MetadataValue> {
    match (is_binary_key(key), value) {
        (true, MetadataValue::Text(v)) => Ok(MetadataValue::Binary(Bytes::from(v.into_bytes()))),
        (false, MetadataValue::Binary(_)) => {
            Err(MetadataError::BinaryValueForTextKey(key.to_string()))
        }
        (_, v) => Ok(v),
    }
}

/// Case-insensitive, multi-valued RPC headers.
///
/// Keys are folded to lowercase and kept in first-insertion order; values for one key keep
/// their insertion order. Keys ending in `-bin` always hold binary values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, Vec<MetadataValue>)>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs using `add` semantics.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<MetadataValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut md = Self::new();
        for (k, v) in pairs {
            md.add(k.as_ref(), v)?;
        }
        Ok(md)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Append a value to `key`.
    pub fn add(&mut self, key: &str, value: impl Into<MetadataValue>) -> Result<()> {
        let key = normalize_key(key)?;
        let value = coerce_value(&key, value.into())?;
        match self.position(&key) {
            Some(i) => self.entries[i].1.push(value),
            None => self.entries.push((key, vec![value])),
        }
        Ok(())
    }

    /// Replace all values of `key` with a single value.
    pub fn set(&mut self, key: &str, value: impl Into<MetadataValue>) -> Result<()> {
        let key = normalize_key(key)?;
        let value = coerce_value(&key, value.into())?;
        match self.position(&key) {
            Some(i) => self.entries[i].1 = vec![value],
            None => self.entries.push((key, vec![value])),
        }
        Ok(())
    }

    /// First value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.get_all(key).first()
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_str)
    }

    #[must_use]
    pub fn get_all(&self, key: &str) -> &[MetadataValue] {
        let key = key.to_ascii_lowercase();
        self.position(&key)
            .map_or(&[][..], |i| self.entries[i].1.as_slice())
    }

    /// Remove every value of `key`. Returns whether the key was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        match self.position(&key) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(&key.to_ascii_lowercase()).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every `(key, value)` pair, one per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v)))
    }

    /// Append every value of `other`.
    pub fn merge(&mut self, other: &Metadata) {
        for (key, values) in &other.entries {
            match self.position(key) {
                Some(i) => self.entries[i].1.extend(values.iter().cloned()),
                None => self.entries.push((key.clone(), values.clone())),
            }
        }
    }

    /// One string per key, multiple values joined with `", "`. Binary values are base64.
    #[must_use]
    pub fn to_flat_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.entries
            .iter()
            .map(|(k, vs)| {
                let joined = vs
                    .iter()
                    .map(MetadataValue::to_wire_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                (k.clone(), serde_json::Value::String(joined))
            })
            .collect()
    }

    #[must_use]
    pub fn to_descriptor(&self) -> MetadataDescriptor {
        MetadataDescriptor::from_metadata(self)
    }

    pub fn from_descriptor(desc: &MetadataDescriptor) -> descriptor::Result<Self> {
        desc.to_metadata()
    }
}

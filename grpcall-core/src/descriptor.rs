//! JSON descriptors exchanged with the transport.
//!
//! Metadata, credentials and channel options cross the transport boundary as JSON strings.
//! Each descriptor has an explicit `encode`/`decode` pair so the wire shape is pinned in one
//! place.

use std::collections::BTreeMap;
use std::fmt;

use base64ct::{Base64, Encoding as _};
use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap as _;
use serde::{Deserialize, Serialize};

use crate::metadata::{self, Metadata, MetadataError, MetadataValue};

pub const CREDENTIALS_VERSION: u32 = 1;

pub type Result<T> = std::result::Result<T, DescriptorError>;

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("invalid descriptor json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported credentials descriptor version {0}")]
    UnsupportedVersion(u64),

    #[error("invalid base64 value for metadata key '{0}'")]
    Base64(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// `{ key: [value, ...] }`, binary values base64-encoded under `-bin` keys.
///
/// Keys keep their order in both directions; a key repeated in the JSON object has its
/// values appended to the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDescriptor {
    entries: Vec<(String, Vec<String>)>,
}

impl Serialize for MetadataDescriptor {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, values) in &self.entries {
            map.serialize_entry(key, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetadataDescriptor {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = MetadataDescriptor;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of metadata keys to arrays of strings")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut desc = MetadataDescriptor::default();
                while let Some((key, values)) = access.next_entry::<String, Vec<String>>()? {
                    desc.extend(key, values);
                }
                Ok(desc)
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl MetadataDescriptor {
    #[must_use]
    pub fn from_metadata(md: &Metadata) -> Self {
        let mut out = Self::default();
        for (key, value) in md.iter() {
            out.extend(key.to_string(), vec![value.to_wire_string()]);
        }
        out
    }

    fn extend(&mut self, key: String, values: Vec<String>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => existing.extend(values),
            None => self.entries.push((key, values)),
        }
    }

    /// Keys with their wire values, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn to_metadata(&self) -> Result<Metadata> {
        let mut md = Metadata::new();
        for (key, values) in &self.entries {
            for value in values {
                if metadata::is_binary_key(&key.to_ascii_lowercase()) {
                    let raw = Base64::decode_vec(value)
                        .map_err(|_| DescriptorError::Base64(key.clone()))?;
                    md.add(key, MetadataValue::Binary(Bytes::from(raw)))?;
                } else {
                    md.add(key, value.as_str())?;
                }
            }
        }
        Ok(md)
    }

    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn decode(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Tagged union of the credential shapes the transport understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CredentialsKind {
    Insecure,
    #[serde(rename_all = "camelCase")]
    Ssl {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root_certs: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cert_chain: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_name_override: Option<String>,
    },
    Bearer {
        token: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2 {
        token: String,
    },
    Custom {
        metadata: BTreeMap<String, String>,
    },
    Composite {
        channel: Box<CredentialsKind>,
        call: Box<CredentialsKind>,
    },
}

/// Versioned credentials descriptor: the [`CredentialsKind`] object plus `"v"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsDescriptor {
    pub version: u32,
    pub kind: CredentialsKind,
}

impl CredentialsDescriptor {
    #[must_use]
    pub fn new(kind: CredentialsKind) -> Self {
        Self {
            version: CREDENTIALS_VERSION,
            kind,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let mut json = match serde_json::to_value(&self.kind) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        json.insert("v".to_string(), serde_json::Value::from(self.version));
        serde_json::Value::Object(json).to_string()
    }

    /// A missing `"v"` is read as version 1.
    pub fn decode(json: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(json)?;
        let version = match value.as_object_mut().and_then(|m| m.remove("v")) {
            None => u64::from(CREDENTIALS_VERSION),
            Some(v) => v.as_u64().unwrap_or(0),
        };
        if version != u64::from(CREDENTIALS_VERSION) {
            return Err(DescriptorError::UnsupportedVersion(version));
        }
        let kind = serde_json::from_value(value)?;
        Ok(Self::new(kind))
    }
}

/// Channel settings under their conventional `grpc.*` names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelOptionsDescriptor {
    #[serde(
        rename = "grpc.primary_user_agent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub primary_user_agent: Option<String>,
    #[serde(
        rename = "grpc.default_authority",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_authority: Option<String>,
    #[serde(
        rename = "grpc.keepalive_time_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keepalive_time_ms: Option<u64>,
    #[serde(
        rename = "grpc.keepalive_timeout_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keepalive_timeout_ms: Option<u64>,
    #[serde(
        rename = "grpc.keepalive_permit_without_calls",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keepalive_permit_without_calls: Option<u8>,
    #[serde(
        rename = "grpc.max_send_message_length",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_send_message_length: Option<u64>,
    #[serde(
        rename = "grpc.max_receive_message_length",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_receive_message_length: Option<u64>,
    #[serde(
        rename = "grpc.initial_reconnect_backoff_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_reconnect_backoff_ms: Option<u64>,
    #[serde(
        rename = "grpc.max_reconnect_backoff_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_reconnect_backoff_ms: Option<u64>,
    #[serde(
        rename = "grpc.connect_timeout_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connect_timeout_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ChannelOptionsDescriptor {
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn decode(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }
}

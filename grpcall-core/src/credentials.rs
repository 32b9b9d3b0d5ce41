use std::collections::BTreeMap;

use crate::descriptor::{self, CredentialsDescriptor, CredentialsKind};
use crate::metadata::{self, Metadata};

/// TLS material for [`ChannelCredentials::Ssl`]. PEM strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslCredentials {
    pub root_certs: Option<String>,
    pub private_key: Option<String>,
    pub cert_chain: Option<String>,
    pub target_name_override: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCredentials {
    Insecure,
    Ssl(SslCredentials),
    /// Secure channel plus credentials attached to every call.
    Composite {
        channel: Box<ChannelCredentials>,
        call: CallCredentials,
    },
}

impl ChannelCredentials {
    #[must_use]
    pub fn insecure() -> Self {
        Self::Insecure
    }

    #[must_use]
    pub fn ssl(ssl: SslCredentials) -> Self {
        Self::Ssl(ssl)
    }

    #[must_use]
    pub fn composite(channel: ChannelCredentials, call: CallCredentials) -> Self {
        Self::Composite {
            channel: Box::new(channel),
            call,
        }
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        match self {
            Self::Insecure => false,
            Self::Ssl(_) => true,
            Self::Composite { channel, .. } => channel.is_secure(),
        }
    }

    #[must_use]
    pub fn to_descriptor(&self) -> CredentialsDescriptor {
        CredentialsDescriptor::new(self.to_kind())
    }

    fn to_kind(&self) -> CredentialsKind {
        match self {
            Self::Insecure => CredentialsKind::Insecure,
            Self::Ssl(ssl) => CredentialsKind::Ssl {
                root_certs: ssl.root_certs.clone(),
                private_key: ssl.private_key.clone(),
                cert_chain: ssl.cert_chain.clone(),
                target_name_override: ssl.target_name_override.clone(),
            },
            Self::Composite { channel, call } => CredentialsKind::Composite {
                channel: Box::new(channel.to_kind()),
                call: Box::new(call.to_kind()),
            },
        }
    }

    /// Rebuild from a descriptor. A bare call-credential kind is read as a composite over an
    /// insecure channel.
    pub fn from_descriptor(desc: &CredentialsDescriptor) -> descriptor::Result<Self> {
        Ok(Self::from_kind(&desc.kind))
    }

    fn from_kind(kind: &CredentialsKind) -> Self {
        match kind {
            CredentialsKind::Insecure => Self::Insecure,
            CredentialsKind::Ssl {
                root_certs,
                private_key,
                cert_chain,
                target_name_override,
            } => Self::Ssl(SslCredentials {
                root_certs: root_certs.clone(),
                private_key: private_key.clone(),
                cert_chain: cert_chain.clone(),
                target_name_override: target_name_override.clone(),
            }),
            CredentialsKind::Composite { channel, call } => match CallCredentials::from_kind(call) {
                Some(call) => Self::composite(Self::from_kind(channel), call),
                None => Self::from_kind(channel),
            },
            other => match CallCredentials::from_kind(other) {
                Some(call) => Self::composite(Self::Insecure, call),
                None => Self::Insecure,
            },
        }
    }

    /// Per-call credentials carried by a composite channel credential.
    #[must_use]
    pub fn call_credentials(&self) -> Option<&CallCredentials> {
        match self {
            Self::Composite { call, .. } => Some(call),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCredentials {
    Bearer { token: String },
    OAuth2 { token: String },
    Custom { metadata: BTreeMap<String, String> },
}

impl CallCredentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    pub fn oauth2(token: impl Into<String>) -> Self {
        Self::OAuth2 {
            token: token.into(),
        }
    }

    pub fn custom<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Custom {
            metadata: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Add this credential's headers to `md`.
    pub fn apply(&self, md: &mut Metadata) -> metadata::Result<()> {
        match self {
            Self::Bearer { token } | Self::OAuth2 { token } => {
                md.add("authorization", format!("Bearer {token}"))
            }
            Self::Custom { metadata } => {
                for (k, v) in metadata {
                    md.add(k, v.as_str())?;
                }
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn to_descriptor(&self) -> CredentialsDescriptor {
        CredentialsDescriptor::new(self.to_kind())
    }

    fn to_kind(&self) -> CredentialsKind {
        match self {
            Self::Bearer { token } => CredentialsKind::Bearer {
                token: token.clone(),
            },
            Self::OAuth2 { token } => CredentialsKind::OAuth2 {
                token: token.clone(),
            },
            Self::Custom { metadata } => CredentialsKind::Custom {
                metadata: metadata.clone(),
            },
        }
    }

    fn from_kind(kind: &CredentialsKind) -> Option<Self> {
        match kind {
            CredentialsKind::Bearer { token } => Some(Self::bearer(token.clone())),
            CredentialsKind::OAuth2 { token } => Some(Self::oauth2(token.clone())),
            CredentialsKind::Custom { metadata } => Some(Self::Custom {
                metadata: metadata.clone(),
            }),
            _ => None,
        }
    }
}

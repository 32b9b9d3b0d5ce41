use std::time::Duration;

use grpcall_core::descriptor::{ChannelOptionsDescriptor, CredentialsDescriptor};
use grpcall_core::{ChannelCredentials, ChannelOptions, Metadata};

use crate::Result;

/// PEM material for a TLS channel. Without `ca_pem` the webpki roots are trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub ca_pem: Option<Vec<u8>>,
    pub identity_pem: Option<Vec<u8>>,
    pub identity_key_pem: Option<Vec<u8>>,
    pub domain_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub connect_timeout: Option<Duration>,
    pub keepalive_interval: Option<Duration>,
    pub keepalive_timeout: Option<Duration>,
    pub keepalive_while_idle: bool,
    pub user_agent: Option<String>,
    pub authority: Option<String>,
    pub max_send_message_length: Option<usize>,
    pub max_receive_message_length: Option<usize>,
    pub tls: Option<TlsConfig>,
    /// Added to every call unless the call sets the same key.
    pub default_metadata: Metadata,
}

impl ConnectOptions {
    /// Build from the credentials and channel-options descriptors handed to `connect`.
    pub fn from_descriptors(credentials: &str, options: &str) -> Result<Self> {
        let credentials =
            ChannelCredentials::from_descriptor(&CredentialsDescriptor::decode(credentials)?)?;
        let options = ChannelOptions::from_descriptor(&ChannelOptionsDescriptor::decode(options)?);

        let mut default_metadata = Metadata::new();
        if let Some(call) = credentials.call_credentials() {
            call.apply(&mut default_metadata)?;
        }

        if options.initial_reconnect_backoff.is_some() || options.max_reconnect_backoff.is_some() {
            tracing::debug!("reconnect backoff options are not supported by tonic and are ignored");
        }

        Ok(Self {
            connect_timeout: options.connect_timeout,
            keepalive_interval: options.keepalive_time,
            keepalive_timeout: options.keepalive_timeout,
            keepalive_while_idle: options.keepalive_permit_without_calls,
            user_agent: options.primary_user_agent,
            authority: options.default_authority,
            max_send_message_length: options.max_send_message_length,
            max_receive_message_length: options.max_receive_message_length,
            tls: tls_config(&credentials),
            default_metadata,
        })
    }
}

fn tls_config(credentials: &ChannelCredentials) -> Option<TlsConfig> {
    match credentials {
        ChannelCredentials::Insecure => None,
        ChannelCredentials::Ssl(ssl) => Some(TlsConfig {
            ca_pem: ssl.root_certs.clone().map(String::into_bytes),
            identity_pem: ssl.cert_chain.clone().map(String::into_bytes),
            identity_key_pem: ssl.private_key.clone().map(String::into_bytes),
            domain_name: ssl.target_name_override.clone(),
        }),
        ChannelCredentials::Composite { channel, .. } => tls_config(channel),
    }
}

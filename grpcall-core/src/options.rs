use std::collections::BTreeMap;
use std::time::Duration;

use crate::descriptor::ChannelOptionsDescriptor;
use crate::{CallCredentials, CancellationHandle, Deadline, GrpcError, Metadata, deadline};

/// Per-call settings.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<Deadline>,
    pub metadata: Metadata,
    pub credentials: Option<CallCredentials>,
    pub cancellation: Option<CancellationHandle>,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: impl Into<Deadline>) -> Self {
        self.deadline = Some(deadline.into());
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::After(timeout))
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: CallCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    #[must_use]
    pub fn absolute_deadline(&self) -> u64 {
        deadline::to_absolute_deadline(self.deadline.as_ref())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationHandle::is_cancelled)
    }

    /// Metadata to send: a copy of `metadata` with the call credentials applied.
    pub fn outgoing_metadata(&self) -> Result<Metadata, GrpcError> {
        let mut md = self.metadata.clone();
        if let Some(creds) = &self.credentials {
            creds.apply(&mut md).map_err(|err| {
                GrpcError::invalid_argument(format!("failed to apply call credentials: {err}"))
                    .with_cause(err)
            })?;
        }
        Ok(md)
    }
}

/// Channel-level transport settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelOptions {
    pub primary_user_agent: Option<String>,
    pub default_authority: Option<String>,
    pub keepalive_time: Option<Duration>,
    pub keepalive_timeout: Option<Duration>,
    pub keepalive_permit_without_calls: bool,
    pub max_send_message_length: Option<usize>,
    pub max_receive_message_length: Option<usize>,
    pub initial_reconnect_backoff: Option<Duration>,
    pub max_reconnect_backoff: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Passed through untouched under their own keys.
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn ms(d: Option<Duration>) -> Option<u64> {
    d.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn len(v: Option<usize>) -> Option<u64> {
    v.map(|v| u64::try_from(v).unwrap_or(u64::MAX))
}

impl ChannelOptions {
    #[must_use]
    pub fn to_descriptor(&self) -> ChannelOptionsDescriptor {
        ChannelOptionsDescriptor {
            primary_user_agent: self.primary_user_agent.clone(),
            default_authority: self.default_authority.clone(),
            keepalive_time_ms: ms(self.keepalive_time),
            keepalive_timeout_ms: ms(self.keepalive_timeout),
            keepalive_permit_without_calls: self.keepalive_permit_without_calls.then_some(1),
            max_send_message_length: len(self.max_send_message_length),
            max_receive_message_length: len(self.max_receive_message_length),
            initial_reconnect_backoff_ms: ms(self.initial_reconnect_backoff),
            max_reconnect_backoff_ms: ms(self.max_reconnect_backoff),
            connect_timeout_ms: ms(self.connect_timeout),
            extra: self.extra.clone(),
        }
    }

    #[must_use]
    pub fn from_descriptor(desc: &ChannelOptionsDescriptor) -> Self {
        let to_len = |v: Option<u64>| v.map(|v| usize::try_from(v).unwrap_or(usize::MAX));
        Self {
            primary_user_agent: desc.primary_user_agent.clone(),
            default_authority: desc.default_authority.clone(),
            keepalive_time: desc.keepalive_time_ms.map(Duration::from_millis),
            keepalive_timeout: desc.keepalive_timeout_ms.map(Duration::from_millis),
            keepalive_permit_without_calls: desc.keepalive_permit_without_calls.unwrap_or(0) != 0,
            max_send_message_length: to_len(desc.max_send_message_length),
            max_receive_message_length: to_len(desc.max_receive_message_length),
            initial_reconnect_backoff: desc.initial_reconnect_backoff_ms.map(Duration::from_millis),
            max_reconnect_backoff: desc.max_reconnect_backoff_ms.map(Duration::from_millis),
            connect_timeout: desc.connect_timeout_ms.map(Duration::from_millis),
            extra: desc.extra.clone(),
        }
    }
}

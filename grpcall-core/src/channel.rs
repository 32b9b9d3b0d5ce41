use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

use crate::deadline::{self, Deadline};
use crate::transport::{ConnectivityState, Transport, TransportError};
use crate::{ChannelCredentials, ChannelOptions, GrpcError};

pub type Result<T> = std::result::Result<T, ChannelError>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is already connected")]
    AlreadyConnected,

    #[error("channel is closed")]
    Closed,

    #[error("invalid target: {0:?}")]
    InvalidTarget(String),

    #[error("transport rejected connect: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug)]
enum Lifecycle {
    Unopened,
    Open { target: String },
    Closed { target: Option<String> },
}

#[derive(Debug)]
struct Inner {
    transport: Arc<dyn Transport>,
    lifecycle: Mutex<Lifecycle>,
}

/// Owns one transport and its connect-once, close-once lifecycle.
///
/// Clones share the same transport and lifecycle.
#[derive(Debug, Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                lifecycle: Mutex::new(Lifecycle::Unopened),
            }),
        }
    }

    /// `new` followed by `connect`.
    pub fn open(
        transport: Arc<dyn Transport>,
        target: &str,
        credentials: &ChannelCredentials,
        options: &ChannelOptions,
    ) -> Result<Self> {
        let channel = Self::new(transport);
        channel.connect(target, credentials, options)?;
        Ok(channel)
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand the target to the transport. Only registers intent; the transport connects
    /// in the background.
    pub fn connect(
        &self,
        target: &str,
        credentials: &ChannelCredentials,
        options: &ChannelOptions,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        match &*lifecycle {
            Lifecycle::Open { .. } => return Err(ChannelError::AlreadyConnected),
            Lifecycle::Closed { .. } => return Err(ChannelError::Closed),
            Lifecycle::Unopened => {}
        }

        if !validate_target(target) {
            return Err(ChannelError::InvalidTarget(target.to_string()));
        }

        let creds = credentials.to_descriptor().encode();
        let opts = options.to_descriptor().encode();
        self.inner.transport.connect(target, &creds, &opts)?;

        tracing::debug!(target, secure = credentials.is_secure(), "channel connected");
        *lifecycle = Lifecycle::Open {
            target: target.to_string(),
        };
        Ok(())
    }

    /// Current connectivity. A closed channel always reports `Shutdown`; one that was never
    /// connected reports `Idle`.
    #[must_use]
    pub fn connectivity_state(&self, try_to_connect: bool) -> ConnectivityState {
        match &*self.lifecycle() {
            Lifecycle::Closed { .. } => ConnectivityState::Shutdown,
            Lifecycle::Unopened => ConnectivityState::Idle,
            Lifecycle::Open { .. } => self.inner.transport.connectivity_state(try_to_connect),
        }
    }

    /// Wait until connectivity differs from `from`, failing with DEADLINE_EXCEEDED once
    /// `deadline` passes.
    pub async fn watch_connectivity_state(
        &self,
        from: ConnectivityState,
        deadline: Deadline,
    ) -> std::result::Result<(), GrpcError> {
        let deadline_ms = deadline.to_epoch_ms();
        if self.connectivity_state(false) != from {
            return Ok(());
        }

        let remaining = deadline::remaining_time(deadline_ms).unwrap_or_default();
        let open = matches!(&*self.lifecycle(), Lifecycle::Open { .. });
        let watch = if open {
            Some(
                self.inner
                    .transport
                    .watch_connectivity_state(from, deadline_ms),
            )
        } else {
            None
        };

        let waited = match watch {
            Some(fut) => tokio::time::timeout(remaining, fut).await,
            None => {
                let never = futures::future::pending::<std::result::Result<(), TransportError>>();
                tokio::time::timeout(remaining, never).await
            }
        };

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(GrpcError::from(err)),
            Err(_) => Err(GrpcError::deadline_exceeded(
                "deadline passed before connectivity state changed",
            )),
        }
    }

    /// Release the transport. Later calls do nothing.
    pub fn close(&self) {
        let mut lifecycle = self.lifecycle();
        let target = match &*lifecycle {
            Lifecycle::Closed { .. } => return,
            Lifecycle::Unopened => None,
            Lifecycle::Open { target } => {
                self.inner.transport.close();
                Some(target.clone())
            }
        };
        tracing::debug!(target = target.as_deref().unwrap_or(""), "channel closed");
        *lifecycle = Lifecycle::Closed { target };
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.lifecycle(), Lifecycle::Closed { .. })
    }

    #[must_use]
    pub fn target(&self) -> Option<String> {
        match &*self.lifecycle() {
            Lifecycle::Open { target } => Some(target.clone()),
            Lifecycle::Closed { target } => target.clone(),
            Lifecycle::Unopened => None,
        }
    }

    /// The transport, if calls may be dispatched right now.
    pub(crate) fn transport_for_call(&self) -> std::result::Result<Arc<dyn Transport>, GrpcError> {
        match &*self.lifecycle() {
            Lifecycle::Open { .. } => Ok(Arc::clone(&self.inner.transport)),
            Lifecycle::Unopened => Err(GrpcError::failed_precondition("channel is not connected")),
            Lifecycle::Closed { .. } => Err(GrpcError::failed_precondition("channel is closed")),
        }
    }
}

/// Split `host:port` or `[v6]:port`. The port is `None` when absent.
fn split_host_port(target: &str) -> Option<(&str, Option<&str>)> {
    if let Some(rest) = target.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after {
            "" => Some((host, None)),
            _ => after.strip_prefix(':').map(|port| (host, Some(port))),
        };
    }
    match target.split_once(':') {
        Some((host, port)) => Some((host, Some(port))),
        None => Some((target, None)),
    }
}

fn valid_host(host: &str, bracketed: bool) -> bool {
    if bracketed {
        return host.parse::<Ipv6Addr>().is_ok();
    }
    !host.is_empty()
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// `scheme://...` with a lowercase scheme, `host:port`, or `[ipv6]:port`.
#[must_use]
pub fn validate_target(target: &str) -> bool {
    if target.trim().is_empty() {
        return false;
    }

    if let Some((scheme, _)) = target.split_once("://") {
        return !scheme.is_empty() && scheme.bytes().all(|b| b.is_ascii_lowercase());
    }

    let Some((host, Some(port))) = split_host_port(target) else {
        return false;
    };
    valid_host(host, target.starts_with('['))
        && !port.is_empty()
        && port.bytes().all(|b| b.is_ascii_digit())
}

/// Append `default_port` to a bare host. Targets with a scheme or a port are returned as-is.
#[must_use]
pub fn normalize_target(target: &str, default_port: u16) -> String {
    if target.contains("://") {
        return target.to_string();
    }
    match split_host_port(target) {
        Some((_, None)) => format!("{target}:{default_port}"),
        _ => target.to_string(),
    }
}

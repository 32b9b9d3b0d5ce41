//! The contract a wire-level RPC backend implements.
//!
//! Everything above this module talks to the backend through [`Transport`]; descriptors
//! (metadata, credentials, channel options) cross it as JSON strings and messages as bytes.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// Sending half given to the transport for one stream.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[must_use]
pub fn event_channel() -> (TransportEvents, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// Callbacks a transport stream delivers, in the order it produces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Data(Bytes),
    /// Initial metadata as a metadata descriptor.
    Metadata(String),
    /// Final status; `metadata` is the trailing-metadata descriptor.
    Status {
        code: i32,
        message: String,
        metadata: String,
    },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("call failed with status {code}: {message}")]
    Status {
        code: i32,
        message: String,
        metadata: String,
    },

    #[error("transport failure: {0}")]
    Failure(String),
}

impl TransportError {
    pub fn status(code: i32, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
            metadata: String::new(),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ConnectivityState {
    #[default]
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    TransientFailure = 3,
    Shutdown = 4,
}

impl ConnectivityState {
    /// Unknown values map to `TransientFailure`.
    #[must_use]
    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Ready,
            4 => Self::Shutdown,
            _ => Self::TransientFailure,
        }
    }

    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Whether the transport can take more writes right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteReady {
    Ready,
    /// The message was queued but the outbound buffer is at its high-water mark.
    Full,
}

impl WriteReady {
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Addressing for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCall {
    pub method: String,
    /// Metadata descriptor JSON.
    pub metadata: String,
    /// Absolute epoch milliseconds, `0` for none.
    pub deadline_ms: u64,
    pub call_id: String,
}

/// Control surface of an event-driven transport stream.
pub trait StreamHandle: Send + Sync {
    fn write(&self, message: Bytes) -> Result<WriteReady, TransportError>;
    fn writes_done(&self);
    fn pause(&self);
    fn resume(&self);
    fn cancel(&self);

    fn peer(&self) -> Option<String> {
        None
    }
}

/// Blocking transport stream. `Ok(None)` from a read means end of stream.
pub trait SyncStreamHandle: Send {
    fn read_sync(&mut self) -> Result<Option<Bytes>, TransportError>;
    fn write_sync(&mut self, message: Bytes) -> Result<(), TransportError>;
    /// Half-close and wait for the final response, if the call shape has one.
    fn finish_sync(&mut self) -> Result<Option<Bytes>, TransportError>;
    fn cancel(&mut self);
}

pub trait Transport: Send + Sync + fmt::Debug {
    /// Register the target. Connection itself happens lazily.
    fn connect(&self, target: &str, credentials: &str, options: &str)
    -> Result<(), TransportError>;

    fn close(&self);

    fn connectivity_state(&self, try_to_connect: bool) -> ConnectivityState;

    /// Resolves when the state differs from `from`, or fails once `deadline_ms` passes.
    fn watch_connectivity_state(
        &self,
        from: ConnectivityState,
        deadline_ms: u64,
    ) -> BoxFuture<'static, Result<(), TransportError>>;

    fn unary_call(
        &self,
        call: TransportCall,
        request: Bytes,
    ) -> BoxFuture<'static, Result<Bytes, TransportError>>;

    /// Blocks the calling thread.
    fn unary_call_sync(&self, call: TransportCall, request: Bytes)
    -> Result<Bytes, TransportError>;

    fn cancel_call(&self, call_id: &str);

    fn create_server_stream(
        &self,
        call: TransportCall,
        request: Bytes,
        events: TransportEvents,
    ) -> Result<Arc<dyn StreamHandle>, TransportError>;

    fn create_client_stream(
        &self,
        call: TransportCall,
        events: TransportEvents,
    ) -> Result<Arc<dyn StreamHandle>, TransportError>;

    fn create_bidi_stream(
        &self,
        call: TransportCall,
        events: TransportEvents,
    ) -> Result<Arc<dyn StreamHandle>, TransportError>;

    fn create_server_stream_sync(
        &self,
        call: TransportCall,
        request: Bytes,
    ) -> Result<Box<dyn SyncStreamHandle>, TransportError>;

    fn create_client_stream_sync(
        &self,
        call: TransportCall,
    ) -> Result<Box<dyn SyncStreamHandle>, TransportError>;

    fn create_bidi_stream_sync(
        &self,
        call: TransportCall,
    ) -> Result<Box<dyn SyncStreamHandle>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_state_numbers() {
        assert_eq!(ConnectivityState::Ready.as_i32(), 2);
        assert_eq!(ConnectivityState::from_i32(4), ConnectivityState::Shutdown);
        assert_eq!(ConnectivityState::from_i32(99), ConnectivityState::TransientFailure);
        assert_eq!(ConnectivityState::TransientFailure.to_string(), "TRANSIENT_FAILURE");
    }
}

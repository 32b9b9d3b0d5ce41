//! Blocking pull-based stream facades.
//!
//! Each operation blocks the calling thread on the transport. Iteration ends without a
//! value on both success and failure; call `error()` afterwards to tell them apart.

use std::sync::Arc;

use grpcall_value::Value;

use super::client::NO_RESPONSE;
use super::engine::{CallState, STREAM_CANCELLED, decode_message};
use crate::GrpcError;
use crate::cancellation::{CANCELLED_BY_HANDLE, CancellationHandle};
use crate::codec::MessageCodec;
use crate::transport::{SyncStreamHandle, TransportError};

struct SyncCore {
    method: String,
    state: CallState,
    half_closed: bool,
    error: Option<GrpcError>,
    handle: Box<dyn SyncStreamHandle>,
    codec: Arc<dyn MessageCodec>,
    cancellation: Option<CancellationHandle>,
}

impl SyncCore {
    fn new(
        method: String,
        handle: Box<dyn SyncStreamHandle>,
        codec: Arc<dyn MessageCodec>,
        cancellation: Option<CancellationHandle>,
    ) -> Self {
        Self {
            method,
            state: CallState::Active,
            half_closed: false,
            error: None,
            handle,
            codec,
            cancellation,
        }
    }

    /// Settle as cancelled if the caller's handle fired since the last operation.
    fn observe_cancellation(&mut self) {
        let signalled = self
            .cancellation
            .as_ref()
            .is_some_and(CancellationHandle::is_cancelled);
        if signalled && self.state == CallState::Active {
            self.handle.cancel();
            self.finish(CallState::Cancelled, Some(GrpcError::cancelled(CANCELLED_BY_HANDLE)));
        }
    }

    fn finish(&mut self, to: CallState, error: Option<GrpcError>) {
        if self.state.transition(to) {
            tracing::debug!(method = %self.method, state = %to, "sync stream finished");
            self.error = error;
        }
    }

    fn fail(&mut self, err: GrpcError) -> GrpcError {
        self.finish(CallState::Errored, Some(err.clone()));
        err
    }

    fn terminal_error(&self) -> Option<GrpcError> {
        match self.state {
            CallState::Active | CallState::Ended => None,
            CallState::Errored | CallState::Cancelled => self.error.clone(),
        }
    }

    fn read(&mut self) -> Result<Option<Value>, GrpcError> {
        self.observe_cancellation();
        if self.state.is_terminal() {
            return match self.terminal_error() {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }

        match self.handle.read_sync() {
            Ok(Some(bytes)) => match decode_message(self.codec.as_ref(), bytes) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    self.handle.cancel();
                    Err(self.fail(err))
                }
            },
            Ok(None) => {
                self.finish(CallState::Ended, None);
                Ok(None)
            }
            Err(err) => Err(self.fail(GrpcError::from(err))),
        }
    }

    fn write(&mut self, message: &Value) -> Result<(), GrpcError> {
        self.observe_cancellation();
        if let Some(err) = self.terminal_error() {
            return Err(err);
        }
        if self.state.is_terminal() {
            return Err(GrpcError::failed_precondition("stream has already completed"));
        }
        if self.half_closed {
            return Err(GrpcError::failed_precondition(
                "cannot write after the stream was half-closed",
            ));
        }

        let bytes = self.codec.encode(message)?;
        self.handle
            .write_sync(bytes)
            .map_err(|err| self.fail(GrpcError::from(err)))
    }

    fn half_close(&mut self) -> Result<Option<bytes::Bytes>, GrpcError> {
        self.observe_cancellation();
        if let Some(err) = self.terminal_error() {
            return Err(err);
        }
        if self.half_closed {
            return Err(GrpcError::failed_precondition("stream was already half-closed"));
        }
        self.half_closed = true;
        self.handle
            .finish_sync()
            .map_err(|err: TransportError| self.fail(GrpcError::from(err)))
    }

    fn cancel(&mut self) {
        if self.state == CallState::Active {
            self.handle.cancel();
            self.finish(CallState::Cancelled, Some(GrpcError::cancelled(STREAM_CANCELLED)));
        }
    }
}

macro_rules! sync_common {
    ($ty:ident) => {
        impl $ty {
            /// The terminal error, if the call failed or was cancelled.
            #[must_use]
            pub fn error(&self) -> Option<&GrpcError> {
                match self.core.state {
                    CallState::Errored | CallState::Cancelled => self.core.error.as_ref(),
                    CallState::Active | CallState::Ended => None,
                }
            }

            #[must_use]
            pub fn state(&self) -> CallState {
                self.core.state
            }

            /// Cancel the call. Later calls do nothing.
            pub fn cancel(&mut self) {
                self.core.cancel();
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("method", &self.core.method)
                    .field("state", &self.core.state)
                    .finish_non_exhaustive()
            }
        }
    };
}

/// Blocking server-streaming call.
pub struct SyncServerStream {
    core: SyncCore,
}

impl SyncServerStream {
    pub(crate) fn new(
        method: String,
        handle: Box<dyn SyncStreamHandle>,
        codec: Arc<dyn MessageCodec>,
        cancellation: Option<CancellationHandle>,
    ) -> Self {
        Self {
            core: SyncCore::new(method, handle, codec, cancellation),
        }
    }

    /// Next message, `Ok(None)` at the end of the stream.
    pub fn read(&mut self) -> Result<Option<Value>, GrpcError> {
        self.core.read()
    }
}

sync_common!(SyncServerStream);

impl Iterator for SyncServerStream {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.read().ok().flatten()
    }
}

/// Blocking client-streaming call.
pub struct SyncClientStream {
    core: SyncCore,
}

impl SyncClientStream {
    pub(crate) fn new(
        method: String,
        handle: Box<dyn SyncStreamHandle>,
        codec: Arc<dyn MessageCodec>,
        cancellation: Option<CancellationHandle>,
    ) -> Self {
        Self {
            core: SyncCore::new(method, handle, codec, cancellation),
        }
    }

    pub fn write(&mut self, message: &Value) -> Result<(), GrpcError> {
        self.core.write(message)
    }

    /// Half-close and block for the response.
    pub fn finish(&mut self) -> Result<Value, GrpcError> {
        match self.core.half_close()? {
            Some(bytes) => match decode_message(self.core.codec.as_ref(), bytes) {
                Ok(value) => {
                    self.core.finish(CallState::Ended, None);
                    Ok(value)
                }
                Err(err) => Err(self.core.fail(err)),
            },
            None => Err(self.core.fail(GrpcError::internal(NO_RESPONSE))),
        }
    }
}

sync_common!(SyncClientStream);

/// Blocking bidirectional call.
pub struct SyncBidiStream {
    core: SyncCore,
}

impl SyncBidiStream {
    pub(crate) fn new(
        method: String,
        handle: Box<dyn SyncStreamHandle>,
        codec: Arc<dyn MessageCodec>,
        cancellation: Option<CancellationHandle>,
    ) -> Self {
        Self {
            core: SyncCore::new(method, handle, codec, cancellation),
        }
    }

    pub fn write(&mut self, message: &Value) -> Result<(), GrpcError> {
        self.core.write(message)
    }

    pub fn read(&mut self) -> Result<Option<Value>, GrpcError> {
        self.core.read()
    }

    /// Half-close the client side. Reads continue until the server finishes.
    pub fn finish(&mut self) -> Result<(), GrpcError> {
        self.core.half_close().map(|_| ())
    }
}

sync_common!(SyncBidiStream);

impl Iterator for SyncBidiStream {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.read().ok().flatten()
    }
}

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt as _};
use grpcall_value::Value;

use super::engine::{CallState, StreamCore};
use super::server::{ReadControl, ServerStreamEvent};
use crate::transport::TransportEventReceiver;
use crate::{CancellationHandle, GrpcError};

pub type BidiStreamEvent = ServerStreamEvent;

/// Bidirectional call. Reads and writes are independent; the call ends when the server
/// sends its status.
pub struct BidiStream {
    events: BoxStream<'static, BidiStreamEvent>,
    control: ReadControl,
}

impl std::fmt::Debug for BidiStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BidiStream")
            .field("core", &self.control.core)
            .finish_non_exhaustive()
    }
}

impl BidiStream {
    pub(crate) fn new(
        core: Arc<StreamCore>,
        rx: TransportEventReceiver,
        external: Option<CancellationHandle>,
    ) -> Self {
        let control = ReadControl { core };
        Self {
            events: control.events(rx, external),
            control,
        }
    }

    #[must_use]
    pub fn inspect<F>(self, f: F) -> Self
    where
        F: FnMut(&BidiStreamEvent) + Send + 'static,
    {
        Self {
            events: self.events.inspect(f).boxed(),
            control: self.control,
        }
    }

    /// Send one message. `Ok(false)` asks the caller to wait before writing more.
    pub fn write(&self, message: &Value) -> Result<bool, GrpcError> {
        self.control.core.write(message)
    }

    /// Half-close the client side; reads continue until the server finishes.
    pub fn end(&self) {
        self.control.core.end();
    }

    pub fn cancel(&self) {
        self.control.core.cancel();
    }

    pub fn pause(&self) {
        self.control.core.pause();
    }

    pub fn resume(&self) {
        self.control.core.resume();
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.control.core.state()
    }

    #[must_use]
    pub fn peer(&self) -> Option<String> {
        self.control.core.peer()
    }
}

impl Stream for BidiStream {
    type Item = BidiStreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt as _};
use grpcall_value::Value;

use super::engine::{CallState, Step, StreamCore, pump};
use crate::transport::TransportEventReceiver;
use crate::{CancellationHandle, GrpcError, Metadata, Status};

/// Events of a server-streaming or bidirectional call.
///
/// The stream yields exactly one of `End` (after an OK `Status`) or `Error`, then `None`.
#[derive(Debug, Clone)]
pub enum ServerStreamEvent {
    Metadata(Metadata),
    Data(Value),
    Status(Status),
    Error(GrpcError),
    End,
}

impl From<Step> for ServerStreamEvent {
    fn from(step: Step) -> Self {
        match step {
            Step::Metadata(md) => Self::Metadata(md),
            Step::Data(v) => Self::Data(v),
            Step::Status(s) => Self::Status(s),
            Step::End => Self::End,
            Step::Error(e) => Self::Error(e),
        }
    }
}

/// Shared read-side controls.
#[derive(Debug, Clone)]
pub(crate) struct ReadControl {
    pub(crate) core: Arc<StreamCore>,
}

impl ReadControl {
    pub(crate) fn events(
        &self,
        rx: TransportEventReceiver,
        external: Option<CancellationHandle>,
    ) -> BoxStream<'static, ServerStreamEvent> {
        pump(Arc::clone(&self.core), rx, external)
            .map(ServerStreamEvent::from)
            .boxed()
    }
}

/// Server-streaming call: zero or more messages followed by a terminal status.
pub struct ServerStream {
    events: BoxStream<'static, ServerStreamEvent>,
    control: ReadControl,
}

impl std::fmt::Debug for ServerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStream")
            .field("core", &self.control.core)
            .finish_non_exhaustive()
    }
}

impl ServerStream {
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

    /// Wrap the stream so `f` sees every event before it is yielded. Control operations
    /// still reach the same call.
    #[must_use]
    pub fn inspect<F>(self, f: F) -> Self
    where
        F: FnMut(&ServerStreamEvent) + Send + 'static,
    {
        Self {
            events: self.events.inspect(f).boxed(),
            control: self.control,
        }
    }

    /// Cancel the call. The stream then yields a single CANCELLED error.
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

    /// Drain the stream, returning every message or the terminal error.
    pub async fn collect_messages(mut self) -> Result<Vec<Value>, GrpcError> {
        let mut out = Vec::new();
        while let Some(event) = self.events.next().await {
            match event {
                ServerStreamEvent::Data(v) => out.push(v),
                ServerStreamEvent::Error(err) => return Err(err),
                ServerStreamEvent::Metadata(_)
                | ServerStreamEvent::Status(_)
                | ServerStreamEvent::End => {}
            }
        }
        Ok(out)
    }
}

impl Stream for ServerStream {
    type Item = ServerStreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt as _};
use grpcall_value::Value;

use super::engine::{CallState, Step, StreamCore, pump};
use crate::transport::TransportEventReceiver;
use crate::{CancellationHandle, GrpcError, Metadata, Status};

pub(crate) const NO_RESPONSE: &str = "stream completed without a response message";

/// Events of a client-streaming call. The response message itself is delivered through
/// [`ClientStream::response`].
#[derive(Debug, Clone)]
pub enum ClientStreamEvent {
    Metadata(Metadata),
    Status(Status),
    Error(GrpcError),
}

type ResponseSlot = Arc<Mutex<Option<Result<Value, GrpcError>>>>;

fn settle(slot: &ResponseSlot, result: Result<Value, GrpcError>) {
    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_none() {
        *slot = Some(result);
    }
}

/// Client-streaming call: write any number of messages, then receive exactly one response
/// or an error.
pub struct ClientStream {
    events: BoxStream<'static, ClientStreamEvent>,
    core: Arc<StreamCore>,
    response: ResponseSlot,
}

impl std::fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStream")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl ClientStream {
    pub(crate) fn new(
        core: Arc<StreamCore>,
        rx: TransportEventReceiver,
        external: Option<CancellationHandle>,
    ) -> Self {
        let response: ResponseSlot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&response);

        let events = pump(Arc::clone(&core), rx, external)
            .filter_map(move |step| {
                let event = match step {
                    Step::Metadata(md) => Some(ClientStreamEvent::Metadata(md)),
                    Step::Status(status) => Some(ClientStreamEvent::Status(status)),
                    Step::Data(value) => {
                        settle(&slot, Ok(value));
                        None
                    }
                    Step::End => {
                        settle(&slot, Err(GrpcError::internal(NO_RESPONSE)));
                        None
                    }
                    Step::Error(err) => {
                        settle(&slot, Err(err.clone()));
                        Some(ClientStreamEvent::Error(err))
                    }
                };
                futures::future::ready(event)
            })
            .boxed();

        Self {
            events,
            core,
            response,
        }
    }

    #[must_use]
    pub fn inspect<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientStreamEvent) + Send + 'static,
    {
        Self {
            events: self.events.inspect(f).boxed(),
            core: self.core,
            response: self.response,
        }
    }

    /// Send one message. `Ok(false)` asks the caller to wait before writing more.
    pub fn write(&self, message: &Value) -> Result<bool, GrpcError> {
        self.core.write(message)
    }

    /// Half-close: no more messages will be written.
    pub fn end(&self) {
        self.core.end();
    }

    pub fn cancel(&self) {
        self.core.cancel();
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.core.state()
    }

    fn settled(&self) -> Option<Result<Value, GrpcError>> {
        self.response
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Wait for the response message. Drives the event stream; events consumed while
    /// waiting are not yielded again.
    pub async fn response(&mut self) -> Result<Value, GrpcError> {
        loop {
            if let Some(result) = self.settled() {
                return result;
            }
            if self.events.next().await.is_none() {
                break;
            }
        }
        self.settled()
            .unwrap_or_else(|| Err(GrpcError::internal(NO_RESPONSE)))
    }

    /// Half-close and wait for the response.
    pub async fn finish(&mut self) -> Result<Value, GrpcError> {
        self.end();
        self.response().await
    }
}

impl Stream for ClientStream {
    type Item = ClientStreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

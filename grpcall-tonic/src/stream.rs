use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::AbortHandle;
use futures::{Stream, StreamExt as _};
use grpcall_core::transport::{
    StreamHandle, SyncStreamHandle, TransportError, TransportEvent, TransportEventReceiver,
    TransportEvents, WriteReady,
};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::Streaming;

use crate::Error;
use crate::metadata::descriptor_json;

/// Outbound half of a client-streaming or bidi call.
///
/// `queued` counts messages handed to `write` that tonic has not pulled yet.
pub(crate) struct Outbound {
    tx: mpsc::UnboundedSender<Bytes>,
    queued: Arc<AtomicUsize>,
}

impl Outbound {
    pub(crate) fn new() -> (Self, impl Stream<Item = Bytes> + Send + 'static) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let pulled = Arc::clone(&queued);
        let stream = UnboundedReceiverStream::new(rx).inspect(move |_| {
            pulled.fetch_sub(1, Ordering::SeqCst);
        });
        (Self { tx, queued }, stream)
    }
}

/// Event-driven handle over a spawned call task.
pub(crate) struct TonicStreamHandle {
    outbound: Mutex<Option<Outbound>>,
    high_water: usize,
    paused: watch::Sender<bool>,
    task: AbortHandle,
    peer: Option<String>,
}

impl TonicStreamHandle {
    pub(crate) fn new(
        outbound: Option<Outbound>,
        high_water: usize,
        paused: watch::Sender<bool>,
        task: AbortHandle,
        peer: Option<String>,
    ) -> Self {
        Self {
            outbound: Mutex::new(outbound),
            high_water,
            paused,
            task,
            peer,
        }
    }

    fn outbound(&self) -> std::sync::MutexGuard<'_, Option<Outbound>> {
        self.outbound.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl StreamHandle for TonicStreamHandle {
    fn write(&self, message: Bytes) -> Result<WriteReady, TransportError> {
        let guard = self.outbound();
        let Some(out) = guard.as_ref() else {
            return Err(Error::StreamClosed.into());
        };
        let queued = out.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if out.tx.send(message).is_err() {
            out.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::StreamClosed.into());
        }
        Ok(if queued >= self.high_water {
            WriteReady::Full
        } else {
            WriteReady::Ready
        })
    }

    fn writes_done(&self) {
        self.outbound().take();
    }

    fn pause(&self) {
        self.paused.send_replace(true);
    }

    fn resume(&self) {
        self.paused.send_replace(false);
    }

    fn cancel(&self) {
        self.outbound().take();
        self.task.abort();
    }

    fn peer(&self) -> Option<String> {
        self.peer.clone()
    }
}

async fn wait_resumed(paused: &mut watch::Receiver<bool>) {
    loop {
        let is_paused = *paused.borrow_and_update();
        if !is_paused || paused.changed().await.is_err() {
            return;
        }
    }
}

fn send(events: &TransportEvents, event: TransportEvent) -> bool {
    events.send(event).is_ok()
}

pub(crate) fn ok_status(trailers: String) -> TransportEvent {
    TransportEvent::Status {
        code: 0,
        message: String::new(),
        metadata: trailers,
    }
}

/// Forward a streaming response as transport events, ending with an OK status.
/// A failing status is returned for the caller to report.
pub(crate) async fn forward_responses(
    response: tonic::Response<Streaming<Bytes>>,
    events: &TransportEvents,
    mut paused: watch::Receiver<bool>,
) -> Result<(), tonic::Status> {
    let (headers, mut body, _) = response.into_parts();
    if !send(events, TransportEvent::Metadata(descriptor_json(&headers))) {
        return Ok(());
    }

    loop {
        wait_resumed(&mut paused).await;
        match body.message().await? {
            Some(message) => {
                if !send(events, TransportEvent::Data(message)) {
                    return Ok(());
                }
            }
            None => break,
        }
    }

    let trailers = body
        .trailers()
        .await?
        .map_or_else(|| "{}".to_string(), |t| descriptor_json(&t));
    send(events, ok_status(trailers));
    Ok(())
}

/// Blocking facade over the same spawned call task.
///
/// Reads use `blocking_recv`, so they must not run on a runtime worker thread.
pub(crate) struct TonicSyncStream {
    events: TransportEventReceiver,
    handle: Arc<dyn StreamHandle>,
    /// Client streams wait for the single response on finish.
    awaits_response: bool,
    done: bool,
}

impl TonicSyncStream {
    pub(crate) fn new(
        events: TransportEventReceiver,
        handle: Arc<dyn StreamHandle>,
        awaits_response: bool,
    ) -> Self {
        Self {
            events,
            handle,
            awaits_response,
            done: false,
        }
    }
}

impl SyncStreamHandle for TonicSyncStream {
    fn read_sync(&mut self) -> Result<Option<Bytes>, TransportError> {
        while !self.done {
            let event = self.events.blocking_recv();
            match event {
                Some(TransportEvent::Metadata(_)) => {}
                Some(TransportEvent::Data(message)) => return Ok(Some(message)),
                Some(TransportEvent::Status { code: 0, .. }) | None => self.done = true,
                Some(TransportEvent::Status {
                    code,
                    message,
                    metadata,
                }) => {
                    self.done = true;
                    return Err(TransportError::Status {
                        code,
                        message,
                        metadata,
                    });
                }
                Some(TransportEvent::Error(message)) => {
                    self.done = true;
                    return Err(TransportError::Failure(message));
                }
            }
        }
        Ok(None)
    }

    fn write_sync(&mut self, message: Bytes) -> Result<(), TransportError> {
        self.handle.write(message).map(|_| ())
    }

    fn finish_sync(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.handle.writes_done();
        if !self.awaits_response {
            return Ok(None);
        }
        let mut response = None;
        while let Some(message) = self.read_sync()? {
            response = Some(message);
        }
        Ok(response)
    }

    fn cancel(&mut self) {
        self.handle.cancel();
        self.done = true;
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use grpcall_value::Value;

use crate::cancellation::CANCELLED_BY_HANDLE;
use crate::codec::MessageCodec;
use crate::descriptor::MetadataDescriptor;
use crate::error::decode_trailers;
use crate::transport::{StreamHandle, TransportEvent, TransportEventReceiver};
use crate::{CancellationHandle, GrpcError, Metadata, Status, StatusCode};

pub(crate) const STREAM_CANCELLED: &str = "stream cancelled";

/// Lifecycle of one streaming call. Leaves `Active` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CallState {
    Active,
    Ended,
    Errored,
    Cancelled,
}

impl CallState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }

    /// Move to `to` if still active. Returns whether the transition happened.
    pub(crate) fn transition(&mut self, to: CallState) -> bool {
        if *self == Self::Active && to != Self::Active {
            *self = to;
            true
        } else {
            false
        }
    }
}

/// One inbound step after translation.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Metadata(Metadata),
    Data(Value),
    Status(Status),
    End,
    Error(GrpcError),
}

/// Translate a terminal status into its status object and, for non-OK codes, the error.
pub(crate) fn translate_status(
    code: i32,
    message: String,
    metadata: &str,
) -> (Status, Option<GrpcError>) {
    let status = Status {
        code: StatusCode::from_i32(code),
        details: message,
        metadata: decode_trailers(metadata).unwrap_or_default(),
    };
    let err = (!status.code.is_ok()).then(|| GrpcError::from_status(&status));
    (status, err)
}

pub(crate) fn decode_message(codec: &dyn MessageCodec, bytes: Bytes) -> Result<Value, GrpcError> {
    codec.decode(bytes).map_err(|err| {
        GrpcError::internal(format!("failed to decode response message: {}", err.message()))
            .with_cause(err)
    })
}

/// State and transport handle shared by a stream facade and its event pump.
pub(crate) struct StreamCore {
    method: String,
    state: Mutex<CallState>,
    half_closed: AtomicBool,
    handle: Arc<dyn StreamHandle>,
    codec: Arc<dyn MessageCodec>,
    cancelled: CancellationHandle,
}

impl std::fmt::Debug for StreamCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCore")
            .field("method", &self.method)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamCore {
    pub(crate) fn new(
        method: String,
        handle: Arc<dyn StreamHandle>,
        codec: Arc<dyn MessageCodec>,
    ) -> Arc<Self> {
        Arc::new(Self {
            method,
            state: Mutex::new(CallState::Active),
            half_closed: AtomicBool::new(false),
            handle,
            codec,
            cancelled: CancellationHandle::new(),
        })
    }

    pub(crate) fn state(&self) -> CallState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, to: CallState) -> bool {
        let moved = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .transition(to);
        if moved {
            tracing::debug!(method = %self.method, state = %to, "stream finished");
        }
        moved
    }

    /// Cancel the call. Only the first call on an active stream has any effect.
    pub(crate) fn cancel(&self) -> bool {
        if !self.transition(CallState::Cancelled) {
            return false;
        }
        self.handle.cancel();
        self.cancelled.cancel();
        true
    }

    pub(crate) fn pause(&self) {
        self.handle.pause();
    }

    pub(crate) fn resume(&self) {
        self.handle.resume();
    }

    pub(crate) fn peer(&self) -> Option<String> {
        self.handle.peer()
    }

    /// Serialize and hand `message` to the transport. `Ok(false)` means the transport
    /// asked the writer to back off.
    pub(crate) fn write(&self, message: &Value) -> Result<bool, GrpcError> {
        match self.state() {
            CallState::Active => {}
            CallState::Cancelled => return Err(GrpcError::cancelled(STREAM_CANCELLED)),
            CallState::Ended | CallState::Errored => {
                return Err(GrpcError::failed_precondition("stream has already completed"));
            }
        }
        if self.half_closed.load(Ordering::Acquire) {
            return Err(GrpcError::failed_precondition(
                "cannot write after the stream was half-closed",
            ));
        }

        let bytes = self.codec.encode(message)?;
        let ready = self.handle.write(bytes).map_err(GrpcError::from)?;
        Ok(ready.is_ready())
    }

    /// Half-close the outbound side. Later calls do nothing.
    pub(crate) fn end(&self) {
        if self.state().is_terminal() || self.half_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.handle.writes_done();
    }

    fn on_event(&self, event: TransportEvent) -> Vec<Step> {
        if self.state().is_terminal() {
            tracing::debug!(method = %self.method, "dropping transport event after terminal state");
            return Vec::new();
        }

        match event {
            TransportEvent::Data(bytes) => match decode_message(self.codec.as_ref(), bytes) {
                Ok(value) => vec![Step::Data(value)],
                Err(err) => {
                    if self.transition(CallState::Errored) {
                        self.handle.cancel();
                    }
                    vec![Step::Error(err)]
                }
            },
            TransportEvent::Metadata(desc) => {
                match MetadataDescriptor::decode(&desc).and_then(|d| d.to_metadata()) {
                    Ok(md) => vec![Step::Metadata(md)],
                    Err(err) => {
                        tracing::warn!(
                            method = %self.method,
                            error = %err,
                            "dropping undecodable stream metadata"
                        );
                        Vec::new()
                    }
                }
            }
            TransportEvent::Status {
                code,
                message,
                metadata,
            } => {
                let (status, err) = translate_status(code, message, &metadata);
                match err {
                    None => {
                        self.transition(CallState::Ended);
                        vec![Step::Status(status), Step::End]
                    }
                    Some(err) => {
                        self.transition(CallState::Errored);
                        vec![Step::Status(status), Step::Error(err)]
                    }
                }
            }
            TransportEvent::Error(message) => {
                self.transition(CallState::Errored);
                vec![Step::Error(GrpcError::unknown(message))]
            }
        }
    }

    fn on_disconnect(&self) -> Option<Step> {
        self.transition(CallState::Errored).then(|| {
            Step::Error(GrpcError::unknown(
                "transport closed the stream without a status",
            ))
        })
    }
}

struct Pump {
    core: Arc<StreamCore>,
    rx: TransportEventReceiver,
    external: Option<CancellationHandle>,
    queue: VecDeque<Step>,
    finished: bool,
}

impl Pump {
    async fn advance(&mut self) {
        let internal = self.core.cancelled.clone();
        let external = self.external.clone();
        let cancelled = async move {
            match external {
                Some(external) => tokio::select! {
                    () = internal.cancelled() => false,
                    () = external.cancelled() => true,
                },
                None => {
                    internal.cancelled().await;
                    false
                }
            }
        };

        tokio::select! {
            biased;
            by_handle = cancelled => {
                self.core.cancel();
                if self.core.state() == CallState::Cancelled {
                    let message = if by_handle { CANCELLED_BY_HANDLE } else { STREAM_CANCELLED };
                    self.queue.push_back(Step::Error(GrpcError::cancelled(message)));
                }
                self.finished = true;
            }
            event = self.rx.recv() => match event {
                Some(event) => {
                    self.queue.extend(self.core.on_event(event));
                    if self.core.state().is_terminal() {
                        self.finished = true;
                    }
                }
                None => {
                    self.queue.extend(self.core.on_disconnect());
                    self.finished = true;
                }
            },
        }
    }
}

/// Drive transport events through the state machine as a stream of steps. The stream ends
/// after the terminal step.
pub(crate) fn pump(
    core: Arc<StreamCore>,
    rx: TransportEventReceiver,
    external: Option<CancellationHandle>,
) -> BoxStream<'static, Step> {
    let pump = Pump {
        core,
        rx,
        external,
        queue: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(pump, |mut pump| async move {
        loop {
            if let Some(step) = pump.queue.pop_front() {
                if matches!(step, Step::Data(_)) && pump.core.state() == CallState::Cancelled {
                    continue;
                }
                return Some((step, pump));
            }
            if pump.finished {
                return None;
            }
            pump.advance().await;
        }
    })
    .boxed()
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures::FutureExt as _;
use futures::future::BoxFuture;
use grpcall_core::descriptor::MetadataDescriptor;
use grpcall_core::transport::{
    ConnectivityState, StreamHandle, SyncStreamHandle, Transport, TransportCall, TransportError,
    TransportEvent, TransportEvents, WriteReady,
};
use grpcall_core::{Channel, ChannelCredentials, ChannelOptions, Metadata};

pub const TARGET: &str = "localhost:50051";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Unary behaviour for the next call.
#[derive(Debug, Clone)]
pub enum UnaryReply {
    Echo,
    Respond(Bytes),
    Fail(TransportError),
    Hang,
}

#[derive(Debug, Default)]
pub struct MockHandle {
    pub writes: Mutex<Vec<Bytes>>,
    pub writes_done: AtomicUsize,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub cancels: AtomicUsize,
    /// `write` reports back-pressure once this many messages were written.
    pub high_water: Option<usize>,
}

impl MockHandle {
    pub fn written(&self) -> Vec<Bytes> {
        lock(&self.writes).clone()
    }
}

impl StreamHandle for MockHandle {
    fn write(&self, message: Bytes) -> Result<WriteReady, TransportError> {
        let mut writes = lock(&self.writes);
        writes.push(message);
        match self.high_water {
            Some(limit) if writes.len() >= limit => Ok(WriteReady::Full),
            _ => Ok(WriteReady::Ready),
        }
    }

    fn writes_done(&self) {
        self.writes_done.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn peer(&self) -> Option<String> {
        Some("ipv4:127.0.0.1:50051".to_string())
    }
}

/// A stream the transport opened, with the sink to push events into it.
pub struct OpenedStream {
    pub call: TransportCall,
    pub request: Option<Bytes>,
    pub events: TransportEvents,
    pub handle: Arc<MockHandle>,
}

impl OpenedStream {
    pub fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn metadata(&self, pairs: &[(&str, &str)]) {
        let md = Metadata::from_pairs(pairs.iter().copied())
            .unwrap_or_else(|err| panic!("metadata: {err}"));
        self.send(TransportEvent::Metadata(md.to_descriptor().encode()));
    }

    pub fn data(&self, json: &str) {
        self.send(TransportEvent::Data(Bytes::copy_from_slice(json.as_bytes())));
    }

    pub fn status(&self, code: i32, message: &str) {
        self.send(TransportEvent::Status {
            code,
            message: message.to_string(),
            metadata: String::new(),
        });
    }
}

/// Blocking handle. Server-stream reads come from a script; bidi reads echo writes.
pub struct MockSyncHandle {
    reads: VecDeque<Result<Option<Bytes>, TransportError>>,
    echo: bool,
    writes: Vec<Bytes>,
    cancels: Arc<AtomicUsize>,
}

impl SyncStreamHandle for MockSyncHandle {
    fn read_sync(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.reads.pop_front().unwrap_or(Ok(None))
    }

    fn write_sync(&mut self, message: Bytes) -> Result<(), TransportError> {
        if self.echo {
            self.reads.push_back(Ok(Some(message.clone())));
        }
        self.writes.push(message);
        Ok(())
    }

    fn finish_sync(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.echo {
            return Ok(None);
        }
        let count = self.writes.len();
        Ok(Some(Bytes::from(format!(r#"{{"count":{count}}}"#))))
    }

    fn cancel(&mut self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct State {
    connects: Vec<(String, String, String)>,
    closed: bool,
    connectivity: ConnectivityState,
    replies: VecDeque<UnaryReply>,
    unary_calls: Vec<(TransportCall, Bytes)>,
    cancelled_calls: Vec<String>,
    sync_reads: VecDeque<Result<Option<Bytes>, TransportError>>,
}

/// Scripted in-memory transport that records everything it is asked to do.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<State>,
    streams: Mutex<Vec<OpenedStream>>,
    sync_calls: Mutex<Vec<TransportCall>>,
    pub sync_cancels: Arc<AtomicUsize>,
    pub high_water: Option<usize>,
    pub watch_hangs: AtomicBool,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish_non_exhaustive()
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_high_water(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            high_water: Some(limit),
            ..Self::default()
        })
    }

    pub fn reply(&self, reply: UnaryReply) {
        lock(&self.state).replies.push_back(reply);
    }

    pub fn fail(&self, code: i32, message: &str) {
        self.reply(UnaryReply::Fail(TransportError::status(code, message)));
    }

    pub fn set_connectivity(&self, state: ConnectivityState) {
        lock(&self.state).connectivity = state;
    }

    pub fn script_sync_reads(
        &self,
        reads: impl IntoIterator<Item = Result<Option<Bytes>, TransportError>>,
    ) {
        lock(&self.state).sync_reads.extend(reads);
    }

    pub fn connects(&self) -> Vec<(String, String, String)> {
        lock(&self.state).connects.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn unary_calls(&self) -> Vec<(TransportCall, Bytes)> {
        lock(&self.state).unary_calls.clone()
    }

    pub fn cancelled_calls(&self) -> Vec<String> {
        lock(&self.state).cancelled_calls.clone()
    }

    pub fn sync_calls(&self) -> Vec<TransportCall> {
        lock(&self.sync_calls).clone()
    }

    pub fn stream_count(&self) -> usize {
        lock(&self.streams).len()
    }

    /// Take the most recently opened stream.
    pub fn take_stream(&self) -> OpenedStream {
        lock(&self.streams)
            .pop()
            .unwrap_or_else(|| panic!("no stream was opened"))
    }

    fn open_stream(
        &self,
        call: TransportCall,
        request: Option<Bytes>,
        events: TransportEvents,
    ) -> Arc<dyn StreamHandle> {
        let handle = Arc::new(MockHandle {
            high_water: self.high_water,
            ..MockHandle::default()
        });
        lock(&self.streams).push(OpenedStream {
            call,
            request,
            events,
            handle: Arc::clone(&handle),
        });
        handle
    }

    fn sync_handle(&self, call: TransportCall, echo: bool) -> Box<dyn SyncStreamHandle> {
        lock(&self.sync_calls).push(call);
        let reads = if echo {
            VecDeque::new()
        } else {
            std::mem::take(&mut lock(&self.state).sync_reads)
        };
        Box::new(MockSyncHandle {
            reads,
            echo,
            writes: Vec::new(),
            cancels: Arc::clone(&self.sync_cancels),
        })
    }

    fn next_reply(&self, call: TransportCall, request: &Bytes) -> UnaryReply {
        let mut state = lock(&self.state);
        state.unary_calls.push((call, request.clone()));
        state.replies.pop_front().unwrap_or(UnaryReply::Echo)
    }
}

impl Transport for MockTransport {
    fn connect(
        &self,
        target: &str,
        credentials: &str,
        options: &str,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state
            .connects
            .push((target.to_string(), credentials.to_string(), options.to_string()));
        state.connectivity = ConnectivityState::Idle;
        Ok(())
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.connectivity = ConnectivityState::Shutdown;
    }

    fn connectivity_state(&self, try_to_connect: bool) -> ConnectivityState {
        let mut state = lock(&self.state);
        if try_to_connect && state.connectivity == ConnectivityState::Idle {
            state.connectivity = ConnectivityState::Ready;
        }
        state.connectivity
    }

    fn watch_connectivity_state(
        &self,
        _from: ConnectivityState,
        _deadline_ms: u64,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        if self.watch_hangs.load(Ordering::SeqCst) {
            futures::future::pending().boxed()
        } else {
            futures::future::ready(Ok(())).boxed()
        }
    }

    fn unary_call(
        &self,
        call: TransportCall,
        request: Bytes,
    ) -> BoxFuture<'static, Result<Bytes, TransportError>> {
        match self.next_reply(call, &request) {
            UnaryReply::Echo => futures::future::ready(Ok(request)).boxed(),
            UnaryReply::Respond(bytes) => futures::future::ready(Ok(bytes)).boxed(),
            UnaryReply::Fail(err) => futures::future::ready(Err(err)).boxed(),
            UnaryReply::Hang => futures::future::pending().boxed(),
        }
    }

    fn unary_call_sync(
        &self,
        call: TransportCall,
        request: Bytes,
    ) -> Result<Bytes, TransportError> {
        match self.next_reply(call, &request) {
            UnaryReply::Echo | UnaryReply::Hang => Ok(request),
            UnaryReply::Respond(bytes) => Ok(bytes),
            UnaryReply::Fail(err) => Err(err),
        }
    }

    fn cancel_call(&self, call_id: &str) {
        lock(&self.state).cancelled_calls.push(call_id.to_string());
    }

    fn create_server_stream(
        &self,
        call: TransportCall,
        request: Bytes,
        events: TransportEvents,
    ) -> Result<Arc<dyn StreamHandle>, TransportError> {
        Ok(self.open_stream(call, Some(request), events))
    }

    fn create_client_stream(
        &self,
        call: TransportCall,
        events: TransportEvents,
    ) -> Result<Arc<dyn StreamHandle>, TransportError> {
        Ok(self.open_stream(call, None, events))
    }

    fn create_bidi_stream(
        &self,
        call: TransportCall,
        events: TransportEvents,
    ) -> Result<Arc<dyn StreamHandle>, TransportError> {
        Ok(self.open_stream(call, None, events))
    }

    fn create_server_stream_sync(
        &self,
        call: TransportCall,
        _request: Bytes,
    ) -> Result<Box<dyn SyncStreamHandle>, TransportError> {
        Ok(self.sync_handle(call, false))
    }

    fn create_client_stream_sync(
        &self,
        call: TransportCall,
    ) -> Result<Box<dyn SyncStreamHandle>, TransportError> {
        Ok(self.sync_handle(call, false))
    }

    fn create_bidi_stream_sync(
        &self,
        call: TransportCall,
    ) -> Result<Box<dyn SyncStreamHandle>, TransportError> {
        Ok(self.sync_handle(call, true))
    }
}

pub fn connected(transport: &Arc<MockTransport>) -> Channel {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    Channel::open(
        transport,
        TARGET,
        &ChannelCredentials::insecure(),
        &ChannelOptions::default(),
    )
    .unwrap_or_else(|err| panic!("connect: {err}"))
}

pub fn decode_metadata(descriptor: &str) -> Metadata {
    MetadataDescriptor::decode(descriptor)
        .and_then(|d| d.to_metadata())
        .unwrap_or_else(|err| panic!("metadata descriptor: {err}"))
}

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt as _;
use futures::future::{AbortHandle, AbortRegistration, Abortable, BoxFuture};
use grpcall_core::deadline;
use grpcall_core::transport::{
    ConnectivityState, StreamHandle, SyncStreamHandle, Transport, TransportCall, TransportError,
    TransportEvent, TransportEvents, event_channel,
};
use http::uri::PathAndQuery;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

use crate::codec::PassthroughCodec;
use crate::metadata::{apply_descriptor, descriptor_json, status_error};
use crate::stream::{Outbound, TonicStreamHandle, TonicSyncStream, forward_responses, ok_status};
use crate::{ConnectOptions, Error, Result};

/// Queued-but-unsent outbound messages at which `write` starts reporting back-pressure.
pub const DEFAULT_HIGH_WATER: usize = 16;

const CANCELLED: i32 = tonic::Code::Cancelled as i32;
const DEADLINE_EXCEEDED: i32 = tonic::Code::DeadlineExceeded as i32;

#[derive(Clone)]
struct Connection {
    target: String,
    channel: Channel,
    endpoint: Endpoint,
    options: Arc<ConnectOptions>,
    runtime: Handle,
}

impl Connection {
    async fn ready(&self) -> std::result::Result<tonic::client::Grpc<Channel>, tonic::Status> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        if let Some(n) = self.options.max_send_message_length {
            grpc = grpc.max_encoding_message_size(n);
        }
        if let Some(n) = self.options.max_receive_message_length {
            grpc = grpc.max_decoding_message_size(n);
        }
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service was not ready: {e}")))?;
        Ok(grpc)
    }

    fn request<T>(
        &self,
        call: &TransportCall,
        message: T,
    ) -> std::result::Result<tonic::Request<T>, TransportError> {
        let mut request = tonic::Request::new(message);
        apply_descriptor(
            &call.metadata,
            &self.options.default_metadata,
            request.metadata_mut(),
        )?;
        if let Some(remaining) = deadline::remaining_time(call.deadline_ms) {
            if remaining.is_zero() {
                return Err(TransportError::status(
                    DEADLINE_EXCEEDED,
                    "deadline exceeded before the call started",
                ));
            }
            request.set_timeout(remaining);
        }
        Ok(request)
    }
}

struct Inner {
    conn: RwLock<Option<Connection>>,
    state: watch::Sender<ConnectivityState>,
    inflight: DashMap<String, AbortHandle>,
    high_water: usize,
}

impl Inner {
    fn connection(&self) -> std::result::Result<Connection, TransportError> {
        self.conn
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| Error::NotConnected.into())
    }

    /// Shutdown is terminal until the next `connect`.
    fn set_state(&self, next: ConnectivityState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectivityState::Shutdown || *current == next {
                return false;
            }
            tracing::debug!(from = %current, to = %next, "connectivity changed");
            *current = next;
            true
        });
    }

    fn failed(&self, status: &tonic::Status) -> TransportError {
        if status.code() == tonic::Code::Unavailable {
            self.set_state(ConnectivityState::TransientFailure);
        }
        status_error(status)
    }

    /// Register an abortable call. The entry lives as long as the returned guard.
    fn track(self: &Arc<Self>, call_id: &str) -> (Inflight, AbortHandle, AbortRegistration) {
        let (handle, registration) = AbortHandle::new_pair();
        self.inflight.insert(call_id.to_string(), handle.clone());
        let entry = Inflight {
            inner: Arc::clone(self),
            call_id: call_id.to_string(),
        };
        (entry, handle, registration)
    }
}

/// Removes its call from the in-flight table when dropped, including when the caller
/// drops the call future before it completes.
struct Inflight {
    inner: Arc<Inner>,
    call_id: String,
}

impl Drop for Inflight {
    fn drop(&mut self) {
        self.inner.inflight.remove(&self.call_id);
    }
}

/// gRPC over tonic's HTTP/2 channel.
///
/// Blocking (`*_sync`) methods drive the runtime captured by `connect`; call them from a
/// thread that is not a runtime worker, such as one from `spawn_blocking`.
#[derive(Clone)]
pub struct TonicTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for TonicTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self
            .inner
            .conn
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|c| c.target.clone());
        f.debug_struct("TonicTransport")
            .field("target", &target)
            .field("state", &*self.inner.state.borrow())
            .field("inflight", &self.inner.inflight.len())
            .finish()
    }
}

impl Default for TonicTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TonicTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_high_water(DEFAULT_HIGH_WATER)
    }

    #[must_use]
    pub fn with_high_water(high_water: usize) -> Self {
        let (state, _) = watch::channel(ConnectivityState::Idle);
        Self {
            inner: Arc::new(Inner {
                conn: RwLock::new(None),
                state,
                inflight: DashMap::new(),
                high_water: high_water.max(1),
            }),
        }
    }

    /// Calls and streams that have not finished yet.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Run a call future on the connection's runtime, reporting its outcome as events.
    fn spawn_call<F>(
        &self,
        conn: &Connection,
        call: &TransportCall,
        events: TransportEvents,
        fut: F,
    ) -> AbortHandle
    where
        F: Future<Output = std::result::Result<(), tonic::Status>> + Send + 'static,
    {
        let (entry, handle, registration) = self.inner.track(&call.call_id);
        let remaining = deadline::remaining_time(call.deadline_ms);
        let inner = Arc::clone(&self.inner);
        let method = call.method.clone();

        conn.runtime.spawn(async move {
            let outcome = with_deadline(remaining, Abortable::new(fut, registration)).await;
            drop(entry);
            let event = match outcome {
                Ok(Ok(Ok(()))) => {
                    inner.set_state(ConnectivityState::Ready);
                    return;
                }
                // Cancellation already settled on the caller's side.
                Ok(Err(_aborted)) => return,
                Ok(Ok(Err(status))) => into_event(inner.failed(&status)),
                Err(err) => into_event(err),
            };
            tracing::debug!(method = %method, "stream finished with an error");
            let _ = events.send(event);
        });
        handle
    }

    fn open_server_stream(
        &self,
        call: &TransportCall,
        request: Bytes,
        events: TransportEvents,
    ) -> std::result::Result<Arc<TonicStreamHandle>, TransportError> {
        let conn = self.inner.connection()?;
        let path = method_path(&call.method)?;
        let request = conn.request(call, request)?;
        let (paused, paused_rx) = watch::channel(false);

        let fut = {
            let conn = conn.clone();
            let events = events.clone();
            async move {
                let mut grpc = conn.ready().await?;
                let response = grpc.server_streaming(request, path, PassthroughCodec).await?;
                forward_responses(response, &events, paused_rx).await
            }
        };
        let task = self.spawn_call(&conn, call, events, fut);
        Ok(Arc::new(TonicStreamHandle::new(
            None,
            self.inner.high_water,
            paused,
            task,
            Some(conn.target.clone()),
        )))
    }

    fn open_client_stream(
        &self,
        call: &TransportCall,
        events: TransportEvents,
    ) -> std::result::Result<Arc<TonicStreamHandle>, TransportError> {
        let conn = self.inner.connection()?;
        let path = method_path(&call.method)?;
        let (outbound, messages) = Outbound::new();
        let request = conn.request(call, messages)?;
        let (paused, _) = watch::channel(false);

        let fut = {
            let conn = conn.clone();
            let events = events.clone();
            async move {
                let mut grpc = conn.ready().await?;
                let response = grpc.client_streaming(request, path, PassthroughCodec).await?;
                // tonic folds the trailers into the response metadata here.
                let (headers, message, _) = response.into_parts();
                let trailers = descriptor_json(&headers);
                let _ = events.send(TransportEvent::Metadata(trailers.clone()));
                let _ = events.send(TransportEvent::Data(message));
                let _ = events.send(ok_status(trailers));
                Ok(())
            }
        };
        let task = self.spawn_call(&conn, call, events, fut);
        Ok(Arc::new(TonicStreamHandle::new(
            Some(outbound),
            self.inner.high_water,
            paused,
            task,
            Some(conn.target.clone()),
        )))
    }

    fn open_bidi_stream(
        &self,
        call: &TransportCall,
        events: TransportEvents,
    ) -> std::result::Result<Arc<TonicStreamHandle>, TransportError> {
        let conn = self.inner.connection()?;
        let path = method_path(&call.method)?;
        let (outbound, messages) = Outbound::new();
        let request = conn.request(call, messages)?;
        let (paused, paused_rx) = watch::channel(false);

        let fut = {
            let conn = conn.clone();
            let events = events.clone();
            async move {
                let mut grpc = conn.ready().await?;
                let response = grpc.streaming(request, path, PassthroughCodec).await?;
                forward_responses(response, &events, paused_rx).await
            }
        };
        let task = self.spawn_call(&conn, call, events, fut);
        Ok(Arc::new(TonicStreamHandle::new(
            Some(outbound),
            self.inner.high_water,
            paused,
            task,
            Some(conn.target.clone()),
        )))
    }
}

fn method_path(method: &str) -> Result<PathAndQuery> {
    if !method.starts_with('/') {
        return Err(Error::InvalidMethodPath(method.to_string()));
    }
    PathAndQuery::try_from(method).map_err(|_| Error::InvalidMethodPath(method.to_string()))
}

fn into_event(err: TransportError) -> TransportEvent {
    match err {
        TransportError::Status {
            code,
            message,
            metadata,
        } => TransportEvent::Status {
            code,
            message,
            metadata,
        },
        TransportError::Failure(message) => TransportEvent::Error(message),
    }
}

async fn with_deadline<F: Future>(
    remaining: Option<Duration>,
    fut: F,
) -> std::result::Result<F::Output, TransportError> {
    match remaining {
        None => Ok(fut.await),
        Some(remaining) => tokio::time::timeout(remaining, fut)
            .await
            .map_err(|_| TransportError::status(DEADLINE_EXCEEDED, "deadline exceeded")),
    }
}

/// `host:port`, `dns:///host:port` or an explicit `http(s)://` URI.
fn endpoint_uri(target: &str, secure: bool) -> Result<String> {
    if target.starts_with("http://") || target.starts_with("https://") {
        return Ok(target.to_string());
    }
    let authority = target.strip_prefix("dns:///").unwrap_or(target);
    if authority.contains("://") || authority.starts_with("unix:") {
        return Err(Error::UnsupportedTarget(target.to_string()));
    }
    let scheme = if secure { "https" } else { "http" };
    Ok(format!("{scheme}://{authority}"))
}

fn build_endpoint(target: &str, opts: &ConnectOptions) -> Result<Endpoint> {
    let uri = endpoint_uri(target, opts.tls.is_some())?;
    let mut endpoint = Endpoint::from_shared(uri)?.tcp_nodelay(true);

    if let Some(timeout) = opts.connect_timeout {
        endpoint = endpoint.connect_timeout(timeout);
    }
    if let Some(interval) = opts.keepalive_interval {
        endpoint = endpoint
            .http2_keep_alive_interval(interval)
            .keep_alive_while_idle(opts.keepalive_while_idle);
    }
    if let Some(timeout) = opts.keepalive_timeout {
        endpoint = endpoint.keep_alive_timeout(timeout);
    }
    if let Some(agent) = &opts.user_agent {
        endpoint = endpoint.user_agent(agent.clone())?;
    }
    if let Some(authority) = &opts.authority {
        let scheme = if opts.tls.is_some() { "https" } else { "http" };
        let origin = format!("{scheme}://{authority}")
            .parse::<http::Uri>()
            .map_err(|_| Error::UnsupportedTarget(authority.clone()))?;
        endpoint = endpoint.origin(origin);
    }

    if let Some(tls) = &opts.tls {
        let mut tls_cfg = ClientTlsConfig::new();

        if let Some(domain) = &tls.domain_name {
            tls_cfg = tls_cfg.domain_name(domain.clone());
        }

        tls_cfg = match &tls.ca_pem {
            Some(ca_pem) => tls_cfg.ca_certificate(Certificate::from_pem(ca_pem)),
            None => tls_cfg.with_webpki_roots(),
        };

        if let (Some(cert), Some(key)) = (&tls.identity_pem, &tls.identity_key_pem) {
            tls_cfg = tls_cfg.identity(Identity::from_pem(cert, key));
        }

        endpoint = endpoint.tls_config(tls_cfg)?;
    }

    Ok(endpoint)
}

impl Transport for TonicTransport {
    fn connect(
        &self,
        target: &str,
        credentials: &str,
        options: &str,
    ) -> std::result::Result<(), TransportError> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let options = ConnectOptions::from_descriptors(credentials, options)?;
        let endpoint = build_endpoint(target, &options)?;
        let channel = endpoint.connect_lazy();

        *self.inner.conn.write().unwrap_or_else(|p| p.into_inner()) = Some(Connection {
            target: target.to_string(),
            channel,
            endpoint,
            options: Arc::new(options),
            runtime,
        });
        self.inner.state.send_replace(ConnectivityState::Idle);
        tracing::debug!(endpoint = target, "tonic channel registered");
        Ok(())
    }

    fn close(&self) {
        let conn = self
            .inner
            .conn
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        for entry in &self.inner.inflight {
            entry.value().abort();
        }
        self.inner.inflight.clear();
        self.inner.state.send_replace(ConnectivityState::Shutdown);
        if let Some(conn) = conn {
            tracing::debug!(endpoint = %conn.target, "tonic channel closed");
        }
    }

    fn connectivity_state(&self, try_to_connect: bool) -> ConnectivityState {
        let current = *self.inner.state.borrow();
        let idle = matches!(
            current,
            ConnectivityState::Idle | ConnectivityState::TransientFailure
        );
        if !(try_to_connect && idle) {
            return current;
        }
        let Ok(conn) = self.inner.connection() else {
            return current;
        };

        self.inner.set_state(ConnectivityState::Connecting);
        let inner = Arc::clone(&self.inner);
        conn.runtime.spawn(async move {
            let next = match conn.endpoint.connect().await {
                Ok(_) => ConnectivityState::Ready,
                Err(err) => {
                    tracing::debug!(endpoint = %conn.target, error = %err, "connect probe failed");
                    ConnectivityState::TransientFailure
                }
            };
            inner.set_state(next);
        });
        ConnectivityState::Connecting
    }

    fn watch_connectivity_state(
        &self,
        from: ConnectivityState,
        deadline_ms: u64,
    ) -> BoxFuture<'static, std::result::Result<(), TransportError>> {
        let mut rx = self.inner.state.subscribe();
        let remaining = deadline::remaining_time(deadline_ms);
        async move {
            let changed = async {
                loop {
                    if *rx.borrow_and_update() != from {
                        return Ok(());
                    }
                    if rx.changed().await.is_err() {
                        return Err(TransportError::Failure("transport was dropped".to_string()));
                    }
                }
            };
            with_deadline(remaining, changed).await?
        }
        .boxed()
    }

    fn unary_call(
        &self,
        call: TransportCall,
        request: Bytes,
    ) -> BoxFuture<'static, std::result::Result<Bytes, TransportError>> {
        let inner = Arc::clone(&self.inner);
        async move {
            let conn = inner.connection()?;
            let path = method_path(&call.method)?;
            let request = conn.request(&call, request)?;
            let remaining = deadline::remaining_time(call.deadline_ms);

            let invoke = async {
                let mut grpc = conn.ready().await?;
                let response = grpc.unary(request, path, PassthroughCodec).await?;
                Ok::<_, tonic::Status>(response.into_inner())
            };
            let (entry, _, registration) = inner.track(&call.call_id);
            let outcome = with_deadline(remaining, Abortable::new(invoke, registration)).await;
            drop(entry);

            match outcome {
                Ok(Ok(Ok(bytes))) => {
                    inner.set_state(ConnectivityState::Ready);
                    Ok(bytes)
                }
                Ok(Ok(Err(status))) => Err(inner.failed(&status)),
                Ok(Err(_aborted)) => Err(TransportError::status(CANCELLED, "call cancelled")),
                Err(err) => Err(err),
            }
        }
        .boxed()
    }

    fn unary_call_sync(
        &self,
        call: TransportCall,
        request: Bytes,
    ) -> std::result::Result<Bytes, TransportError> {
        let conn = self.inner.connection()?;
        conn.runtime.block_on(self.unary_call(call, request))
    }

    fn cancel_call(&self, call_id: &str) {
        if let Some((_, handle)) = self.inner.inflight.remove(call_id) {
            handle.abort();
            tracing::debug!(call_id, "call cancelled");
        }
    }

    fn create_server_stream(
        &self,
        call: TransportCall,
        request: Bytes,
        events: TransportEvents,
    ) -> std::result::Result<Arc<dyn StreamHandle>, TransportError> {
        Ok(self.open_server_stream(&call, request, events)?)
    }

    fn create_client_stream(
        &self,
        call: TransportCall,
        events: TransportEvents,
    ) -> std::result::Result<Arc<dyn StreamHandle>, TransportError> {
        Ok(self.open_client_stream(&call, events)?)
    }

    fn create_bidi_stream(
        &self,
        call: TransportCall,
        events: TransportEvents,
    ) -> std::result::Result<Arc<dyn StreamHandle>, TransportError> {
        Ok(self.open_bidi_stream(&call, events)?)
    }

    fn create_server_stream_sync(
        &self,
        call: TransportCall,
        request: Bytes,
    ) -> std::result::Result<Box<dyn SyncStreamHandle>, TransportError> {
        let (events, rx) = event_channel();
        let handle = self.open_server_stream(&call, request, events)?;
        Ok(Box::new(TonicSyncStream::new(rx, handle, false)))
    }

    fn create_client_stream_sync(
        &self,
        call: TransportCall,
    ) -> std::result::Result<Box<dyn SyncStreamHandle>, TransportError> {
        let (events, rx) = event_channel();
        let handle = self.open_client_stream(&call, events)?;
        Ok(Box::new(TonicSyncStream::new(rx, handle, true)))
    }

    fn create_bidi_stream_sync(
        &self,
        call: TransportCall,
    ) -> std::result::Result<Box<dyn SyncStreamHandle>, TransportError> {
        let (events, rx) = event_channel();
        let handle = self.open_bidi_stream(&call, events)?;
        Ok(Box::new(TonicSyncStream::new(rx, handle, false)))
    }
}

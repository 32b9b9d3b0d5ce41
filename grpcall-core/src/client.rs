//! Call dispatcher: routes logical calls through the interceptor chain to the transport.

use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt as _;
use grpcall_value::Value;
use uuid::Uuid;

use crate::cancellation::CANCELLED_BY_HANDLE;
use crate::interceptor::{
    BidiStreamingNext, Chains, ClientStreamingNext, Interceptor, ServerStreamingNext,
    StreamingCall, Terminal, UnaryCall, UnaryFuture, UnaryNext, bidi_streaming_step,
    client_streaming_step, server_streaming_step, unary_step,
};
use crate::stream::{StreamCore, decode_message};
use crate::transport::{Transport, TransportCall, event_channel};
use crate::{
    BidiStream, CallOptions, Channel, ClientStream, GrpcError, MethodDescriptor, ServerStream,
    SyncBidiStream, SyncClientStream, SyncServerStream,
};

/// Issues calls on a [`Channel`], applying interceptors in declaration order.
#[derive(Clone)]
pub struct Client {
    channel: Channel,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    chains: Chains,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("channel", &self.channel)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Addressing and encoded metadata for one transport call.
fn prepare(method: &MethodDescriptor, options: &CallOptions) -> Result<TransportCall, GrpcError> {
    if let Some(handle) = &options.cancellation {
        handle.check()?;
    }
    Ok(TransportCall {
        method: method.path().to_string(),
        metadata: options.outgoing_metadata()?.to_descriptor().encode(),
        deadline_ms: options.absolute_deadline(),
        call_id: Uuid::new_v4().to_string(),
    })
}

impl Client {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self::with_interceptors(channel, Vec::new())
    }

    #[must_use]
    pub fn with_interceptors(channel: Channel, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        let chains = Chains::new(&interceptors);
        Self {
            channel,
            interceptors: interceptors.into(),
            chains,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    fn transport(&self, options: &CallOptions) -> Result<Arc<dyn Transport>, GrpcError> {
        if let Some(handle) = &options.cancellation {
            handle.check()?;
        }
        self.channel.transport_for_call()
    }

    pub async fn unary_call(
        &self,
        method: &MethodDescriptor,
        request: Value,
        options: CallOptions,
    ) -> Result<Value, GrpcError> {
        // Fail before any interceptor runs.
        self.transport(&options)?;

        let channel = self.channel.clone();
        let terminal: Terminal<UnaryCall, UnaryFuture> =
            Arc::new(move |call: UnaryCall| unary_terminal(&channel, call));
        let call = UnaryCall {
            method: method.clone(),
            request,
            options,
        };
        UnaryNext::new(Arc::clone(&self.chains.unary), terminal, unary_step)
            .run(call)
            .await
    }

    /// Blocking unary call. Interceptors are not applied on this path.
    pub fn unary_call_sync(
        &self,
        method: &MethodDescriptor,
        request: &Value,
        options: &CallOptions,
    ) -> Result<Value, GrpcError> {
        let transport = self.transport(options)?;
        let call = prepare(method, options)?;
        let payload = method.codec.encode(request)?;
        let response = transport.unary_call_sync(call, payload)?;
        decode_message(method.codec.as_ref(), response)
    }

    pub fn server_stream(
        &self,
        method: &MethodDescriptor,
        request: Value,
        options: CallOptions,
    ) -> Result<ServerStream, GrpcError> {
        self.transport(&options)?;

        let channel = self.channel.clone();
        let terminal: Terminal<UnaryCall, Result<ServerStream, GrpcError>> =
            Arc::new(move |call: UnaryCall| -> Result<ServerStream, GrpcError> {
                let transport = channel.transport_for_call()?;
                let tcall = prepare(&call.method, &call.options)?;
                let payload = call.method.codec.encode(&call.request)?;
                let (tx, rx) = event_channel();
                let path = tcall.method.clone();
                let handle = transport.create_server_stream(tcall, payload, tx)?;
                let core = StreamCore::new(path, handle, Arc::clone(&call.method.codec));
                Ok(ServerStream::new(core, rx, call.options.cancellation))
            });
        let call = UnaryCall {
            method: method.clone(),
            request,
            options,
        };
        ServerStreamingNext::new(
            Arc::clone(&self.chains.server_streaming),
            terminal,
            server_streaming_step,
        )
        .run(call)
    }

    pub fn client_stream(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<ClientStream, GrpcError> {
        self.transport(&options)?;

        let channel = self.channel.clone();
        let terminal: Terminal<StreamingCall, Result<ClientStream, GrpcError>> =
            Arc::new(move |call: StreamingCall| -> Result<ClientStream, GrpcError> {
                let transport = channel.transport_for_call()?;
                let tcall = prepare(&call.method, &call.options)?;
                let (tx, rx) = event_channel();
                let path = tcall.method.clone();
                let handle = transport.create_client_stream(tcall, tx)?;
                let core = StreamCore::new(path, handle, Arc::clone(&call.method.codec));
                Ok(ClientStream::new(core, rx, call.options.cancellation))
            });
        let call = StreamingCall {
            method: method.clone(),
            options,
        };
        ClientStreamingNext::new(
            Arc::clone(&self.chains.client_streaming),
            terminal,
            client_streaming_step,
        )
        .run(call)
    }

    pub fn bidi_stream(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<BidiStream, GrpcError> {
        self.transport(&options)?;

        let channel = self.channel.clone();
        let terminal: Terminal<StreamingCall, Result<BidiStream, GrpcError>> =
            Arc::new(move |call: StreamingCall| -> Result<BidiStream, GrpcError> {
                let transport = channel.transport_for_call()?;
                let tcall = prepare(&call.method, &call.options)?;
                let (tx, rx) = event_channel();
                let path = tcall.method.clone();
                let handle = transport.create_bidi_stream(tcall, tx)?;
                let core = StreamCore::new(path, handle, Arc::clone(&call.method.codec));
                Ok(BidiStream::new(core, rx, call.options.cancellation))
            });
        let call = StreamingCall {
            method: method.clone(),
            options,
        };
        BidiStreamingNext::new(
            Arc::clone(&self.chains.bidi_streaming),
            terminal,
            bidi_streaming_step,
        )
        .run(call)
    }

    /// Blocking server stream. Interceptors are not applied on this path.
    pub fn server_stream_sync(
        &self,
        method: &MethodDescriptor,
        request: &Value,
        options: &CallOptions,
    ) -> Result<SyncServerStream, GrpcError> {
        let transport = self.transport(options)?;
        let call = prepare(method, options)?;
        let payload = method.codec.encode(request)?;
        let path = call.method.clone();
        let handle = transport.create_server_stream_sync(call, payload)?;
        Ok(SyncServerStream::new(
            path,
            handle,
            Arc::clone(&method.codec),
            options.cancellation.clone(),
        ))
    }

    /// Blocking client stream. Interceptors are not applied on this path.
    pub fn client_stream_sync(
        &self,
        method: &MethodDescriptor,
        options: &CallOptions,
    ) -> Result<SyncClientStream, GrpcError> {
        let transport = self.transport(options)?;
        let call = prepare(method, options)?;
        let path = call.method.clone();
        let handle = transport.create_client_stream_sync(call)?;
        Ok(SyncClientStream::new(
            path,
            handle,
            Arc::clone(&method.codec),
            options.cancellation.clone(),
        ))
    }

    /// Blocking bidirectional stream. Interceptors are not applied on this path.
    pub fn bidi_stream_sync(
        &self,
        method: &MethodDescriptor,
        options: &CallOptions,
    ) -> Result<SyncBidiStream, GrpcError> {
        let transport = self.transport(options)?;
        let call = prepare(method, options)?;
        let path = call.method.clone();
        let handle = transport.create_bidi_stream_sync(call)?;
        Ok(SyncBidiStream::new(
            path,
            handle,
            Arc::clone(&method.codec),
            options.cancellation.clone(),
        ))
    }
}

/// Transport step of the unary chain. Runs once per attempt.
fn unary_terminal(channel: &Channel, call: UnaryCall) -> UnaryFuture {
    let prepared = channel.transport_for_call().and_then(|transport| {
        let tcall = prepare(&call.method, &call.options)?;
        let payload: Bytes = call.method.codec.encode(&call.request)?;
        Ok((transport, tcall, payload))
    });
    let (transport, tcall, payload) = match prepared {
        Ok(parts) => parts,
        Err(err) => return futures::future::ready(Err(err)).boxed(),
    };

    let codec = Arc::clone(&call.method.codec);
    let cancellation = call.options.cancellation;
    let call_id = tcall.call_id.clone();
    tracing::trace!(method = %tcall.method, call_id = %call_id, "dispatching unary call");
    let response = transport.unary_call(tcall, payload);

    async move {
        let bytes = match cancellation {
            Some(handle) => {
                tokio::select! {
                    biased;
                    () = handle.cancelled() => {
                        transport.cancel_call(&call_id);
                        return Err(GrpcError::cancelled(CANCELLED_BY_HANDLE));
                    }
                    res = response => res?,
                }
            }
            None => response.await?,
        };
        decode_message(codec.as_ref(), bytes)
    }
    .boxed()
}

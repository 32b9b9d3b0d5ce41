//! Middleware around the four call shapes.
//!
//! An interceptor opts into a call shape by returning `Some` from the matching accessor on
//! [`Interceptor`]. For each shape the participating interceptors form a chain: the first
//! one runs first and receives a `next` continuation that invokes the second, and so on until
//! the transport step. Unary results unwind in reverse order. Streaming interceptors get the
//! stream object back from `next` and may wrap it with `inspect`.

use std::sync::Arc;

use futures::future::BoxFuture;
use grpcall_value::Value;

use crate::{BidiStream, CallOptions, ClientStream, GrpcError, MethodDescriptor, ServerStream};

mod logging;
mod retry;

pub use logging::{LogFields, LogLevel, Logger, LoggingInterceptor, LoggingOptions, TracingLogger};
pub use retry::{RetryInterceptor, RetryPolicy};

pub type UnaryFuture = BoxFuture<'static, Result<Value, GrpcError>>;

/// A call with a single request message (unary and server-streaming).
#[derive(Debug, Clone)]
pub struct UnaryCall {
    pub method: MethodDescriptor,
    pub request: Value,
    pub options: CallOptions,
}

/// A call whose requests are written after it starts (client-streaming and bidi).
#[derive(Debug, Clone)]
pub struct StreamingCall {
    pub method: MethodDescriptor,
    pub options: CallOptions,
}

pub trait UnaryInterceptor: Send + Sync {
    fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryFuture;
}

pub trait ServerStreamingInterceptor: Send + Sync {
    fn intercept(
        &self,
        call: UnaryCall,
        next: ServerStreamingNext,
    ) -> Result<ServerStream, GrpcError>;
}

pub trait ClientStreamingInterceptor: Send + Sync {
    fn intercept(
        &self,
        call: StreamingCall,
        next: ClientStreamingNext,
    ) -> Result<ClientStream, GrpcError>;
}

pub trait BidiStreamingInterceptor: Send + Sync {
    fn intercept(&self, call: StreamingCall, next: BidiStreamingNext)
    -> Result<BidiStream, GrpcError>;
}

/// An interceptor with any subset of the four capabilities.
pub trait Interceptor: Send + Sync {
    fn unary(&self) -> Option<&dyn UnaryInterceptor> {
        None
    }

    fn server_streaming(&self) -> Option<&dyn ServerStreamingInterceptor> {
        None
    }

    fn client_streaming(&self) -> Option<&dyn ClientStreamingInterceptor> {
        None
    }

    fn bidi_streaming(&self) -> Option<&dyn BidiStreamingInterceptor> {
        None
    }
}

pub(crate) type Interceptors = Arc<[Arc<dyn Interceptor>]>;

pub(crate) type Terminal<C, R> = Arc<dyn Fn(C) -> R + Send + Sync>;
type StepFn<C, R> = fn(&dyn Interceptor, C, Next<C, R>) -> R;

/// Continuation handed to an interceptor. Cloneable so it can be invoked more than once.
pub struct Next<C, R> {
    chain: Interceptors,
    index: usize,
    terminal: Terminal<C, R>,
    step: StepFn<C, R>,
}

impl<C, R> Clone for Next<C, R> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            index: self.index,
            terminal: Arc::clone(&self.terminal),
            step: self.step,
        }
    }
}

impl<C, R> std::fmt::Debug for Next<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

impl<C, R> Next<C, R> {
    pub(crate) fn new(chain: Interceptors, terminal: Terminal<C, R>, step: StepFn<C, R>) -> Self {
        Self {
            chain,
            index: 0,
            terminal,
            step,
        }
    }

    /// Invoke the rest of the chain.
    pub fn run(&self, call: C) -> R {
        match self.chain.get(self.index) {
            Some(interceptor) => {
                let next = Self {
                    chain: Arc::clone(&self.chain),
                    index: self.index + 1,
                    terminal: Arc::clone(&self.terminal),
                    step: self.step,
                };
                (self.step)(interceptor.as_ref(), call, next)
            }
            None => (self.terminal)(call),
        }
    }
}

pub type UnaryNext = Next<UnaryCall, UnaryFuture>;
pub type ServerStreamingNext = Next<UnaryCall, Result<ServerStream, GrpcError>>;
pub type ClientStreamingNext = Next<StreamingCall, Result<ClientStream, GrpcError>>;
pub type BidiStreamingNext = Next<StreamingCall, Result<BidiStream, GrpcError>>;

pub(crate) fn unary_step(i: &dyn Interceptor, call: UnaryCall, next: UnaryNext) -> UnaryFuture {
    match i.unary() {
        Some(u) => u.intercept(call, next),
        None => next.run(call),
    }
}

pub(crate) fn server_streaming_step(
    i: &dyn Interceptor,
    call: UnaryCall,
    next: ServerStreamingNext,
) -> Result<ServerStream, GrpcError> {
    match i.server_streaming() {
        Some(s) => s.intercept(call, next),
        None => next.run(call),
    }
}

pub(crate) fn client_streaming_step(
    i: &dyn Interceptor,
    call: StreamingCall,
    next: ClientStreamingNext,
) -> Result<ClientStream, GrpcError> {
    match i.client_streaming() {
        Some(s) => s.intercept(call, next),
        None => next.run(call),
    }
}

pub(crate) fn bidi_streaming_step(
    i: &dyn Interceptor,
    call: StreamingCall,
    next: BidiStreamingNext,
) -> Result<BidiStream, GrpcError> {
    match i.bidi_streaming() {
        Some(s) => s.intercept(call, next),
        None => next.run(call),
    }
}

/// Interceptors participating in one call shape, in declaration order.
#[derive(Clone)]
pub(crate) struct Chains {
    pub(crate) unary: Interceptors,
    pub(crate) server_streaming: Interceptors,
    pub(crate) client_streaming: Interceptors,
    pub(crate) bidi_streaming: Interceptors,
}

impl Chains {
    pub(crate) fn new(interceptors: &[Arc<dyn Interceptor>]) -> Self {
        let filter = |has: fn(&dyn Interceptor) -> bool| -> Interceptors {
            interceptors
                .iter()
                .filter(|i| has(i.as_ref()))
                .cloned()
                .collect()
        };
        Self {
            unary: filter(|i| i.unary().is_some()),
            server_streaming: filter(|i| i.server_streaming().is_some()),
            client_streaming: filter(|i| i.client_streaming().is_some()),
            bidi_streaming: filter(|i| i.bidi_streaming().is_some()),
        }
    }
}

macro_rules! closure_interceptor {
    ($name:ident, $fn_name:ident, $trait:ident, $accessor:ident, $call:ty, $next:ty, $out:ty) => {
        struct $name<F>(F);

        impl<F> $trait for $name<F>
        where
            F: Fn($call, $next) -> $out + Send + Sync + 'static,
        {
            fn intercept(&self, call: $call, next: $next) -> $out {
                (self.0)(call, next)
            }
        }

        impl<F> Interceptor for $name<F>
        where
            F: Fn($call, $next) -> $out + Send + Sync + 'static,
        {
            fn $accessor(&self) -> Option<&dyn $trait> {
                Some(self)
            }
        }

        pub fn $fn_name<F>(f: F) -> Arc<dyn Interceptor>
        where
            F: Fn($call, $next) -> $out + Send + Sync + 'static,
        {
            Arc::new($name(f))
        }
    };
}

closure_interceptor!(
    UnaryFn,
    unary_fn,
    UnaryInterceptor,
    unary,
    UnaryCall,
    UnaryNext,
    UnaryFuture
);
closure_interceptor!(
    ServerStreamingFn,
    server_streaming_fn,
    ServerStreamingInterceptor,
    server_streaming,
    UnaryCall,
    ServerStreamingNext,
    Result<ServerStream, GrpcError>
);
closure_interceptor!(
    ClientStreamingFn,
    client_streaming_fn,
    ClientStreamingInterceptor,
    client_streaming,
    StreamingCall,
    ClientStreamingNext,
    Result<ClientStream, GrpcError>
);
closure_interceptor!(
    BidiStreamingFn,
    bidi_streaming_fn,
    BidiStreamingInterceptor,
    bidi_streaming,
    StreamingCall,
    BidiStreamingNext,
    Result<BidiStream, GrpcError>
);

mod cancellation;
mod channel;
mod client;
mod codec;
mod credentials;
mod error;
mod method;
mod options;
mod status;
mod stream;

pub mod deadline;
pub mod descriptor;
pub mod interceptor;
pub mod metadata;
pub mod transport;

pub use cancellation::CancellationHandle;
pub use channel::{Channel, ChannelError, normalize_target, validate_target};
pub use client::Client;
pub use codec::{JsonCodec, MessageCodec, RawCodec};
pub use credentials::{CallCredentials, ChannelCredentials, SslCredentials};
pub use deadline::{Deadline, NO_DEADLINE};
pub use error::{GrpcError, Result};
pub use interceptor::{
    Interceptor, LogLevel, Logger, LoggingInterceptor, LoggingOptions, RetryInterceptor,
    RetryPolicy, TracingLogger,
};
pub use metadata::{Metadata, MetadataError, MetadataValue};
pub use method::{MethodDescriptor, MethodKind, MethodPath};
pub use options::{CallOptions, ChannelOptions};
pub use status::{Status, StatusCode};
pub use stream::{
    BidiStream, BidiStreamEvent, CallState, ClientStream, ClientStreamEvent, ServerStream,
    ServerStreamEvent, SyncBidiStream, SyncClientStream, SyncServerStream,
};
pub use transport::{ConnectivityState, Transport};

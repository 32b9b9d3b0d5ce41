use grpcall_core::MetadataError;
use grpcall_core::descriptor::DescriptorError;
use grpcall_core::transport::TransportError;

use crate::TransportErrorKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] tonic::transport::Error),

    #[error("unsupported target '{0}'")]
    UnsupportedTarget(String),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("invalid metadata key: {0}")]
    MetadataKey(String),

    #[error("invalid metadata value for '{0}'")]
    MetadataValue(String),

    #[error("invalid gRPC method path: {0}")]
    InvalidMethodPath(String),

    #[error("no tokio runtime is running on the connecting thread")]
    NoRuntime,

    #[error("transport is not connected")]
    NotConnected,

    #[error("stream is closed for writing")]
    StreamClosed,
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::InvalidEndpoint(_) => TransportErrorKind::InvalidEndpoint,
            Self::UnsupportedTarget(_) => TransportErrorKind::UnsupportedTarget,
            Self::Descriptor(_) => TransportErrorKind::Descriptor,
            Self::MetadataKey(_) => TransportErrorKind::MetadataKey,
            Self::MetadataValue(_) => TransportErrorKind::MetadataValue,
            Self::InvalidMethodPath(_) => TransportErrorKind::InvalidMethodPath,
            Self::NoRuntime => TransportErrorKind::NoRuntime,
            Self::NotConnected => TransportErrorKind::NotConnected,
            Self::StreamClosed => TransportErrorKind::StreamClosed,
        }
    }
}

impl From<MetadataError> for Error {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::InvalidKey(key) => Self::MetadataKey(key),
            MetadataError::BinaryValueForTextKey(key) => Self::MetadataValue(key),
        }
    }
}

impl From<Error> for TransportError {
    fn from(err: Error) -> Self {
        match err.kind() {
            // Malformed call inputs surface as a status rather than a transport failure.
            TransportErrorKind::MetadataKey
            | TransportErrorKind::MetadataValue
            | TransportErrorKind::InvalidMethodPath => {
                TransportError::status(tonic::Code::InvalidArgument as i32, err.to_string())
            }
            kind => TransportError::Failure(format!("{kind}: {err}")),
        }
    }
}

use std::error::Error as StdError;
use std::sync::Arc;

use crate::descriptor::MetadataDescriptor;
use crate::transport::TransportError;
use crate::{Metadata, Status, StatusCode};

pub type Result<T> = std::result::Result<T, GrpcError>;

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// The single error type every call failure is normalized into.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct GrpcError {
    code: StatusCode,
    message: String,
    details: Option<String>,
    metadata: Option<Metadata>,
    #[source]
    cause: Option<Cause>,
}

impl GrpcError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            metadata: None,
            cause: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unknown, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    /// Wrap a foreign error as UNKNOWN, keeping it as the cause.
    pub fn from_error<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::unknown(err.to_string()).with_cause(err)
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    #[must_use]
    pub fn code(&self) -> StatusCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    #[must_use]
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    #[must_use]
    pub fn is(&self, code: StatusCode) -> bool {
        self.code == code
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.code.is_client_error()
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.code.is_server_error()
    }

    /// Build the error published for a non-OK terminal status.
    #[must_use]
    pub fn from_status(status: &Status) -> Self {
        Self::new(status.code, status.details.clone()).with_metadata(status.metadata.clone())
    }

    /// Normalize a status reported by the transport (code, message, trailing-metadata
    /// descriptor). A descriptor that fails to decode is dropped. An error never carries
    /// OK, so a failure reported with code 0 becomes UNKNOWN.
    #[must_use]
    pub fn from_transport_status(code: i32, message: &str, metadata: &str) -> Self {
        let code = match StatusCode::from_i32(code) {
            StatusCode::Ok => StatusCode::Unknown,
            code => code,
        };
        let err = Self::new(code, message);
        match decode_trailers(metadata) {
            Some(md) => err.with_metadata(md),
            None => err,
        }
    }
}

/// Decode a trailing-metadata descriptor; empty input means no trailers.
pub(crate) fn decode_trailers(metadata: &str) -> Option<Metadata> {
    if metadata.trim().is_empty() {
        return None;
    }
    match MetadataDescriptor::decode(metadata).and_then(|d| d.to_metadata()) {
        Ok(md) => Some(md),
        Err(err) => {
            tracing::warn!(error = %err, "dropping undecodable trailing metadata");
            None
        }
    }
}

impl From<TransportError> for GrpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status {
                code,
                message,
                metadata,
            } => Self::from_transport_status(code, &message, &metadata),
            TransportError::Failure(message) => Self::unknown(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = GrpcError::unavailable("try later");
        assert_eq!(err.to_string(), "UNAVAILABLE: try later");
        assert!(err.is(StatusCode::Unavailable));
        assert!(err.is_retryable());
        assert!(err.is_server_error());
    }

    #[test]
    fn transport_status_keeps_trailers() {
        let err: GrpcError = TransportError::Status {
            code: 5,
            message: "nope".to_string(),
            metadata: r#"{"x-reason":["gone"]}"#.to_string(),
        }
        .into();

        assert_eq!(err.code(), StatusCode::NotFound);
        assert_eq!(err.message(), "nope");
        assert_eq!(
            err.metadata().and_then(|md| md.get_str("x-reason")),
            Some("gone")
        );
    }

    #[test]
    fn bad_trailers_are_dropped_not_rethrown() {
        let err = GrpcError::from_transport_status(13, "boom", "{not json");
        assert_eq!(err.code(), StatusCode::Internal);
        assert!(err.metadata().is_none());
    }

    #[test]
    fn ok_code_on_a_failure_becomes_unknown() {
        let err: GrpcError = TransportError::status(0, "failed without a code").into();
        assert_eq!(err.code(), StatusCode::Unknown);
        assert_eq!(err.message(), "failed without a code");
        assert!(!err.is(StatusCode::Ok));
    }

    #[test]
    fn transport_failure_is_unknown() {
        let err: GrpcError = TransportError::Failure("socket closed".to_string()).into();
        assert_eq!(err.code(), StatusCode::Unknown);
        assert_eq!(err.message(), "socket closed");
    }

    #[test]
    fn cause_is_exposed_as_source() {
        let io = std::io::Error::other("disk");
        let err = GrpcError::from_error(io);
        assert_eq!(err.code(), StatusCode::Unknown);
        assert!(StdError::source(&err).is_some());
        assert_eq!(err.cause().map(ToString::to_string), Some("disk".to_string()));
    }
}

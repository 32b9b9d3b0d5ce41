use crate::Metadata;

/// The closed set of gRPC status codes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    /// Codes outside `0..=16` map to `Unknown`.
    #[must_use]
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Retryable by default: the failure may go away if the call is attempted again.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::DeadlineExceeded | Self::ResourceExhausted | Self::Aborted
        )
    }

    #[must_use]
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            Self::InvalidArgument
                | Self::NotFound
                | Self::AlreadyExists
                | Self::PermissionDenied
                | Self::FailedPrecondition
                | Self::OutOfRange
                | Self::Unauthenticated
        )
    }

    #[must_use]
    pub fn is_server_error(self) -> bool {
        matches!(
            self,
            Self::Unknown
                | Self::Internal
                | Self::Unavailable
                | Self::DataLoss
                | Self::Unimplemented
        )
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "The operation completed successfully",
            Self::Cancelled => "The operation was cancelled",
            Self::Unknown => "Unknown error occurred",
            Self::InvalidArgument => "Client specified an invalid argument",
            Self::DeadlineExceeded => "Deadline expired before operation could complete",
            Self::NotFound => "Requested entity was not found",
            Self::AlreadyExists => "Entity already exists",
            Self::PermissionDenied => "Permission denied",
            Self::ResourceExhausted => "Resource has been exhausted",
            Self::FailedPrecondition => {
                "Operation was rejected because the system is not in a required state"
            }
            Self::Aborted => "The operation was aborted",
            Self::OutOfRange => "Operation attempted past valid range",
            Self::Unimplemented => "Operation is not implemented or not supported",
            Self::Internal => "Internal server error",
            Self::Unavailable => "The service is currently unavailable",
            Self::DataLoss => "Unrecoverable data loss or corruption",
            Self::Unauthenticated => "Request does not have valid authentication credentials",
        }
    }
}

/// Final status of a call as published on streams.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub code: StatusCode,
    pub details: String,
    pub metadata: Metadata,
}

impl Status {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            details: String::new(),
            metadata: Metadata::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use strum::IntoEnumIterator as _;

    use super::*;

    #[test]
    fn numeric_values_round_trip() {
        for code in StatusCode::iter() {
            assert_eq!(StatusCode::from_i32(code.as_i32()), code);
        }
        assert_eq!(StatusCode::iter().count(), 17);
    }

    #[test]
    fn out_of_range_is_unknown() {
        assert_eq!(StatusCode::from_i32(-1), StatusCode::Unknown);
        assert_eq!(StatusCode::from_i32(17), StatusCode::Unknown);
    }

    #[test]
    fn display_uses_canonical_names() {
        assert_eq!(StatusCode::DeadlineExceeded.to_string(), "DEADLINE_EXCEEDED");
        assert_eq!(StatusCode::Ok.to_string(), "OK");
        assert_eq!(
            StatusCode::from_str("UNAVAILABLE").ok(),
            Some(StatusCode::Unavailable)
        );
    }

    #[test]
    fn categories() {
        assert!(StatusCode::Unavailable.is_retryable());
        assert!(StatusCode::Unavailable.is_server_error());
        assert!(!StatusCode::Unavailable.is_client_error());

        assert!(StatusCode::Aborted.is_retryable());
        assert!(!StatusCode::Aborted.is_server_error());

        assert!(StatusCode::Unauthenticated.is_client_error());
        assert!(!StatusCode::Unauthenticated.is_retryable());

        assert!(!StatusCode::Ok.is_retryable());
        assert!(!StatusCode::Ok.is_client_error());
        assert!(!StatusCode::Ok.is_server_error());
        assert!(!StatusCode::Cancelled.is_retryable());
    }
}

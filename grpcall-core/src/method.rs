use std::fmt;
use std::sync::Arc;

use crate::GrpcError;
use crate::codec::{JsonCodec, MessageCodec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

/// A validated `/{service}/{method}` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    path: Arc<str>,
    split: usize,
}

fn valid_service(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

fn valid_method(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl MethodPath {
    pub fn parse(path: &str) -> Result<Self, GrpcError> {
        let invalid = || GrpcError::invalid_argument(format!("invalid method path: {path:?}"));

        let rest = path.strip_prefix('/').ok_or_else(invalid)?;
        let (service, method) = rest.split_once('/').ok_or_else(invalid)?;
        if !valid_service(service) || !valid_method(method) {
            return Err(invalid());
        }

        Ok(Self {
            path: Arc::from(path),
            split: service.len() + 1,
        })
    }

    pub fn new(service: &str, method: &str) -> Result<Self, GrpcError> {
        Self::parse(&format!("/{service}/{method}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.path[1..self.split]
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.path[self.split + 1..]
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl std::str::FromStr for MethodPath {
    type Err = GrpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Method path plus the codec used for its request and response messages.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub path: MethodPath,
    pub codec: Arc<dyn MessageCodec>,
}

impl MethodDescriptor {
    #[must_use]
    pub fn new(path: MethodPath) -> Self {
        Self {
            path,
            codec: Arc::new(JsonCodec),
        }
    }

    pub fn parse(path: &str) -> Result<Self, GrpcError> {
        MethodPath::parse(path).map(Self::new)
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.path.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_segments() {
        let path = MethodPath::parse("/pkg.Svc/Method").unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(path.service(), "pkg.Svc");
        assert_eq!(path.method(), "Method");
        assert_eq!(path.to_string(), "/pkg.Svc/Method");

        let built = MethodPath::new("a_b", "C1").unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(built.as_str(), "/a_b/C1");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in [
            "",
            "/",
            "pkg.Svc/Method",
            "/pkg.Svc",
            "/pkg.Svc/",
            "//Method",
            "/pkg.Svc/Method/extra",
            "/pkg.Svc/Me.thod",
            "/pkg Svc/Method",
        ] {
            assert!(MethodPath::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn method_kind_names() {
        assert_eq!(MethodKind::ServerStreaming.to_string(), "server_streaming");
    }
}

//! [`grpcall_core::Transport`] backed by tonic.

mod codec;
mod error;
mod kind;
mod metadata;
mod stream;
mod transport;
mod types;

pub use error::{Error, Result};
pub use kind::TransportErrorKind;
pub use transport::{DEFAULT_HIGH_WATER, TonicTransport};
pub use types::{ConnectOptions, TlsConfig};

mod bidi;
mod client;
mod engine;
mod server;
mod sync;

pub use bidi::{BidiStream, BidiStreamEvent};
pub use client::{ClientStream, ClientStreamEvent};
pub use engine::CallState;
pub use server::{ServerStream, ServerStreamEvent};
pub use sync::{SyncBidiStream, SyncClientStream, SyncServerStream};

pub(crate) use engine::{StreamCore, decode_message};

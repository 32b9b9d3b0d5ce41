use std::sync::Arc;

use tokio::sync::watch;

use crate::GrpcError;

pub(crate) const CANCELLED_BY_HANDLE: &str = "call cancelled via cancellation handle";

/// Caller-owned cancellation signal shared by every clone.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl CancellationHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Later calls are no-ops.
    pub fn cancel(&self) {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancellation.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// `Err(CANCELLED)` when already signalled.
    pub fn check(&self) -> Result<(), GrpcError> {
        if self.is_cancelled() {
            Err(GrpcError::cancelled(CANCELLED_BY_HANDLE))
        } else {
            Ok(())
        }
    }
}

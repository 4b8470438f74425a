// src/engine/cancel.rs

use std::sync::Arc;

use tokio::sync::watch;

/// Requests cooperative cancellation of a running `join()`.
///
/// Cancelling fails every task that has not been dispatched yet with
/// `FailureReason::Cancelled`; tasks already running are allowed to finish.
/// Cloneable and usable from any thread, e.g. a Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receiver_observes_cancel() {
        let (handle, mut rx) = CancelHandle::new();
        assert!(!handle.is_cancelled());

        let clone = handle.clone();
        clone.cancel();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(handle.is_cancelled());
    }
}

// src/controller/cancel.rs

//! Cancellation sources for a running sequence.
//!
//! Two origins feed one check:
//! - the local [`CancelToken`] (watchdog, forced reset, shutdown), and
//! - the remote `enabled` flag, read live from the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::store::DescriptorStore;
use crate::types::StopReason;

/// Sending half: request cooperative cancellation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving half, held by the runner.
#[derive(Debug, Clone)]
pub struct CancelListener {
    rx: watch::Receiver<bool>,
}

impl CancelListener {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if every
    /// token was dropped without cancelling.
    pub async fn cancelled(&mut self) {
        let closed = self.rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancel_pair() -> (CancelToken, CancelListener) {
    let (tx, rx) = watch::channel(false);
    (CancelToken { tx: Arc::new(tx) }, CancelListener { rx })
}

/// Combined local + remote stop check.
#[derive(Debug, Clone)]
pub struct CancellationSource {
    local: CancelListener,
    store: Arc<dyn DescriptorStore>,
}

impl CancellationSource {
    pub fn new(local: CancelListener, store: Arc<dyn DescriptorStore>) -> Self {
        Self { local, store }
    }

    pub fn local(&mut self) -> &mut CancelListener {
        &mut self.local
    }

    /// Check both origins. A failed remote read counts as "still enabled":
    /// the flag only gates early exit.
    pub async fn stop_reason(&self) -> Option<StopReason> {
        if self.local.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        match self.store.read_enabled().await {
            Ok(true) => None,
            Ok(false) => Some(StopReason::DisabledByUser),
            Err(err) => {
                warn!(error = %err, "live read of enabled flag failed; continuing");
                None
            }
        }
    }

    /// Sleep for `total` in slices of at most `slice`, re-checking both
    /// origins after every slice. Local cancellation interrupts a slice
    /// immediately.
    pub async fn sleep(&mut self, total: Duration, slice: Duration) -> Option<StopReason> {
        let mut remaining = total;
        while !remaining.is_zero() {
            let step = remaining.min(slice);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = self.local.cancelled() => return Some(StopReason::Cancelled),
            }
            remaining = remaining.saturating_sub(step);
            if let Some(reason) = self.stop_reason().await {
                return Some(reason);
            }
        }
        None
    }
}

//! Coalescing restore trigger.
//!
//! Restore requests often arrive in bursts (several `AddPackage` commands in
//! one submission). The trigger collapses every request arriving within a
//! debounce window into one actual restore and fans the single result out to
//! all waiters from that window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::restore::{PackageRestoreContext, RestoreResult};

pub struct CoalescingTrigger {
    request_tx: mpsc::UnboundedSender<oneshot::Sender<RestoreResult>>,
}

impl CoalescingTrigger {
    /// Start the trigger task over `context` with the given debounce window.
    pub fn new(context: Arc<PackageRestoreContext>, window: Duration) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(context, window, request_rx));
        Self { request_tx }
    }

    /// Request a restore; resolves with the result of the coalesced pass
    /// covering this request.
    pub async fn request_restore(&self) -> RestoreResult {
        let (tx, rx) = oneshot::channel();
        if self.request_tx.send(tx).is_err() {
            return RestoreResult::failure(vec!["restore trigger stopped".to_string()]);
        }
        rx.await
            .unwrap_or_else(|_| RestoreResult::failure(vec!["restore trigger stopped".to_string()]))
    }
}

async fn run(
    context: Arc<PackageRestoreContext>,
    window: Duration,
    mut request_rx: mpsc::UnboundedReceiver<oneshot::Sender<RestoreResult>>,
) {
    while let Some(first) = request_rx.recv().await {
        let mut waiters = vec![first];
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                more = request_rx.recv() => match more {
                    Some(waiter) => waiters.push(waiter),
                    None => break,
                },
            }
        }
        debug!(waiters = waiters.len(), "running coalesced restore");
        let result = context.restore().await;
        for waiter in waiters {
            // A departed waiter is fine; the restore still happened.
            let _ = waiter.send(result.clone());
        }
    }
}

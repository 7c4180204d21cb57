//! Caller-driven cancellation of engine operations

use crate::error::{FgaError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Passed to every public operation; firing it abandons the pending engine call
#[async_trait]
pub trait CancellationToken: Send + Sync {
    /// Completes once the caller has given up on the operation
    async fn cancelled(&self);

    /// Polled before a call is issued, so a token fired up front costs no round trip
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// For callers with nothing to cancel
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

#[async_trait]
impl CancellationToken for NeverCancel {
    async fn cancelled(&self) {
        futures::future::pending::<()>().await;
    }
}

/// Shared handle; clones observe the same [`CancellationSource::cancel`]
#[derive(Debug, Default, Clone)]
pub struct CancellationSource {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl CancellationToken for CancellationSource {
    async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs `fut` unless `cancel` fires first
pub async fn run_cancellable<T, F>(cancel: &dyn CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(FgaError::Cancelled);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(FgaError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes_without_cancellation() {
        let result = run_cancellable(&NeverCancel, async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_work() {
        let source = CancellationSource::new();
        let trigger = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<()> = run_cancellable(&source, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(FgaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_short_circuits() {
        let source = CancellationSource::new();
        source.cancel();
        let result = run_cancellable(&source, async { Ok(1) }).await;
        assert!(matches!(result, Err(FgaError::Cancelled)));
    }
}

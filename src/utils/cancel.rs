//! Cooperative cancellation flag for in-flight transfers.
//!
//! Clones share the same underlying state, so cancelling any clone is
//! visible to all holders. The chunk pump checks the flag before every
//! send, which bounds wasted work after cancellation to less than one
//! chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A clonable, async-aware cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    /// Create a new, uncancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to all holders.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Check whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Rearm the flag for a fresh transfer.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::Release);
    }

    /// Wait until cancellation is signalled. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        assert!(!CancelFlag::new().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());

        flag.reset();
        assert!(!clone.is_cancelled());
    }

    #[tokio::test]
    async fn wait_returns_once_cancelled() {
        let flag = CancelFlag::new();
        let waiter = flag.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        flag.cancel();
        task.await.unwrap();
    }
}

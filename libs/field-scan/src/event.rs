//! Manual-reset event
//!
//! A flag that stays set until explicitly reset. Waiters registered before
//! `set()` and waiters arriving afterwards both observe it.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct Event {
    flag: AtomicBool,
    notify: Notify,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Wait until the flag is set; returns immediately when it already is
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent `set()`
            // cannot slip between the check and the await
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_when_already_set() {
        let event = Event::new();
        event.set();
        event.wait().await;
        assert!(event.is_set());
    }

    #[tokio::test]
    async fn test_set_wakes_waiter() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = event.clone();
            tokio::spawn(async move { event.wait().await })
        };

        tokio::task::yield_now().await;
        event.set();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .expect("task joined");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_blocks_again() {
        let event = Event::new();
        event.set();
        event.reset();
        let result = tokio::time::timeout(Duration::from_millis(50), event.wait()).await;
        assert!(result.is_err());
    }
}

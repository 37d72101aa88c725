//! Cancellable one-shot timer.
//!
//! A [`Timer`] owns at most one pending callback. Arming an armed timer
//! replaces the pending callback, so repeated arming debounces to a single
//! firing. Dropping the timer cancels it.
//!
//! A callback that runs to completion cannot tell whether it was superseded
//! between waking up and taking its owner's lock, so owners tag each arming
//! with a generation and ignore callbacks whose generation is stale.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A resettable, cancellable delayed task.
///
/// Must be armed from within a Tokio runtime.
#[derive(Debug, Default)]
pub struct Timer {
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay`, cancelling any callback already pending.
    pub fn arm<F>(&mut self, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        }));
    }

    /// Cancel the pending callback.
    ///
    /// Returns whether a callback was still pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Check if a callback is pending.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Forget the pending callback without cancelling it.
    ///
    /// Used by a callback that is retiring its own timer.
    pub fn release(&mut self) {
        self.handle = None;
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bump(count: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let count = Arc::clone(count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(3), bump(&count));

        tokio::time::sleep(Duration::from_millis(2_999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_debounces() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();

        for _ in 0..5 {
            timer.arm(Duration::from_secs(3), bump(&count));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop() {
        let count = Arc::new(AtomicUsize::new(0));

        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(1), bump(&count));
        assert!(timer.cancel());
        assert!(!timer.cancel());

        {
            let mut dropped = Timer::new();
            dropped.arm(Duration::from_secs(1), bump(&count));
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

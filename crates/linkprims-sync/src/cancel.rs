use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Result, SyncError};
use crate::lock_unpoisoned;
use crate::semaphore::{Acquire, Semaphore, SemaphoreShared};

/// Cooperative cancellation handle shared between a controller and the
/// threads it may need to tear down.
///
/// Every blocking call in this crate takes an optional token. Cancelling the
/// token wakes all waits currently registered on it and makes every later
/// wait fail immediately with [`SyncError::Cancelled`].
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    waiting: Mutex<Vec<Arc<SemaphoreShared>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the token and wake every wait registered on it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let waiting: Vec<_> = lock_unpoisoned(&self.inner.waiting).clone();
        for semaphore in waiting {
            semaphore.interrupt();
        }
    }

    /// Sleep for `duration` unless the token is cancelled first.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let gate = Semaphore::new(0);
        match gate.acquire(Some(Instant::now() + duration), Some(self)) {
            Acquire::Cancelled => Err(SyncError::Cancelled),
            Acquire::Acquired | Acquire::TimedOut => Ok(()),
        }
    }

    pub(crate) fn register(&self, semaphore: &Arc<SemaphoreShared>) -> Registration<'_> {
        lock_unpoisoned(&self.inner.waiting).push(Arc::clone(semaphore));
        Registration {
            token: self,
            semaphore: Arc::clone(semaphore),
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Keeps a semaphore registered on a token for the duration of one wait.
pub(crate) struct Registration<'a> {
    token: &'a CancelToken,
    semaphore: Arc<SemaphoreShared>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut waiting = lock_unpoisoned(&self.token.inner.waiting);
        if let Some(pos) = waiting.iter().position(|s| Arc::ptr_eq(s, &self.semaphore)) {
            waiting.swap_remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_runs_to_completion_without_cancel() {
        let token = CancelToken::new();
        let started = Instant::now();
        token
            .sleep(Duration::from_millis(20))
            .expect("sleep should not be cancelled");
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_interrupts_sleep_promptly() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            let result = sleeper.sleep(Duration::from_secs(30));
            (result, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        token.cancel();

        let (result, elapsed) = handle.join().expect("sleeper should not panic");
        assert_eq!(result, Err(SyncError::Cancelled));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn registrations_are_removed_after_wait() {
        let token = CancelToken::new();
        token
            .sleep(Duration::from_millis(1))
            .expect("sleep should complete");
        assert!(lock_unpoisoned(&token.inner.waiting).is_empty());
    }
}

use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::lock_unpoisoned;

/// Outcome of a semaphore acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquire {
    Acquired,
    TimedOut,
    Cancelled,
}

pub(crate) struct SemaphoreShared {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl SemaphoreShared {
    /// Wake every thread blocked on this semaphore without granting a permit.
    ///
    /// Taking the permit lock first guarantees a waiter that has not yet
    /// re-checked its token cannot miss the wakeup.
    pub(crate) fn interrupt(&self) {
        let _permits = lock_unpoisoned(&self.permits);
        self.cond.notify_all();
    }
}

/// Counting semaphore whose waits can be interrupted by a [`CancelToken`].
pub(crate) struct Semaphore {
    shared: Arc<SemaphoreShared>,
}

impl Semaphore {
    pub(crate) fn new(initial: usize) -> Self {
        Self {
            shared: Arc::new(SemaphoreShared {
                permits: Mutex::new(initial),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut permits = lock_unpoisoned(&self.shared.permits);
        *permits = permits.saturating_add(count);
        if count == 1 {
            self.shared.cond.notify_one();
        } else {
            self.shared.cond.notify_all();
        }
    }

    /// Take a permit if one is available, without blocking.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut permits = lock_unpoisoned(&self.shared.permits);
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn acquire(&self, deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Acquire {
        let _registration = cancel.map(|token| token.register(&self.shared));
        let mut permits = lock_unpoisoned(&self.shared.permits);
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Acquire::Cancelled;
            }
            if *permits > 0 {
                *permits -= 1;
                return Acquire::Acquired;
            }
            permits = match deadline {
                None => self
                    .shared
                    .cond
                    .wait(permits)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Acquire::TimedOut;
                    }
                    self.shared
                        .cond
                        .wait_timeout(permits, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// Auto-reset event: `set` wakes exactly one `wait`, then the event clears.
pub(crate) struct Event {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub(crate) fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn set(&self) {
        let mut signalled = lock_unpoisoned(&self.signalled);
        *signalled = true;
        self.cond.notify_one();
    }

    pub(crate) fn wait(&self) {
        let mut signalled = lock_unpoisoned(&self.signalled);
        while !*signalled {
            signalled = self
                .cond
                .wait(signalled)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *signalled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn acquire_consumes_permits() {
        let sem = Semaphore::new(2);
        assert_eq!(sem.acquire(None, None), Acquire::Acquired);
        assert_eq!(sem.acquire(None, None), Acquire::Acquired);
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(sem.acquire(Some(deadline), None), Acquire::TimedOut);
    }

    #[test]
    fn try_acquire_never_blocks() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
    }

    #[test]
    fn cancelled_token_wins_over_blocking() {
        let sem = Semaphore::new(0);
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(sem.acquire(None, Some(&token)), Acquire::Cancelled);
    }
}

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};
use crate::lock_unpoisoned;
use crate::semaphore::{Acquire, Event, Semaphore};

#[derive(Default)]
struct Waiters {
    count: usize,
    was_broadcast: bool,
}

/// Condition variable built from a waiter counter, a counting semaphore and
/// an auto-reset rendezvous event.
///
/// Unlike [`std::sync::Condvar`], waits accept a [`CancelToken`], and
/// [`broadcast`](Self::broadcast) does not return until every woken waiter
/// has left the semaphore and is competing for the external lock again.
///
/// `broadcast` must be called while holding the external lock so no new
/// waiter can join the generation being released.
pub struct ConditionVariable {
    waiters: Mutex<Waiters>,
    queue: Semaphore,
    waiters_done: Event,
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(Waiters::default()),
            queue: Semaphore::new(0),
            waiters_done: Event::new(),
        }
    }

    /// Release `guard`, block until signalled, then reacquire `lock`.
    ///
    /// Returns the reacquired guard and `false` if `timeout` elapsed first.
    /// A cancelled wait returns [`SyncError::Cancelled`] with the lock released.
    ///
    /// A signal that races the timeout is consumed by this waiter and
    /// reported as `true`. Callers still re-check their condition in a loop.
    pub fn wait<'a, T>(
        &self,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<(MutexGuard<'a, T>, bool)> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.wait_until(lock, guard, deadline, cancel)
    }

    pub(crate) fn wait_until<'a, T>(
        &self,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<(MutexGuard<'a, T>, bool)> {
        lock_unpoisoned(&self.waiters).count += 1;
        drop(guard);

        let mut outcome = self.queue.acquire(deadline, cancel);

        let last_waiter = {
            let mut waiters = lock_unpoisoned(&self.waiters);
            // A signal may have counted this waiter after it gave up; take
            // the permit it left so no later waiter wakes on it.
            match outcome {
                Acquire::TimedOut if self.queue.try_acquire() => outcome = Acquire::Acquired,
                Acquire::Cancelled => {
                    self.queue.try_acquire();
                }
                _ => {}
            }
            waiters.count -= 1;
            waiters.was_broadcast && waiters.count == 0
        };
        if last_waiter {
            self.waiters_done.set();
        }

        match outcome {
            Acquire::Cancelled => Err(SyncError::Cancelled),
            Acquire::TimedOut => Ok((lock_unpoisoned(lock), false)),
            Acquire::Acquired => Ok((lock_unpoisoned(lock), true)),
        }
    }

    /// Wake one waiter. No-op when nobody waits.
    pub fn signal(&self) {
        let waiters = lock_unpoisoned(&self.waiters);
        if waiters.count > 0 {
            self.queue.release(1);
        }
    }

    /// Wake every current waiter and wait for all of them to leave the
    /// semaphore before returning.
    pub fn broadcast(&self) {
        {
            let mut waiters = lock_unpoisoned(&self.waiters);
            if waiters.count == 0 {
                return;
            }
            waiters.was_broadcast = true;
            self.queue.release(waiters.count);
        }

        self.waiters_done.wait();
        lock_unpoisoned(&self.waiters).was_broadcast = false;
    }

    pub fn waiter_count(&self) -> usize {
        lock_unpoisoned(&self.waiters).count
    }
}

impl std::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn wait_for_waiters(cv: &ConditionVariable, expected: usize) {
        let started = Instant::now();
        while cv.waiter_count() < expected {
            assert!(
                started.elapsed() < Duration::from_secs(5),
                "waiters should arrive"
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn wait_times_out_and_reacquires() {
        let lock = Mutex::new(5u32);
        let cv = ConditionVariable::new();
        let guard = lock.lock().expect("lock should not be poisoned");
        let (guard, signalled) = cv
            .wait(&lock, guard, Some(Duration::from_millis(10)), None)
            .expect("wait should not be cancelled");
        assert!(!signalled);
        assert_eq!(*guard, 5);
    }

    #[test]
    fn signal_without_waiters_is_noop() {
        let lock = Mutex::new(());
        let cv = ConditionVariable::new();
        cv.signal();
        let guard = lock.lock().expect("lock should not be poisoned");
        let (_guard, signalled) = cv
            .wait(&lock, guard, Some(Duration::from_millis(10)), None)
            .expect("wait should not be cancelled");
        assert!(!signalled, "earlier signal must not be banked");
    }

    #[test]
    fn signals_racing_a_timeout_leave_no_permit_behind() {
        let shared = Arc::new((Mutex::new(()), ConditionVariable::new()));
        for _ in 0..20 {
            let waiter = {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    let (lock, cv) = &*shared;
                    let guard = lock_unpoisoned(lock);
                    cv.wait(lock, guard, Some(Duration::from_millis(2)), None)
                        .map(|(_, signalled)| signalled)
                })
            };
            while !waiter.is_finished() {
                shared.1.signal();
            }
            waiter
                .join()
                .expect("waiter should not panic")
                .expect("wait should not be cancelled");
        }

        let (lock, cv) = &*shared;
        let guard = lock_unpoisoned(lock);
        let (_guard, signalled) = cv
            .wait(lock, guard, Some(Duration::from_millis(10)), None)
            .expect("wait should not be cancelled");
        assert!(!signalled, "no stray permit may survive the race");
    }

    #[test]
    fn signal_wakes_one_waiter() {
        let shared = Arc::new((Mutex::new(false), ConditionVariable::new()));
        let waiter = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                let (lock, cv) = &*shared;
                let mut guard = lock_unpoisoned(lock);
                while !*guard {
                    let (next, signalled) = cv
                        .wait(lock, guard, Some(Duration::from_secs(5)), None)
                        .expect("wait should not be cancelled");
                    assert!(signalled, "waiter should be signalled before timeout");
                    guard = next;
                }
            })
        };

        wait_for_waiters(&shared.1, 1);
        {
            let mut ready = lock_unpoisoned(&shared.0);
            *ready = true;
            shared.1.signal();
        }
        waiter.join().expect("waiter should not panic");
    }

    #[test]
    fn broadcast_releases_all_waiters() {
        let shared = Arc::new((Mutex::new(0usize), ConditionVariable::new()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                let (lock, cv) = &*shared;
                let guard = lock_unpoisoned(lock);
                let (mut guard, signalled) = cv
                    .wait(lock, guard, Some(Duration::from_secs(5)), None)
                    .expect("wait should not be cancelled");
                *guard += 1;
                signalled
            }));
        }

        wait_for_waiters(&shared.1, 4);
        {
            let _guard = lock_unpoisoned(&shared.0);
            shared.1.broadcast();
            assert_eq!(shared.1.waiter_count(), 0);
        }

        for handle in handles {
            assert!(handle.join().expect("waiter should not panic"));
        }
        assert_eq!(*lock_unpoisoned(&shared.0), 4);
    }

    #[test]
    fn cancel_wakes_blocked_waiter() {
        let shared = Arc::new((Mutex::new(()), ConditionVariable::new()));
        let token = CancelToken::new();
        let waiter = {
            let shared = Arc::clone(&shared);
            let token = token.clone();
            std::thread::spawn(move || {
                let (lock, cv) = &*shared;
                let guard = lock_unpoisoned(lock);
                cv.wait(lock, guard, None, Some(&token)).map(|_| ())
            })
        };

        wait_for_waiters(&shared.1, 1);
        token.cancel();

        let result = waiter.join().expect("waiter should not panic");
        assert_eq!(result, Err(SyncError::Cancelled));
        assert!(shared.0.try_lock().is_ok(), "cancelled waiter must release the lock");
    }
}

//! Blocking primitives shared by every linkprims layer.
//!
//! Everything here is built from a mutex, a counting semaphore and a
//! rendezvous event, and every blocking call accepts an optional
//! [`CancelToken`] so a worker thread can be torn down while it waits.
//!
//! # Modules
//!
//! - [`cancel`]: cancellation tokens and interruptible sleeps
//! - [`condvar`]: semaphore-based condition variable with broadcast rendezvous
//! - [`deque`]: fixed-capacity double-ended blocking queue
//! - [`slots`]: free-list token allocator backing buffer pools

pub mod cancel;
pub mod condvar;
pub mod deque;
pub mod error;
mod semaphore;
pub mod slots;

pub use cancel::CancelToken;
pub use condvar::ConditionVariable;
pub use deque::BoundedDeque;
pub use error::{PushError, Result, SyncError};
pub use slots::SlotAllocator;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::condvar::ConditionVariable;
use crate::error::{PushError, Result, SyncError};
use crate::lock_unpoisoned;

/// Fixed-capacity double-ended queue shared between producer and consumer
/// threads.
///
/// Storage is reserved once at construction and never grows. Each end offers
/// three flavours of push and pop:
///
/// | call | full / empty behaviour |
/// |---|---|
/// | `try_*` | returns immediately (element handed back / `None`) |
/// | `push_*` / `pop_*` | blocks until space / data, a timeout, or cancellation |
/// | [`force_push_back`](Self::force_push_back) | evicts the oldest element |
pub struct BoundedDeque<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    not_empty: ConditionVariable,
    not_full: ConditionVariable,
}

#[derive(Clone, Copy)]
enum End {
    Front,
    Back,
}

impl<T> BoundedDeque<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SyncError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: ConditionVariable::new(),
            not_full: ConditionVariable::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.items).is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.len()
    }

    pub fn try_push_back(&self, value: T) -> std::result::Result<(), T> {
        self.try_push(End::Back, value)
    }

    pub fn try_push_front(&self, value: T) -> std::result::Result<(), T> {
        self.try_push(End::Front, value)
    }

    /// Push at the tail, blocking while full.
    pub fn push_back(
        &self,
        value: T,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> std::result::Result<(), PushError<T>> {
        self.push(End::Back, value, timeout, cancel)
    }

    /// Push at the head, blocking while full.
    pub fn push_front(
        &self,
        value: T,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> std::result::Result<(), PushError<T>> {
        self.push(End::Front, value, timeout, cancel)
    }

    /// Push at the tail, evicting and returning the head element when full.
    pub fn force_push_back(&self, value: T) -> Option<T> {
        let mut items = lock_unpoisoned(&self.items);
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(value);
        self.not_empty.signal();
        evicted
    }

    pub fn try_pop_front(&self) -> Option<T> {
        self.try_pop(End::Front)
    }

    pub fn try_pop_back(&self) -> Option<T> {
        self.try_pop(End::Back)
    }

    /// Pop from the head, blocking while empty.
    pub fn pop_front(&self, timeout: Option<Duration>, cancel: Option<&CancelToken>) -> Result<T> {
        self.pop(End::Front, timeout, cancel)
    }

    /// Pop from the tail, blocking while empty.
    pub fn pop_back(&self, timeout: Option<Duration>, cancel: Option<&CancelToken>) -> Result<T> {
        self.pop(End::Back, timeout, cancel)
    }

    /// Pop the head only if it satisfies `pred`.
    pub fn pop_front_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut items = lock_unpoisoned(&self.items);
        if !items.front().is_some_and(pred) {
            return None;
        }
        let value = items.pop_front();
        self.not_full.signal();
        value
    }

    /// Block until the queue holds at least one element.
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait_while_empty(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut items = lock_unpoisoned(&self.items);
        while items.is_empty() {
            items = match self.wait(&self.not_empty, items, deadline, cancel) {
                Ok(items) => items,
                Err(SyncError::TimedOut) => return Ok(false),
                Err(err) => return Err(err),
            };
        }
        Ok(true)
    }

    /// Index of the first element matching `pred`, counted from the head.
    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        lock_unpoisoned(&self.items).iter().position(pred)
    }

    /// Remove and return the first element matching `pred`.
    ///
    /// Remaining elements keep their relative order.
    pub fn remove_first_where(&self, pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut items = lock_unpoisoned(&self.items);
        let index = items.iter().position(pred)?;
        let value = items.remove(index);
        self.not_full.signal();
        value
    }

    /// Remove and return the last element matching `pred`.
    pub fn remove_last_where(&self, pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut items = lock_unpoisoned(&self.items);
        let index = items.iter().rposition(pred)?;
        let value = items.remove(index);
        self.not_full.signal();
        value
    }

    /// Move up to `max` elements (all when `None`) from the head into `sink`.
    pub fn drain_into<E: Extend<T>>(&self, sink: &mut E, max: Option<usize>) -> usize {
        let mut items = lock_unpoisoned(&self.items);
        let count = max.map_or(items.len(), |m| m.min(items.len()));
        sink.extend(items.drain(..count));
        if count > 0 {
            self.not_full.broadcast();
        }
        count
    }

    /// Drop every element and wake blocked producers.
    pub fn clear(&self) {
        let mut items = lock_unpoisoned(&self.items);
        items.clear();
        self.not_full.broadcast();
    }

    fn try_push(&self, end: End, value: T) -> std::result::Result<(), T> {
        let mut items = lock_unpoisoned(&self.items);
        if items.len() >= self.capacity {
            return Err(value);
        }
        Self::insert(&mut items, end, value);
        self.not_empty.signal();
        Ok(())
    }

    fn push(
        &self,
        end: End,
        value: T,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> std::result::Result<(), PushError<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut items = lock_unpoisoned(&self.items);
        while items.len() >= self.capacity {
            items = match self.wait(&self.not_full, items, deadline, cancel) {
                Ok(items) => items,
                Err(reason) => return Err(PushError { value, reason }),
            };
        }
        Self::insert(&mut items, end, value);
        self.not_empty.signal();
        Ok(())
    }

    fn try_pop(&self, end: End) -> Option<T> {
        let mut items = lock_unpoisoned(&self.items);
        let value = Self::take(&mut items, end)?;
        self.not_full.signal();
        Some(value)
    }

    fn pop(&self, end: End, timeout: Option<Duration>, cancel: Option<&CancelToken>) -> Result<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut items = lock_unpoisoned(&self.items);
        loop {
            if let Some(value) = Self::take(&mut items, end) {
                self.not_full.signal();
                return Ok(value);
            }
            items = self.wait(&self.not_empty, items, deadline, cancel)?;
        }
    }

    /// One condition wait; a timed-out wait becomes [`SyncError::TimedOut`].
    fn wait<'a>(
        &'a self,
        cv: &ConditionVariable,
        items: MutexGuard<'a, VecDeque<T>>,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<MutexGuard<'a, VecDeque<T>>> {
        let (items, signalled) = cv.wait_until(&self.items, items, deadline, cancel)?;
        if !signalled && deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SyncError::TimedOut);
        }
        Ok(items)
    }

    fn insert(items: &mut VecDeque<T>, end: End, value: T) {
        match end {
            End::Front => items.push_front(value),
            End::Back => items.push_back(value),
        }
    }

    fn take(items: &mut VecDeque<T>, end: End) -> Option<T> {
        match end {
            End::Front => items.pop_front(),
            End::Back => items.pop_back(),
        }
    }
}

impl<T: PartialEq> BoundedDeque<T> {
    pub fn contains(&self, value: &T) -> bool {
        lock_unpoisoned(&self.items).contains(value)
    }

    pub fn position_of(&self, value: &T) -> Option<usize> {
        self.position(|item| item == value)
    }

    pub fn remove_first(&self, value: &T) -> bool {
        self.remove_first_where(|item| item == value).is_some()
    }

    pub fn remove_last(&self, value: &T) -> bool {
        self.remove_last_where(|item| item == value).is_some()
    }
}

impl<T: Clone> BoundedDeque<T> {
    pub fn peek_front(&self) -> Option<T> {
        lock_unpoisoned(&self.items).front().cloned()
    }

    pub fn peek_back(&self) -> Option<T> {
        lock_unpoisoned(&self.items).back().cloned()
    }

    /// First element matching `pred`, left in place.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        lock_unpoisoned(&self.items).iter().find(|item| pred(item)).cloned()
    }

    /// Copy of the contents, head first.
    pub fn snapshot(&self) -> Vec<T> {
        lock_unpoisoned(&self.items).iter().cloned().collect()
    }
}

impl<T> std::fmt::Debug for BoundedDeque<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedDeque")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(
            BoundedDeque::<u8>::new(0).map(|_| ()),
            Err(SyncError::ZeroCapacity)
        );
    }

    #[test]
    fn tail_api_is_fifo_and_head_api_is_lifo() {
        let deque = BoundedDeque::new(4).expect("deque should build");
        for v in 1..=4 {
            deque.try_push_back(v).expect("push should fit");
        }
        let drained: Vec<_> = std::iter::from_fn(|| deque.try_pop_front()).collect();
        assert_eq!(drained, vec![1, 2, 3, 4]);

        for v in 1..=4 {
            deque.try_push_front(v).expect("push should fit");
        }
        let drained: Vec<_> = std::iter::from_fn(|| deque.try_pop_front()).collect();
        assert_eq!(drained, vec![4, 3, 2, 1]);
    }

    #[test]
    fn interleaved_push_pop_keeps_order() {
        let deque = BoundedDeque::new(3).expect("deque should build");
        let mut popped = Vec::new();
        for v in 0..20 {
            deque.try_push_back(v).expect("push should fit");
            if v % 3 == 2 {
                while let Some(item) = deque.try_pop_front() {
                    popped.push(item);
                }
            }
        }
        while let Some(item) = deque.try_pop_front() {
            popped.push(item);
        }
        assert_eq!(popped, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn try_push_on_full_fails_without_blocking() {
        let deque = BoundedDeque::new(2).expect("deque should build");
        deque.try_push_back(1).expect("push should fit");
        deque.try_push_back(2).expect("push should fit");
        assert_eq!(deque.try_push_back(3), Err(3));
        assert_eq!(deque.len(), 2);
        assert_eq!(deque.remaining_capacity(), 0);
    }

    #[test]
    fn blocking_push_waits_for_pop() {
        let deque = Arc::new(BoundedDeque::new(1).expect("deque should build"));
        deque.try_push_back(1).expect("push should fit");

        let producer = {
            let deque = Arc::clone(&deque);
            std::thread::spawn(move || {
                let started = Instant::now();
                deque
                    .push_back(2, Some(Duration::from_secs(5)), None)
                    .expect("push should complete after pop");
                started.elapsed()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(deque.len(), 1, "producer must still be blocked");
        assert_eq!(deque.try_pop_front(), Some(1));

        let waited = producer.join().expect("producer should not panic");
        assert!(waited >= Duration::from_millis(40));
        assert_eq!(deque.try_pop_front(), Some(2));
    }

    #[test]
    fn blocking_push_times_out_and_returns_value() {
        let deque = BoundedDeque::new(1).expect("deque should build");
        deque.try_push_back("a").expect("push should fit");
        let err = deque
            .push_back("b", Some(Duration::from_millis(20)), None)
            .expect_err("push should time out");
        assert_eq!(err.reason, SyncError::TimedOut);
        assert_eq!(err.into_inner(), "b");
    }

    #[test]
    fn pop_on_empty_times_out() {
        let deque = BoundedDeque::<u8>::new(1).expect("deque should build");
        assert_eq!(deque.try_pop_back(), None);
        assert_eq!(
            deque.pop_front(Some(Duration::from_millis(20)), None),
            Err(SyncError::TimedOut)
        );
        assert_eq!(
            deque.wait_while_empty(Some(Duration::from_millis(10)), None),
            Ok(false)
        );
    }

    #[test]
    fn blocking_pop_is_cancellable() {
        let deque = Arc::new(BoundedDeque::<u8>::new(1).expect("deque should build"));
        let token = CancelToken::new();
        let consumer = {
            let deque = Arc::clone(&deque);
            let token = token.clone();
            std::thread::spawn(move || deque.pop_front(None, Some(&token)))
        };
        std::thread::sleep(Duration::from_millis(30));
        token.cancel();
        assert_eq!(
            consumer.join().expect("consumer should not panic"),
            Err(SyncError::Cancelled)
        );
    }

    #[test]
    fn blocking_pop_receives_from_other_thread() {
        let deque = Arc::new(BoundedDeque::new(2).expect("deque should build"));
        let consumer = {
            let deque = Arc::clone(&deque);
            std::thread::spawn(move || deque.pop_back(Some(Duration::from_secs(5)), None))
        };
        std::thread::sleep(Duration::from_millis(20));
        deque.try_push_back(9).expect("push should fit");
        assert_eq!(consumer.join().expect("consumer should not panic"), Ok(9));
    }

    #[test]
    fn force_push_evicts_oldest() {
        let deque = BoundedDeque::new(2).expect("deque should build");
        assert_eq!(deque.force_push_back(1), None);
        assert_eq!(deque.force_push_back(2), None);
        assert_eq!(deque.force_push_back(3), Some(1));
        assert_eq!(deque.snapshot(), vec![2, 3]);
    }

    #[test]
    fn middle_removal_preserves_order() {
        let deque = BoundedDeque::new(8).expect("deque should build");
        for v in [1, 2, 3, 2, 5] {
            deque.try_push_back(v).expect("push should fit");
        }
        assert_eq!(deque.position_of(&2), Some(1));
        assert!(deque.remove_first(&2));
        assert_eq!(deque.snapshot(), vec![1, 3, 2, 5]);
        assert!(deque.remove_last(&5));
        assert!(!deque.remove_first(&42));
        assert_eq!(deque.remove_first_where(|v| *v > 2), Some(3));
        assert_eq!(deque.snapshot(), vec![1, 2]);
        assert!(deque.contains(&2));
        assert_eq!(deque.find(|v| *v == 1), Some(1));
    }

    #[test]
    fn pop_front_if_and_peek() {
        let deque = BoundedDeque::new(4).expect("deque should build");
        deque.try_push_back(10).expect("push should fit");
        deque.try_push_back(20).expect("push should fit");
        assert_eq!(deque.pop_front_if(|v| *v == 20), None);
        assert_eq!(deque.peek_front(), Some(10));
        assert_eq!(deque.peek_back(), Some(20));
        assert_eq!(deque.pop_front_if(|v| *v == 10), Some(10));
        assert_eq!(deque.len(), 1);
    }

    #[test]
    fn drain_respects_max_and_clear_wakes_producer() {
        let deque = Arc::new(BoundedDeque::new(3).expect("deque should build"));
        for v in 0..3 {
            deque.try_push_back(v).expect("push should fit");
        }
        let mut sink = Vec::new();
        assert_eq!(deque.drain_into(&mut sink, Some(2)), 2);
        assert_eq!(sink, vec![0, 1]);

        deque.try_push_back(3).expect("push should fit");
        deque.try_push_back(4).expect("push should fit");
        let producer = {
            let deque = Arc::clone(&deque);
            std::thread::spawn(move || deque.push_back(5, Some(Duration::from_secs(5)), None))
        };
        std::thread::sleep(Duration::from_millis(30));
        deque.clear();
        producer
            .join()
            .expect("producer should not panic")
            .expect("push should succeed after clear");
        assert_eq!(deque.snapshot(), vec![5]);
    }
}

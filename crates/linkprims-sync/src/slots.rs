use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::cancel::CancelToken;
use crate::condvar::ConditionVariable;
use crate::error::{Result, SyncError};
use crate::lock_unpoisoned;

/// Free-list state. `next[i]` links free slot `i` to the next free slot.
struct FreeList {
    next: Vec<Option<usize>>,
    allocated: Vec<bool>,
    head: Option<usize>,
    in_use: usize,
}

impl FreeList {
    fn new(capacity: usize) -> Self {
        let mut list = Self {
            next: vec![None; capacity],
            allocated: vec![false; capacity],
            head: None,
            in_use: 0,
        };
        list.reset();
        list
    }

    /// Chain every slot so the highest index is handed out first.
    fn reset(&mut self) {
        for (index, next) in self.next.iter_mut().enumerate() {
            *next = index.checked_sub(1);
        }
        self.allocated.fill(false);
        self.head = self.next.len().checked_sub(1);
        self.in_use = 0;
    }

    fn pop(&mut self) -> Option<usize> {
        let slot = self.head?;
        self.head = self.next[slot];
        self.next[slot] = None;
        self.allocated[slot] = true;
        self.in_use += 1;
        Some(slot)
    }

    fn push(&mut self, slot: usize) -> bool {
        if !self.allocated.get(slot).copied().unwrap_or(false) {
            return false;
        }
        self.allocated[slot] = false;
        self.next[slot] = self.head;
        self.head = Some(slot);
        self.in_use -= 1;
        true
    }
}

/// Fixed pool of integer tokens backed by an intrusive free list.
///
/// Allocation and release are O(1). A token is either on the free list or
/// held by exactly one caller; releasing a token that is out of range or
/// already free is refused without touching the list.
pub struct SlotAllocator {
    capacity: usize,
    list: Mutex<FreeList>,
    not_full: ConditionVariable,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SyncError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            list: Mutex::new(FreeList::new(capacity)),
            not_full: ConditionVariable::new(),
        })
    }

    /// Take a free token, or `None` when every token is held.
    pub fn allocate(&self) -> Option<usize> {
        lock_unpoisoned(&self.list).pop()
    }

    /// Return `token` to the free list. Returns `false` if it was not held.
    pub fn release(&self, token: usize) -> bool {
        let mut list = lock_unpoisoned(&self.list);
        if !list.push(token) {
            warn!(token, capacity = self.capacity, "rejected release of unheld slot");
            return false;
        }
        self.not_full.signal();
        true
    }

    /// Allocate, blocking until a token is released if the pool is exhausted.
    pub fn wait_until_allocated(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut list = lock_unpoisoned(&self.list);
        loop {
            if let Some(token) = list.pop() {
                return Ok(token);
            }
            let (next, signalled) = self.not_full.wait_until(&self.list, list, deadline, cancel)?;
            if !signalled {
                return Err(SyncError::TimedOut);
            }
            list = next;
        }
    }

    /// Number of tokens currently held.
    pub fn size(&self) -> usize {
        lock_unpoisoned(&self.list).in_use
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.size()
    }

    pub fn is_allocated(&self, token: usize) -> bool {
        lock_unpoisoned(&self.list)
            .allocated
            .get(token)
            .copied()
            .unwrap_or(false)
    }

    /// Return every token to the free list.
    pub fn clear(&self) {
        let mut list = lock_unpoisoned(&self.list);
        list.reset();
        self.not_full.broadcast();
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        let list = lock_unpoisoned(&self.list);
        let mut count = 0;
        let mut cursor = list.head;
        while let Some(slot) = cursor {
            count += 1;
            cursor = list.next[slot];
        }
        count
    }
}

impl std::fmt::Debug for SlotAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotAllocator")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn allocates_until_exhausted() {
        let slots = SlotAllocator::new(3).expect("allocator should build");
        let mut seen = HashSet::new();
        for _ in 0..3 {
            assert!(seen.insert(slots.allocate().expect("slot should be free")));
        }
        assert_eq!(slots.allocate(), None);
        assert_eq!(slots.size(), 3);
        assert_eq!(slots.remaining_capacity(), 0);
    }

    #[test]
    fn conservation_holds_across_mixed_operations() {
        let slots = SlotAllocator::new(5).expect("allocator should build");
        let mut held = Vec::new();
        for step in 0..40usize {
            if step % 3 == 2 {
                if let Some(token) = held.pop() {
                    assert!(slots.release(token));
                }
            } else if let Some(token) = slots.allocate() {
                held.push(token);
            }
            assert_eq!(slots.size() + slots.free_count(), slots.capacity());
            assert_eq!(slots.size(), held.len());
        }
    }

    #[test]
    fn bad_release_does_not_corrupt_list() {
        let slots = SlotAllocator::new(2).expect("allocator should build");
        let token = slots.allocate().expect("slot should be free");
        assert!(!slots.release(99), "out of range token is refused");
        assert!(slots.release(token));
        assert!(!slots.release(token), "double release is refused");
        assert_eq!(slots.free_count(), 2);
        assert_eq!(slots.size(), 0);
    }

    #[test]
    fn concurrent_allocations_never_share_a_token() {
        let slots = Arc::new(SlotAllocator::new(64).expect("allocator should build"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slots = Arc::clone(&slots);
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(token) = slots.allocate() {
                        got.push(token);
                    }
                    got
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for token in handle.join().expect("allocator thread should not panic") {
                assert!(all.insert(token), "token {token} handed out twice");
            }
        }
        assert_eq!(all.len(), 64);
    }

    #[test]
    fn wait_until_allocated_blocks_for_release() {
        let slots = Arc::new(SlotAllocator::new(1).expect("allocator should build"));
        let token = slots.allocate().expect("slot should be free");

        let waiter = {
            let slots = Arc::clone(&slots);
            std::thread::spawn(move || slots.wait_until_allocated(Some(Duration::from_secs(5)), None))
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(slots.release(token));

        assert_eq!(waiter.join().expect("waiter should not panic"), Ok(token));
    }

    #[test]
    fn wait_until_allocated_times_out() {
        let slots = SlotAllocator::new(1).expect("allocator should build");
        let _held = slots.allocate();
        assert_eq!(
            slots.wait_until_allocated(Some(Duration::from_millis(20)), None),
            Err(SyncError::TimedOut)
        );
    }

    #[test]
    fn clear_frees_everything() {
        let slots = SlotAllocator::new(4).expect("allocator should build");
        while slots.allocate().is_some() {}
        slots.clear();
        assert_eq!(slots.size(), 0);
        assert_eq!(slots.free_count(), 4);
        assert!(!slots.is_allocated(0));
    }
}

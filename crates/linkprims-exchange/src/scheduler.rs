//! Isochronous task scheduler.
//!
//! Tasks live in a fixed slot array; the firing order is a queue of slot
//! numbers kept as a delta queue: each task stores the ticks remaining
//! after the task ahead of it fires, so advancing time only touches the
//! head of the queue.
//!
//! The scheduler has no thread of its own. Whoever drives the clock calls
//! [`IsoScheduler::service`] with the current millisecond tick.

use std::sync::Arc;

use linkprims_wire::{BufferIndex, BufferPool};
use tracing::{debug, trace};

use crate::config::SchedulerConfig;

/// Identity of a task: a request with the same key replaces or cancels it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub iso_id: u8,
    pub sender: u16,
    pub sender_id: u8,
    /// Interface the request arrived on.
    pub in_netif: u8,
}

/// A task to insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    pub key: TaskKey,
    /// Interface whose reset evicts the task.
    pub owner: u8,
    /// The isochronous command that created the task.
    pub command: u8,
    /// Ticks between firings; zero only cancels.
    pub interval: u32,
    /// Firings left; zero repeats forever.
    pub repeat: u32,
    /// Held buffer the task fires from.
    pub buffer: BufferIndex,
}

/// Result of [`IsoScheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// The task was queued and owns its buffer.
    Inserted,
    /// Interval zero: this many matching tasks were cancelled. The caller
    /// keeps the buffer.
    Cancelled(usize),
    /// Every slot is taken. The caller keeps the buffer.
    Full,
}

/// Runs a due task against its held buffer.
pub trait TaskRunner {
    fn fire(&mut self, owner: u8, command: u8, held: BufferIndex);
}

impl<F: FnMut(u8, u8, BufferIndex)> TaskRunner for F {
    fn fire(&mut self, owner: u8, command: u8, held: BufferIndex) {
        self(owner, command, held)
    }
}

#[derive(Debug)]
struct Task {
    key: TaskKey,
    owner: u8,
    command: u8,
    interval: u32,
    repeat: u32,
    relative: u32,
    buffer: BufferIndex,
    reschedule: bool,
}

/// Delta-queue scheduler over a fixed number of task slots.
pub struct IsoScheduler {
    pool: Arc<BufferPool>,
    slots: Vec<Option<Task>>,
    queue: Vec<usize>,
    last_tick: u32,
}

impl IsoScheduler {
    pub fn new(config: &SchedulerConfig, pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            slots: (0..config.tasks).map(|_| None).collect(),
            queue: Vec::with_capacity(config.tasks),
            last_tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Remaining ticks of each queued task, head first.
    pub fn relative_ticks(&self) -> Vec<u32> {
        self.queue
            .iter()
            .filter_map(|&slot| self.slots[slot].as_ref().map(|t| t.relative))
            .collect()
    }

    /// Commands of each queued task, head first.
    pub fn commands(&self) -> Vec<u8> {
        self.queue
            .iter()
            .filter_map(|&slot| self.slots[slot].as_ref().map(|t| t.command))
            .collect()
    }

    /// Replace or cancel the task with the same key, then insert the new
    /// one at the head of the queue so it fires on the next service.
    pub fn schedule(&mut self, spec: TaskSpec) -> Scheduled {
        let cancelled = self.cancel(&spec.key);
        if spec.interval == 0 {
            return Scheduled::Cancelled(cancelled);
        }
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            debug!(iso_id = spec.key.iso_id, "scheduler full");
            return Scheduled::Full;
        };
        self.slots[slot] = Some(Task {
            key: spec.key,
            owner: spec.owner,
            command: spec.command,
            interval: spec.interval,
            repeat: spec.repeat,
            relative: 0,
            buffer: spec.buffer,
            reschedule: false,
        });
        self.queue.insert(0, slot);
        debug!(
            iso_id = spec.key.iso_id,
            interval = spec.interval,
            repeat = spec.repeat,
            tasks = self.queue.len(),
            "task scheduled"
        );
        Scheduled::Inserted
    }

    /// Remove every task with `key`, folding its remaining ticks into the
    /// task behind it. Returns the number removed.
    pub fn cancel(&mut self, key: &TaskKey) -> usize {
        let mut removed = 0;
        let mut pos = 0;
        while pos < self.queue.len() {
            let slot = self.queue[pos];
            let matches = self.slots[slot].as_ref().is_some_and(|t| t.key == *key);
            if !matches {
                pos += 1;
                continue;
            }
            self.queue.remove(pos);
            if let Some(task) = self.slots[slot].take() {
                if let Some(&next) = self.queue.get(pos) {
                    if let Some(next) = self.slots[next].as_mut() {
                        next.relative += task.relative;
                    }
                }
                self.pool.release(task.buffer);
            }
            removed += 1;
        }
        if removed > 0 {
            debug!(iso_id = key.iso_id, removed, "task cancelled");
        }
        removed
    }

    /// Fire every task due at tick `now`, then drop finished tasks and
    /// reschedule the rest. Returns the number fired.
    pub fn service(&mut self, now: u32, runner: &mut impl TaskRunner) -> usize {
        let mut elapsed = now.wrapping_sub(self.last_tick);
        self.last_tick = now;
        if self.queue.is_empty() {
            return 0;
        }

        let mut fired = 0;
        let mut removed = false;
        let mut reschedule = false;
        for pos in 0..self.queue.len() {
            let slot = self.queue[pos];
            let Some(task) = self.slots[slot].as_mut() else {
                continue;
            };
            if elapsed < task.relative {
                task.relative -= elapsed;
                break;
            }
            runner.fire(task.owner, task.command, task.buffer);
            fired += 1;
            elapsed -= task.relative;
            if task.repeat > 0 {
                task.repeat -= 1;
                if task.repeat == 0 {
                    self.pool.release(task.buffer);
                    self.slots[slot] = None;
                    removed = true;
                    continue;
                }
            }
            task.reschedule = true;
            reschedule = true;
        }

        if removed {
            let slots = &self.slots;
            self.queue.retain(|&slot| slots[slot].is_some());
        }
        if reschedule {
            self.reschedule();
        }
        trace!(now, fired, tasks = self.queue.len(), "scheduler serviced");
        fired
    }

    /// Ripple each fired task at the head of the queue down to the slot
    /// its interval puts it in.
    fn reschedule(&mut self) {
        let fired = self
            .queue
            .iter()
            .position(|&slot| !self.slots[slot].as_ref().is_some_and(|t| t.reschedule))
            .unwrap_or(self.queue.len());

        for k in (0..fired).rev() {
            let Some(task) = self.slots[self.queue[k]].as_mut() else {
                continue;
            };
            task.reschedule = false;
            // One tick goes to the service pass itself.
            let mut relative = task.interval.saturating_sub(1);
            let mut at = k;
            while at + 1 < self.queue.len() {
                let Some(next) = self.slots[self.queue[at + 1]].as_mut() else {
                    break;
                };
                if relative < next.relative {
                    next.relative -= relative;
                    break;
                }
                relative -= next.relative;
                self.queue.swap(at, at + 1);
                at += 1;
            }
            if let Some(task) = self.slots[self.queue[at]].as_mut() {
                task.relative = relative;
            }
        }
    }

    /// Evict every task owned by `netif` and release its buffer.
    ///
    /// The remaining tasks keep their deltas as they are, so tasks queued
    /// behind an evicted one fire early by its remaining ticks.
    pub fn reset_owner(&mut self, netif: u8) -> usize {
        let mut evicted = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|t| t.owner == netif) {
                if let Some(task) = slot.take() {
                    self.pool.release(task.buffer);
                    evicted += 1;
                }
            }
        }
        let slots = &self.slots;
        self.queue.retain(|&slot| slots[slot].is_some());
        if evicted > 0 {
            debug!(netif, evicted, "link tasks evicted");
        }
        evicted
    }

    /// Drop every task and release its buffer.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if let Some(task) = slot.take() {
                self.pool.release(task.buffer);
            }
        }
        self.queue.clear();
    }
}

impl Drop for IsoScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for IsoScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsoScheduler")
            .field("tasks", &self.queue.len())
            .field("capacity", &self.slots.len())
            .field("relative", &self.relative_ticks())
            .field("last_tick", &self.last_tick)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use linkprims_wire::PoolConfig;

    use super::*;

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new(PoolConfig::default().with_slots(8)).expect("pool should build"))
    }

    fn key(iso_id: u8) -> TaskKey {
        TaskKey {
            iso_id,
            sender: 0x20,
            sender_id: 7,
            in_netif: 5,
        }
    }

    fn spec(pool: &BufferPool, iso_id: u8, interval: u32, owner: u8) -> TaskSpec {
        TaskSpec {
            key: key(iso_id),
            owner,
            command: 10,
            interval,
            repeat: 0,
            buffer: pool.allocate().expect("buffer should be free"),
        }
    }

    /// Insert tasks with intervals 100, 50 and 200 and run the first tick,
    /// returning a map from buffer to interval.
    fn three_tasks(scheduler: &mut IsoScheduler, pool: &BufferPool, owners: [u8; 3]) -> HashMap<BufferIndex, u32> {
        let mut intervals = HashMap::new();
        for (iso_id, (interval, owner)) in [(100, owners[0]), (50, owners[1]), (200, owners[2])]
            .into_iter()
            .enumerate()
        {
            let spec = spec(pool, iso_id as u8, interval, owner);
            intervals.insert(spec.buffer, interval);
            assert_eq!(scheduler.schedule(spec), Scheduled::Inserted);
        }
        assert_eq!(scheduler.relative_ticks(), vec![0, 0, 0]);
        let fired = scheduler.service(1, &mut |_: u8, _: u8, _: BufferIndex| {});
        assert_eq!(fired, 3);
        intervals
    }

    fn service_collect(
        scheduler: &mut IsoScheduler,
        now: u32,
        intervals: &HashMap<BufferIndex, u32>,
    ) -> Vec<u32> {
        let mut fired = Vec::new();
        scheduler.service(now, &mut |_: u8, _: u8, held: BufferIndex| {
            fired.push(intervals[&held]);
        });
        fired
    }

    #[test]
    fn tasks_fire_in_interval_order() {
        let pool = pool();
        let mut scheduler = IsoScheduler::new(&SchedulerConfig::default(), Arc::clone(&pool));
        let intervals = three_tasks(&mut scheduler, &pool, [5, 5, 5]);
        assert_eq!(scheduler.relative_ticks(), vec![49, 50, 100]);

        assert!(service_collect(&mut scheduler, 49, &intervals).is_empty());
        assert_eq!(service_collect(&mut scheduler, 50, &intervals), vec![50]);
        assert_eq!(service_collect(&mut scheduler, 100, &intervals), vec![50, 100]);
        assert_eq!(scheduler.relative_ticks(), vec![49, 50, 1]);
        assert_eq!(service_collect(&mut scheduler, 149, &intervals), vec![50]);
        assert_eq!(service_collect(&mut scheduler, 199, &intervals), vec![50, 100]);
        assert_eq!(service_collect(&mut scheduler, 200, &intervals), vec![200]);
    }

    #[test]
    fn cancel_folds_delta_into_successor() {
        let pool = pool();
        let mut scheduler = IsoScheduler::new(&SchedulerConfig::default(), Arc::clone(&pool));
        three_tasks(&mut scheduler, &pool, [5, 5, 5]);
        assert_eq!(pool.in_use(), 3);

        assert_eq!(scheduler.cancel(&key(0)), 1);
        assert_eq!(scheduler.relative_ticks(), vec![49, 150]);
        assert_eq!(scheduler.relative_ticks().iter().sum::<u32>(), 199);
        assert_eq!(pool.in_use(), 2);
        assert_eq!(scheduler.cancel(&key(0)), 0);
    }

    #[test]
    fn zero_interval_only_cancels() {
        let pool = pool();
        let mut scheduler = IsoScheduler::new(&SchedulerConfig::default(), Arc::clone(&pool));
        assert_eq!(scheduler.schedule(spec(&pool, 1, 100, 5)), Scheduled::Inserted);

        let cancel = spec(&pool, 1, 0, 5);
        let held = cancel.buffer;
        assert_eq!(scheduler.schedule(cancel), Scheduled::Cancelled(1));
        assert!(scheduler.is_empty());
        // The cancelling request's buffer stays with the caller.
        assert!(pool.release(held));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn same_key_replaces_existing_task() {
        let pool = pool();
        let mut scheduler = IsoScheduler::new(&SchedulerConfig::default(), Arc::clone(&pool));
        assert_eq!(scheduler.schedule(spec(&pool, 3, 100, 5)), Scheduled::Inserted);
        assert_eq!(scheduler.schedule(spec(&pool, 3, 20, 5)), Scheduled::Inserted);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn repeat_count_removes_task_and_releases_buffer() {
        let pool = pool();
        let mut scheduler = IsoScheduler::new(&SchedulerConfig::default(), Arc::clone(&pool));
        let mut task = spec(&pool, 1, 10, 5);
        task.repeat = 2;
        scheduler.schedule(task);

        let mut count = 0;
        let mut runner = |_: u8, _: u8, _: BufferIndex| count += 1;
        scheduler.service(1, &mut runner);
        scheduler.service(5, &mut runner);
        assert_eq!(scheduler.len(), 1);
        scheduler.service(10, &mut runner);
        assert_eq!(count, 2);
        assert!(scheduler.is_empty());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn full_scheduler_refuses_and_leaves_buffer() {
        let pool = pool();
        let mut scheduler = IsoScheduler::new(&SchedulerConfig::default().with_tasks(2), Arc::clone(&pool));
        assert_eq!(scheduler.schedule(spec(&pool, 1, 10, 5)), Scheduled::Inserted);
        assert_eq!(scheduler.schedule(spec(&pool, 2, 10, 5)), Scheduled::Inserted);

        let third = spec(&pool, 3, 10, 5);
        assert_eq!(scheduler.schedule(third), Scheduled::Full);
        assert_eq!(scheduler.len(), 2);
        assert!(pool.release(third.buffer));
    }

    #[test]
    fn reset_evicts_owner_tasks_without_resync() {
        let pool = pool();
        let mut scheduler = IsoScheduler::new(&SchedulerConfig::default(), Arc::clone(&pool));
        three_tasks(&mut scheduler, &pool, [6, 5, 5]);
        assert_eq!(scheduler.relative_ticks(), vec![49, 50, 100]);

        assert_eq!(scheduler.reset_owner(6), 1);
        // The 200 tick task keeps its delta and now fires 50 ticks early.
        assert_eq!(scheduler.relative_ticks(), vec![49, 100]);
        assert_eq!(pool.in_use(), 2);
        assert_eq!(scheduler.reset_owner(6), 0);
    }

    #[test]
    fn drop_releases_held_buffers() {
        let pool = pool();
        {
            let mut scheduler = IsoScheduler::new(&SchedulerConfig::default(), Arc::clone(&pool));
            scheduler.schedule(spec(&pool, 1, 10, 5));
            scheduler.schedule(spec(&pool, 2, 10, 5));
        }
        assert_eq!(pool.in_use(), 0);
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use linkprims_sync::{lock_unpoisoned, BoundedDeque, CancelToken};
use tracing::debug;

use crate::error::Result;
use crate::pool::{BufferIndex, BufferPool};

/// Default depth of a link's write queue.
pub const DEFAULT_WRITE_QUEUE_SIZE: usize = 64;

/// Write-queue depth above which a link is treated as busy.
pub const DEFAULT_HIGH_WATER_MARK: usize = 59;

/// Coarse health of a link driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Idle,
    Starting,
    Working,
    Failed,
    Closed,
}

/// What the message layer needs from a link driver.
///
/// Drivers deliver received packets by loading them into a pool buffer and
/// handing the index to the exchange; the trait only covers the send side
/// and the signals the dispatcher uses for backpressure.
pub trait Link: Send + Sync {
    /// Interface index this link is registered under.
    fn netif(&self) -> u8;

    /// Number of buffers waiting in the write queue.
    fn write_queue_depth(&self) -> usize;

    fn high_water_mark(&self) -> usize {
        DEFAULT_HIGH_WATER_MARK
    }

    fn health(&self) -> LinkHealth;

    /// Take ownership of a filled buffer for transmission.
    ///
    /// On refusal the index is handed back and the caller still owns it.
    fn send(&self, buffer: BufferIndex) -> std::result::Result<(), BufferIndex>;
}

/// In-memory link: sent buffers queue up until a reader takes them.
///
/// Used for loopback wiring and tests.
pub struct MemoryLink {
    netif: u8,
    pool: Arc<BufferPool>,
    written: BoundedDeque<BufferIndex>,
    high_water: usize,
    health: Mutex<LinkHealth>,
}

impl MemoryLink {
    pub fn new(netif: u8, pool: Arc<BufferPool>) -> Result<Self> {
        Ok(Self {
            netif,
            pool,
            written: BoundedDeque::new(DEFAULT_WRITE_QUEUE_SIZE)?,
            high_water: DEFAULT_HIGH_WATER_MARK,
            health: Mutex::new(LinkHealth::Working),
        })
    }

    pub fn with_high_water_mark(mut self, mark: usize) -> Self {
        self.high_water = mark;
        self
    }

    pub fn set_health(&self, health: LinkHealth) {
        *lock_unpoisoned(&self.health) = health;
    }

    /// Take the oldest sent buffer. Ownership passes to the caller.
    pub fn take_sent(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<BufferIndex> {
        Ok(self.written.pop_front(timeout, cancel)?)
    }

    /// Release every queued buffer back to the pool.
    pub fn discard_sent(&self) -> usize {
        let mut drained = Vec::new();
        self.written.drain_into(&mut drained, None);
        for index in &drained {
            self.pool.release(*index);
        }
        drained.len()
    }
}

impl Link for MemoryLink {
    fn netif(&self) -> u8 {
        self.netif
    }

    fn write_queue_depth(&self) -> usize {
        self.written.len()
    }

    fn high_water_mark(&self) -> usize {
        self.high_water
    }

    fn health(&self) -> LinkHealth {
        *lock_unpoisoned(&self.health)
    }

    fn send(&self, buffer: BufferIndex) -> std::result::Result<(), BufferIndex> {
        debug!(netif = self.netif, buffer, "memory link queued buffer");
        self.written.try_push_back(buffer)
    }
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("netif", &self.netif)
            .field("depth", &self.written.len())
            .field("health", &self.health())
            .finish()
    }
}

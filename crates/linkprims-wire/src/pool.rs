use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use linkprims_sync::{lock_unpoisoned, CancelToken, SlotAllocator};
use tracing::trace;

use crate::buffer::{WireBuffer, DEFAULT_MAX_PACKET, HEADER_SIZE};
use crate::error::{Result, WireError};

/// Integer handle to a buffer slot in a [`BufferPool`].
pub type BufferIndex = usize;

/// Buffer pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of buffer slots.
    pub slots: usize,
    /// Link-negotiated maximum packet size in bytes, header included.
    pub max_packet: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slots: 200,
            max_packet: DEFAULT_MAX_PACKET,
        }
    }
}

impl PoolConfig {
    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_max_packet(mut self, max_packet: usize) -> Self {
        self.max_packet = max_packet;
        self
    }
}

/// Arena of fixed-size [`WireBuffer`] slots handed out as integer indices.
///
/// The pool never grows after construction. Whoever holds an index owns
/// the slot until it calls [`release`](Self::release) or passes the index
/// on; the per-slot mutex only makes the handle safe to move across threads.
pub struct BufferPool {
    config: PoolConfig,
    slots: SlotAllocator,
    buffers: Vec<Mutex<WireBuffer>>,
}

impl BufferPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.max_packet <= HEADER_SIZE || config.max_packet > usize::from(u8::MAX) {
            return Err(WireError::InvalidConfig(format!(
                "max_packet must be in {}..=255, got {}",
                HEADER_SIZE + 1,
                config.max_packet
            )));
        }
        let slots = SlotAllocator::new(config.slots)?;
        let buffers = (0..config.slots)
            .map(|_| Mutex::new(WireBuffer::new(config.max_packet)))
            .collect();
        Ok(Self {
            config,
            slots,
            buffers,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Largest payload one packet can carry.
    pub fn max_data(&self) -> usize {
        self.config.max_packet - HEADER_SIZE
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn in_use(&self) -> usize {
        self.slots.size()
    }

    /// Take a cleared buffer from the pool.
    pub fn allocate(&self) -> Result<BufferIndex> {
        let index = self.slots.allocate().ok_or(WireError::PoolExhausted)?;
        lock_unpoisoned(&self.buffers[index]).clear();
        trace!(index, "buffer allocated");
        Ok(index)
    }

    /// Take a cleared buffer, blocking until one is released if necessary.
    pub fn allocate_wait(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<BufferIndex> {
        let index = self.slots.wait_until_allocated(timeout, cancel)?;
        lock_unpoisoned(&self.buffers[index]).clear();
        Ok(index)
    }

    /// Return a buffer to the pool. Returns `false` if it was not held.
    pub fn release(&self, index: BufferIndex) -> bool {
        trace!(index, "buffer released");
        self.slots.release(index)
    }

    /// Access a held buffer.
    pub fn get(&self, index: BufferIndex) -> Result<MutexGuard<'_, WireBuffer>> {
        if !self.slots.is_allocated(index) {
            return Err(WireError::InvalidBuffer(index));
        }
        Ok(lock_unpoisoned(&self.buffers[index]))
    }

    /// Allocate a new buffer holding a copy of `index`.
    pub fn duplicate(&self, index: BufferIndex) -> Result<BufferIndex> {
        let source = self.get(index)?.clone();
        let copy = self.allocate()?;
        lock_unpoisoned(&self.buffers[copy]).copy_from(&source);
        Ok(copy)
    }

    /// Allocate and fill a general command packet.
    pub fn create_general(
        &self,
        verified: bool,
        command: u8,
        receiver: u16,
        sender: u16,
        sender_id: u8,
        data: &[u8],
    ) -> Result<BufferIndex> {
        if data.len() > self.max_data() {
            return Err(WireError::PayloadTooLarge {
                size: data.len(),
                max: self.max_data(),
            });
        }
        let index = self.allocate()?;
        let written = lock_unpoisoned(&self.buffers[index])
            .write_general(verified, command, receiver, sender, sender_id, data);
        if let Err(err) = written {
            self.release(index);
            return Err(err);
        }
        Ok(index)
    }

    /// Allocate and fill a handshake packet.
    pub fn create_handshake(&self, pid: u8, arg: u8) -> Result<BufferIndex> {
        let index = self.allocate()?;
        lock_unpoisoned(&self.buffers[index]).write_handshake(pid, arg);
        Ok(index)
    }

    /// Allocate a buffer and load a raw packet received from a link.
    pub fn load_packet(&self, packet: &[u8]) -> Result<BufferIndex> {
        let index = self.allocate()?;
        let loaded = lock_unpoisoned(&self.buffers[index]).load(packet);
        if let Err(err) = loaded {
            self.release(index);
            return Err(err);
        }
        Ok(index)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.config)
            .field("in_use", &self.in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(slots: usize) -> BufferPool {
        BufferPool::new(PoolConfig::default().with_slots(slots)).expect("pool should build")
    }

    #[test]
    fn rejects_bad_packet_sizes() {
        assert!(BufferPool::new(PoolConfig::default().with_max_packet(HEADER_SIZE)).is_err());
        assert!(BufferPool::new(PoolConfig::default().with_max_packet(300)).is_err());
        assert!(BufferPool::new(PoolConfig::default().with_slots(0)).is_err());
    }

    #[test]
    fn create_general_fills_and_release_returns_slot() {
        let pool = small_pool(2);
        let index = pool
            .create_general(false, 8, 1, 2, 7, &[9, 9])
            .expect("packet should build");
        {
            let buf = pool.get(index).expect("buffer should be held");
            assert_eq!(buf.command(), 8);
            assert_eq!(buf.sender_id(), 7);
            assert_eq!(buf.data(), &[9, 9]);
        }
        assert_eq!(pool.in_use(), 1);
        assert!(pool.release(index));
        assert!(matches!(pool.get(index), Err(WireError::InvalidBuffer(_))));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn exhaustion_is_reported() {
        let pool = small_pool(1);
        let _held = pool.allocate().expect("first buffer should be free");
        assert!(matches!(pool.allocate(), Err(WireError::PoolExhausted)));
        assert!(matches!(
            pool.allocate_wait(Some(Duration::from_millis(10)), None),
            Err(WireError::Sync(linkprims_sync::SyncError::TimedOut))
        ));
    }

    #[test]
    fn oversized_payload_does_not_leak_a_slot() {
        let pool = small_pool(1);
        let data = vec![0u8; pool.max_data() + 1];
        assert!(pool.create_general(false, 8, 0, 0, 0, &data).is_err());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn duplicate_copies_contents() {
        let pool = small_pool(2);
        let index = pool
            .create_general(true, 3, 4, 5, 6, b"hi")
            .expect("packet should build");
        let copy = pool.duplicate(index).expect("copy should allocate");
        assert_ne!(index, copy);
        let original = pool.get(index).expect("original should be held").clone();
        assert_eq!(*pool.get(copy).expect("copy should be held"), original);
    }
}

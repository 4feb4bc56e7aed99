//! Packet layer of linkprims.
//!
//! A packet lives in a fixed-size [`WireBuffer`] slot owned by a
//! [`BufferPool`] and addressed by an integer [`BufferIndex`]. Exactly one
//! party owns an index at a time: the pool's free list, a link's write queue,
//! an in-flight transaction, or a scheduled task.
//!
//! [`Message`] is the decoded, owned view the application works with.
//! [`Link`] is the narrow interface a physical link driver has to provide.

pub mod buffer;
pub mod error;
pub mod link;
pub mod message;
pub mod netif;
pub mod pool;
pub mod protocol;

pub use buffer::{WireBuffer, DEFAULT_MAX_PACKET, HEADER_SIZE};
pub use error::{Result, WireError};
pub use link::{Link, LinkHealth, MemoryLink, DEFAULT_HIGH_WATER_MARK, DEFAULT_WRITE_QUEUE_SIZE};
pub use message::{CommandBuilder, General, Message, MessageBody, MessageError, Route};
pub use netif::NetIfTable;
pub use pool::{BufferIndex, BufferPool, PoolConfig};

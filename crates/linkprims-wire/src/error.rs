/// Errors raised while building, decoding or pooling packets.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The protocol id is not a general (command) protocol.
    #[error("unknown protocol id {0:#04x}")]
    UnknownProtocol(u8),

    /// The payload does not fit in one packet. Messages are never fragmented.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A raw packet is shorter than the fixed header or its declared length.
    #[error("packet truncated ({len} bytes)")]
    Truncated { len: usize },

    /// Every buffer in the pool is in use.
    #[error("buffer pool exhausted")]
    PoolExhausted,

    /// The index does not name a buffer currently held out of the pool.
    #[error("buffer {0} is not allocated")]
    InvalidBuffer(usize),

    /// The pool configuration cannot describe a valid packet.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// A blocking pool operation failed.
    #[error(transparent)]
    Sync(#[from] linkprims_sync::SyncError),
}

pub type Result<T> = std::result::Result<T, WireError>;

//! Device monitoring message transport and parameter RPC.
//!
//! linkprims moves small addressed command messages between an application
//! and monitored devices, and lets peers read, write and periodically poll a
//! device's typed parameter table.
//!
//! # Crate Structure
//!
//! - [`sync`]: cancellable waits, the bounded deque and the slot allocator
//! - [`wire`]: wire buffers, the buffer pool, messages and links
//! - [`param`]: typed values, the parameter registry and the variable codec
//! - [`exchange`]: the exchange engine, local mediator and task scheduler

/// Re-export synchronization primitives.
pub mod sync {
    pub use linkprims_sync::*;
}

/// Re-export wire types.
pub mod wire {
    pub use linkprims_wire::*;
}

/// Re-export parameter types.
pub mod param {
    pub use linkprims_param::*;
}

/// Re-export exchange types.
pub mod exchange {
    pub use linkprims_exchange::*;
}

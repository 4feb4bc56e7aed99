use std::time::Duration;

use linkprims_wire::MessageError;

/// Errors raised by the exchange engine and the local mediator.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Buffer, pool or packet error.
    #[error("wire error: {0}")]
    Wire(#[from] linkprims_wire::WireError),

    /// Queue or wait error.
    #[error(transparent)]
    Sync(#[from] linkprims_sync::SyncError),

    /// Parameter table error.
    #[error("parameter error: {0}")]
    Param(#[from] linkprims_param::ParamError),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The outgoing queue is at capacity.
    #[error("outgoing queue full")]
    QueueFull,

    /// The exchange has been closed.
    #[error("exchange closed")]
    Closed,

    /// A message could not be dispatched.
    #[error("dispatch failed: {0}")]
    Dispatch(MessageError),

    /// No reply arrived in time.
    #[error("no reply after {0:?}")]
    Timeout(Duration),

    /// Interface 0 belongs to the local mediator.
    #[error("interface {0} is reserved")]
    ReservedNetIf(u8),
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

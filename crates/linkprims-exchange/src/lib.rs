//! Message exchange engine for linkprims.
//!
//! An [`Exchange`] moves [`Message`](linkprims_wire::Message)s between the
//! application and its links. Submitted messages are queued and dispatched
//! by a worker thread; received messages are matched to the request that
//! is waiting for them by correlation id and handed to listeners.
//!
//! Interface 0 is always the local [`Mediator`], which serves the device's
//! parameter registry and runs isochronous tasks through the
//! [`IsoScheduler`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use linkprims_exchange::{Exchange, ExchangeConfig};
//! use linkprims_param::codec::{read_request, RWV_RAM};
//! use linkprims_param::ParameterRegistry;
//! use linkprims_wire::protocol::CMD_READ_VAR;
//! use linkprims_wire::{Message, Route};
//!
//! let registry = Arc::new(ParameterRegistry::with_system_page("SN-1")?);
//! let exchange = Exchange::new(ExchangeConfig::default(), registry)?;
//! let read = Message::command(CMD_READ_VAR)
//!     .route(Route::Address)
//!     .data(read_request(4, RWV_RAM, 0, &[0, 1]))
//!     .build()?;
//! let reply = exchange.request(read, Duration::from_secs(1))?;
//! println!("{} reply bytes", reply.data().len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod binder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod mediator;
pub mod scheduler;

pub use binder::{Delivery, HandlerMode, HostContext, ListenerId, MessageHandler};
pub use config::{ExchangeConfig, SchedulerConfig};
pub use dispatch::{dispatch, resolve_netif, DispatchOutcome};
pub use error::{ExchangeError, Result};
pub use exchange::Exchange;
pub use mediator::Mediator;
pub use scheduler::{IsoScheduler, Scheduled, TaskKey, TaskRunner, TaskSpec};

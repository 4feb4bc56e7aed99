//! Message handlers and how the exchange invokes them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use linkprims_wire::{Message, MessageError};
use tracing::{error, warn};

/// What a handler is called with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A reply matched by correlation id, or a message a listener accepted.
    Reply(Message),
    /// The request could not be dispatched. Delivered once, with no reply.
    Failed { request: Message, error: MessageError },
}

impl Delivery {
    pub fn message(&self) -> &Message {
        match self {
            Delivery::Reply(message) => message,
            Delivery::Failed { request, .. } => request,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Delivery::Failed { .. })
    }
}

/// Receives replies and listener deliveries.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, delivery: Delivery);
}

impl<F> MessageHandler for F
where
    F: Fn(Delivery) + Send + Sync,
{
    fn on_message(&self, delivery: Delivery) {
        self(delivery)
    }
}

/// An external serialized execution context, such as a UI event loop.
pub trait HostContext: Send + Sync {
    /// Run `task` on the context at some later point.
    fn post(&self, task: Box<dyn FnOnce() + Send>);
}

/// Where a handler runs.
#[derive(Clone, Default)]
pub enum HandlerMode {
    /// On the receiver or dispatcher thread. The handler must not block.
    #[default]
    Inline,
    /// On a new thread per delivery.
    Thread,
    /// Posted to a host context.
    Host(Arc<dyn HostContext>),
}

impl std::fmt::Debug for HandlerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerMode::Inline => f.write_str("Inline"),
            HandlerMode::Thread => f.write_str("Thread"),
            HandlerMode::Host(_) => f.write_str("Host"),
        }
    }
}

fn invoke(handler: &dyn MessageHandler, delivery: Delivery) {
    if catch_unwind(AssertUnwindSafe(|| handler.on_message(delivery))).is_err() {
        error!("message handler panicked");
    }
}

/// Call `handler` the way `mode` asks.
pub(crate) fn deliver(handler: &Arc<dyn MessageHandler>, mode: &HandlerMode, delivery: Delivery) {
    match mode {
        HandlerMode::Inline => invoke(handler.as_ref(), delivery),
        HandlerMode::Thread => {
            let handler = Arc::clone(handler);
            let spawned = std::thread::Builder::new()
                .name("linkprims-handler".into())
                .spawn(move || invoke(handler.as_ref(), delivery));
            if let Err(err) = spawned {
                warn!(error = %err, "failed to spawn handler thread, delivery dropped");
            }
        }
        HandlerMode::Host(host) => {
            let handler = Arc::clone(handler);
            host.post(Box::new(move || invoke(handler.as_ref(), delivery)));
        }
    }
}

/// A submitted message with its reply handler.
pub(crate) struct Binder {
    pub(crate) id: u64,
    pub(crate) message: Message,
    pub(crate) handler: Option<Arc<dyn MessageHandler>>,
    pub(crate) mode: HandlerMode,
    pub(crate) expected_replies: usize,
    /// Set once the waiter is on the waiting list, so a requeued binder is
    /// not registered twice.
    pub(crate) registered: bool,
}

/// An entry on the waiting list.
pub(crate) struct Waiter {
    pub(crate) binder_id: u64,
    pub(crate) sender_id: u8,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) mode: HandlerMode,
    /// Replies still expected; zero waits for replies until pruned by close.
    pub(crate) remaining: usize,
    pub(crate) bounded: bool,
    pub(crate) registered_at: Instant,
}

impl Waiter {
    pub(crate) fn from_binder(binder: &Binder, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            binder_id: binder.id,
            sender_id: binder.message.sender_id(),
            handler,
            mode: binder.mode.clone(),
            remaining: binder.expected_replies,
            bounded: binder.expected_replies > 0,
            registered_at: Instant::now(),
        }
    }
}

/// A permanent listener.
pub(crate) struct Listener {
    pub(crate) id: ListenerId,
    pub(crate) handler: Arc<dyn MessageHandler>,
    /// Correlation id to accept; `IDENT_WILDCARD` accepts all.
    pub(crate) filter_id: u8,
    pub(crate) expected_replies: usize,
    pub(crate) mode: HandlerMode,
}

/// Handle returned by [`Exchange::add_listener`](crate::Exchange::add_listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    use super::*;

    fn ticker_reply() -> Message {
        Message::command(3).sender_id(0x11).build().expect("message should build")
    }

    #[test]
    fn inline_delivery_survives_panicking_handler() {
        let handler: Arc<dyn MessageHandler> = Arc::new(|_: Delivery| panic!("boom"));
        deliver(&handler, &HandlerMode::Inline, Delivery::Reply(ticker_reply()));

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handler: Arc<dyn MessageHandler> = Arc::new(move |_: Delivery| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        deliver(&handler, &HandlerMode::Inline, Delivery::Reply(ticker_reply()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_delivery_runs_off_caller_thread() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let caller = std::thread::current().id();
        let handler: Arc<dyn MessageHandler> = Arc::new(move |delivery: Delivery| {
            let _ = tx.lock().expect("sender lock").send((std::thread::current().id(), delivery));
        });
        deliver(&handler, &HandlerMode::Thread, Delivery::Reply(ticker_reply()));

        let (thread, delivery) = rx.recv_timeout(Duration::from_secs(2)).expect("handler should run");
        assert_ne!(thread, caller);
        assert_eq!(delivery.message().sender_id(), 0x11);
    }

    struct Queued(Mutex<Vec<Box<dyn FnOnce() + Send>>>);

    impl HostContext for Queued {
        fn post(&self, task: Box<dyn FnOnce() + Send>) {
            self.0.lock().expect("host lock").push(task);
        }
    }

    #[test]
    fn host_delivery_is_deferred_until_the_host_runs() {
        let host = Arc::new(Queued(Mutex::new(Vec::new())));
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handler: Arc<dyn MessageHandler> = Arc::new(move |delivery: Delivery| {
            assert!(delivery.is_failure());
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let failed = Delivery::Failed {
            request: ticker_reply(),
            error: MessageError::BadNetIf(9),
        };
        deliver(&handler, &HandlerMode::Host(host.clone()), failed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let tasks: Vec<_> = host.0.lock().expect("host lock").drain(..).collect();
        for task in tasks {
            task();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use linkprims_param::ParameterRegistry;
use linkprims_sync::{lock_unpoisoned, BoundedDeque, CancelToken, SyncError};
use linkprims_wire::protocol::{IDENT_USER, IDENT_WILDCARD, NETIF_MEDIATOR};
use linkprims_wire::{BufferIndex, BufferPool, Link, Message, MessageBody, MessageError, NetIfTable};
use tracing::{debug, info, warn};

use crate::binder::{deliver, Binder, Delivery, HandlerMode, Listener, ListenerId, MessageHandler, Waiter};
use crate::config::ExchangeConfig;
use crate::dispatch::{dispatch, DispatchOutcome};
use crate::error::{ExchangeError, Result};
use crate::mediator::Mediator;

/// Last correlation id handed out before wrapping back to [`IDENT_USER`].
const IDENT_LAST: u8 = 0xfe;

struct Shared {
    config: ExchangeConfig,
    pool: Arc<BufferPool>,
    netifs: Arc<NetIfTable>,
    outgoing: BoundedDeque<Binder>,
    /// Serializes the capacity check with the push in `submit`.
    submit_gate: Mutex<()>,
    incoming: Arc<BoundedDeque<Message>>,
    waiting: Mutex<Vec<Waiter>>,
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
    next_ident: Mutex<u8>,
    cancel: CancelToken,
    mediator: Arc<Mediator>,
}

/// Message exchange engine.
///
/// Owns a buffer pool, the interface table with the local [`Mediator`] on
/// interface 0, and two worker threads: a dispatcher draining the outgoing
/// queue into links, and a receiver matching incoming messages to waiters
/// by correlation id and fanning them out to listeners.
pub struct Exchange {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Exchange {
    /// Build the exchange and start its worker threads.
    pub fn new(config: ExchangeConfig, registry: Arc<ParameterRegistry>) -> Result<Self> {
        if config.outgoing_capacity == 0 {
            return Err(SyncError::ZeroCapacity.into());
        }
        let pool = Arc::new(BufferPool::new(config.pool.clone())?);
        let netifs = Arc::new(NetIfTable::new());
        let incoming = Arc::new(BoundedDeque::new(config.incoming_capacity)?);
        let mediator = Arc::new(Mediator::new(
            Arc::clone(&pool),
            &netifs,
            Arc::clone(&incoming),
            registry,
            &config.scheduler,
        ));
        netifs.insert(mediator.clone());

        let shared = Arc::new(Shared {
            // One slot beyond the submit limit so a requeued binder always fits.
            outgoing: BoundedDeque::new(config.outgoing_capacity + 1)?,
            submit_gate: Mutex::new(()),
            config,
            pool,
            netifs,
            incoming,
            waiting: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            next_ident: Mutex::new(IDENT_USER),
            cancel: CancelToken::new(),
            mediator,
        });

        let exchange = Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(2)),
        };
        exchange.spawn("linkprims-dispatch", dispatch_loop)?;
        exchange.spawn("linkprims-receive", receive_loop)?;
        info!(
            outgoing = shared.config.outgoing_capacity,
            incoming = shared.config.incoming_capacity,
            buffers = shared.pool.capacity(),
            "exchange started"
        );
        Ok(exchange)
    }

    fn spawn(&self, name: &'static str, body: fn(Arc<Shared>)) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || body(shared))
            .map_err(|source| ExchangeError::Spawn { name, source })?;
        lock_unpoisoned(&self.workers).push(handle);
        Ok(())
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.shared.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.shared.pool
    }

    pub fn netifs(&self) -> &Arc<NetIfTable> {
        &self.shared.netifs
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.shared.mediator
    }

    pub fn registry(&self) -> &Arc<ParameterRegistry> {
        self.shared.mediator.registry()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Messages waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.shared.outgoing.len()
    }

    /// Requests still waiting for replies.
    pub fn waiting_count(&self) -> usize {
        lock_unpoisoned(&self.shared.waiting).len()
    }

    /// Queue `message` for dispatch.
    ///
    /// With a handler and a nonzero correlation id, replies carrying that id
    /// are delivered to the handler until `expected_replies` have arrived
    /// (zero keeps the handler registered until the exchange closes). If the
    /// message cannot be dispatched the handler is called once with
    /// [`Delivery::Failed`].
    ///
    /// Returns false, with no side effect, when the outgoing queue is full
    /// or the exchange is closed.
    pub fn submit(
        &self,
        message: Message,
        handler: Option<Arc<dyn MessageHandler>>,
        mode: HandlerMode,
        expected_replies: usize,
    ) -> bool {
        self.shared.submit(message, handler, mode, expected_replies).is_some()
    }

    /// Submit `message` and block until its first reply.
    ///
    /// A message without a correlation id is given the next one.
    pub fn request(&self, mut message: Message, timeout: Duration) -> Result<Message> {
        if let MessageBody::General(general) = &mut message.body {
            if general.sender_id == 0 {
                general.sender_id = self.next_ident();
            }
        }
        let (tx, rx) = mpsc::sync_channel(1);
        let tx = Mutex::new(tx);
        let handler: Arc<dyn MessageHandler> = Arc::new(move |delivery: Delivery| {
            let _ = lock_unpoisoned(&tx).try_send(delivery);
        });
        let Some(binder_id) = self.shared.submit(message, Some(handler), HandlerMode::Inline, 1) else {
            return Err(if self.is_closed() {
                ExchangeError::Closed
            } else {
                ExchangeError::QueueFull
            });
        };
        match rx.recv_timeout(timeout) {
            Ok(Delivery::Reply(reply)) => Ok(reply),
            Ok(Delivery::Failed { error, .. }) => Err(ExchangeError::Dispatch(error)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.shared.remove_waiter(binder_id);
                Err(ExchangeError::Timeout(timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExchangeError::Closed),
        }
    }

    /// Register a permanent listener for messages whose correlation id is
    /// `filter_id`, or every message with [`IDENT_WILDCARD`].
    ///
    /// A handler already registered is replaced. `expected_replies` is
    /// recorded for [`listener_expected_replies`](Self::listener_expected_replies);
    /// deliveries never remove a listener.
    pub fn add_listener(
        &self,
        handler: Arc<dyn MessageHandler>,
        filter_id: u8,
        expected_replies: usize,
        mode: HandlerMode,
    ) -> ListenerId {
        self.remove_listener(&handler);
        let id = ListenerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        lock_unpoisoned(&self.shared.listeners).push(Listener {
            id,
            handler,
            filter_id,
            expected_replies,
            mode,
        });
        debug!(filter_id, expected_replies, "listener added");
        id
    }

    /// Remove every listener registered with `handler`. Returns the number
    /// removed.
    pub fn remove_listener(&self, handler: &Arc<dyn MessageHandler>) -> usize {
        let target = Arc::as_ptr(handler) as *const ();
        let mut listeners = lock_unpoisoned(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|l| Arc::as_ptr(&l.handler) as *const () != target);
        before - listeners.len()
    }

    pub fn remove_listener_by_id(&self, id: ListenerId) -> bool {
        let mut listeners = lock_unpoisoned(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    /// Reply count a listener was registered with, or `None` once removed.
    pub fn listener_expected_replies(&self, id: ListenerId) -> Option<usize> {
        lock_unpoisoned(&self.shared.listeners)
            .iter()
            .find(|l| l.id == id)
            .map(|l| l.expected_replies)
    }

    /// Next correlation id, cycling through `0x10..=0xfe`.
    pub fn next_ident(&self) -> u8 {
        let mut next = lock_unpoisoned(&self.shared.next_ident);
        let ident = *next;
        *next = if ident >= IDENT_LAST { IDENT_USER } else { ident + 1 };
        ident
    }

    /// Register a link under its interface index.
    pub fn add_link(&self, link: Arc<dyn Link>) -> Result<()> {
        let netif = link.netif();
        if netif == NETIF_MEDIATOR {
            return Err(ExchangeError::ReservedNetIf(netif));
        }
        self.shared.netifs.insert(link);
        Ok(())
    }

    /// Unregister a link and evict the isochronous tasks it owned.
    pub fn remove_link(&self, netif: u8) -> Option<Arc<dyn Link>> {
        if netif == NETIF_MEDIATOR {
            return None;
        }
        let removed = self.shared.netifs.remove(netif);
        self.shared.mediator.reset_link(netif);
        removed
    }

    /// Take a buffer received by a link. The buffer is always consumed.
    ///
    /// Returns false when the packet is not a command packet or the incoming
    /// queue is full.
    pub fn accept_incoming(&self, index: BufferIndex) -> bool {
        let decoded = match self.shared.pool.get(index) {
            Ok(buffer) => Message::decode(&buffer),
            Err(err) => Err(err),
        };
        self.shared.pool.release(index);
        match decoded {
            Ok(message) => {
                if self.shared.incoming.try_push_back(message).is_err() {
                    warn!("incoming queue full, message dropped");
                    return false;
                }
                true
            }
            Err(err) => {
                debug!(error = %err, "incoming packet dropped");
                false
            }
        }
    }

    /// Load a raw packet received on `netif` and accept it.
    pub fn accept_packet(&self, netif: u8, packet: &[u8]) -> Result<bool> {
        let index = self.shared.pool.load_packet(packet)?;
        if let Ok(mut buffer) = self.shared.pool.get(index) {
            buffer.set_in_netif(netif);
        }
        Ok(self.accept_incoming(index))
    }

    /// Service the mediator's isochronous tasks at the current tick.
    pub fn service_tasks(&self) -> usize {
        self.shared.mediator.service_tasks()
    }

    /// Stop both worker threads and drop everything queued.
    ///
    /// Pending handlers are not called. Safe to call more than once.
    pub fn close(&self) {
        let shared = &self.shared;
        shared.cancel.cancel();
        let workers: Vec<_> = lock_unpoisoned(&self.workers).drain(..).collect();
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            if worker.join().is_err() {
                warn!("exchange worker panicked");
            }
        }
        shared.outgoing.clear();
        shared.incoming.clear();
        lock_unpoisoned(&shared.waiting).clear();
        lock_unpoisoned(&shared.listeners).clear();
        shared.mediator.reset_tasks();
        info!("exchange closed");
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("pending", &self.pending())
            .field("waiting", &self.waiting_count())
            .field("netifs", &self.shared.netifs)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Shared {
    fn submit(
        &self,
        message: Message,
        handler: Option<Arc<dyn MessageHandler>>,
        mode: HandlerMode,
        expected_replies: usize,
    ) -> Option<u64> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let binder = Binder {
            id,
            message,
            handler,
            mode,
            expected_replies,
            registered: false,
        };
        let _gate = lock_unpoisoned(&self.submit_gate);
        if self.outgoing.len() >= self.config.outgoing_capacity {
            debug!("outgoing queue full, submit refused");
            return None;
        }
        self.outgoing.try_push_back(binder).ok().map(|()| id)
    }

    /// Put the binder's waiter on the waiting list before its first send.
    fn register_waiter(&self, binder: &mut Binder) {
        if binder.registered || binder.message.sender_id() == 0 {
            return;
        }
        if let Some(handler) = &binder.handler {
            let waiter = Waiter::from_binder(binder, Arc::clone(handler));
            lock_unpoisoned(&self.waiting).push(waiter);
            binder.registered = true;
        }
    }

    fn remove_waiter(&self, binder_id: u64) {
        lock_unpoisoned(&self.waiting).retain(|w| w.binder_id != binder_id);
    }

    fn fail(&self, binder: Binder, error: MessageError) {
        warn!(
            error = %error,
            command = ?binder.message.command_id(),
            sender_id = binder.message.sender_id(),
            "message dispatch failed"
        );
        if binder.registered {
            self.remove_waiter(binder.id);
        }
        if let Some(handler) = &binder.handler {
            let mut request = binder.message;
            request.last_error = Some(error);
            deliver(handler, &binder.mode, Delivery::Failed { request, error });
        }
    }

    /// Deliver one incoming message to its waiter and listeners.
    fn route(&self, message: Message) {
        let id = message.sender_id();
        let now = Instant::now();
        let stale_after = self.config.stale_after;

        let matched = {
            let mut waiting = lock_unpoisoned(&self.waiting);
            let matched = waiting.iter_mut().find(|w| w.sender_id == id).map(|waiter| {
                if waiter.bounded {
                    waiter.remaining = waiter.remaining.saturating_sub(1);
                }
                (Arc::clone(&waiter.handler), waiter.mode.clone())
            });
            let before = waiting.len();
            waiting.retain(|w| {
                let done = w.bounded && w.remaining == 0;
                let stale = w.bounded && now.duration_since(w.registered_at) > stale_after;
                !(done || stale)
            });
            let removed = before - waiting.len();
            if removed > 0 {
                debug!(removed, waiting = waiting.len(), "waiters removed");
            }
            matched
        };
        if let Some((handler, mode)) = matched {
            deliver(&handler, &mode, Delivery::Reply(message.clone()));
        }

        let listeners: Vec<_> = lock_unpoisoned(&self.listeners)
            .iter()
            .filter(|l| l.filter_id == id || l.filter_id == IDENT_WILDCARD)
            .map(|l| (Arc::clone(&l.handler), l.mode.clone()))
            .collect();
        for (handler, mode) in listeners {
            deliver(&handler, &mode, Delivery::Reply(message.clone()));
        }
    }
}

fn dispatch_loop(shared: Arc<Shared>) {
    debug!("dispatcher running");
    while let Ok(mut binder) = shared.outgoing.pop_front(None, Some(&shared.cancel)) {
        shared.register_waiter(&mut binder);
        match dispatch(
            &shared.pool,
            &shared.netifs,
            &binder.message,
            shared.config.default_netif,
        ) {
            DispatchOutcome::Sent => {}
            DispatchOutcome::NotReady => {
                if shared
                    .outgoing
                    .push_front(binder, None, Some(&shared.cancel))
                    .is_err()
                {
                    break;
                }
                if shared.cancel.sleep(shared.config.retry_interval).is_err() {
                    break;
                }
            }
            DispatchOutcome::Failed(error) => shared.fail(binder, error),
        }
    }
    debug!("dispatcher stopped");
}

fn receive_loop(shared: Arc<Shared>) {
    debug!("receiver running");
    while let Ok(message) = shared.incoming.pop_front(None, Some(&shared.cancel)) {
        shared.route(message);
    }
    debug!("receiver stopped");
}

//! Resolving a message's interface and handing its packet to the link.

use linkprims_wire::protocol::{ADDRESS_LOCAL, NETIF_MEDIATOR};
use linkprims_wire::{BufferPool, LinkHealth, Message, MessageError, NetIfTable, Route, WireError};
use tracing::{debug, warn};

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// The link is busy or not working; retry later.
    NotReady,
    /// The message can never be sent.
    Failed(MessageError),
}

/// Interface a message goes out on.
pub fn resolve_netif(message: &Message, default_netif: u8) -> u8 {
    match message.route {
        Route::Address if message.general().is_some_and(|g| g.receiver == ADDRESS_LOCAL) => NETIF_MEDIATOR,
        Route::Post | Route::Address => message.post_netif.unwrap_or(default_netif),
    }
}

/// Encode `message` into a pool buffer and pass it to its link.
pub fn dispatch(pool: &BufferPool, netifs: &NetIfTable, message: &Message, default_netif: u8) -> DispatchOutcome {
    let netif = resolve_netif(message, default_netif);
    let Some(link) = netifs.get(netif) else {
        warn!(netif, "no link for interface");
        return DispatchOutcome::Failed(MessageError::BadNetIf(netif));
    };
    let health = link.health();
    let depth = link.write_queue_depth();
    if health != LinkHealth::Working || depth > link.high_water_mark() {
        debug!(netif, ?health, depth, "link not ready");
        return DispatchOutcome::NotReady;
    }

    let index = match message.encode(pool, netif) {
        Ok(index) => index,
        Err(WireError::PayloadTooLarge { size, max }) => {
            return DispatchOutcome::Failed(MessageError::TooLarge { size, max });
        }
        Err(err) => {
            debug!(netif, error = %err, "could not encode message");
            return DispatchOutcome::NotReady;
        }
    };
    match link.send(index) {
        Ok(()) => {
            debug!(
                netif,
                command = ?message.command_id(),
                sender_id = message.sender_id(),
                "message dispatched"
            );
            DispatchOutcome::Sent
        }
        Err(index) => {
            pool.release(index);
            debug!(netif, "link refused buffer");
            DispatchOutcome::NotReady
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use linkprims_wire::{Link, MemoryLink, PoolConfig};

    use super::*;

    fn setup() -> (Arc<BufferPool>, NetIfTable, Arc<MemoryLink>) {
        let pool = Arc::new(BufferPool::new(PoolConfig::default().with_slots(8)).expect("pool should build"));
        let netifs = NetIfTable::new();
        let link = Arc::new(MemoryLink::new(5, Arc::clone(&pool)).expect("link should build"));
        netifs.insert(link.clone());
        (pool, netifs, link)
    }

    fn ticker() -> Message {
        Message::command(3).receiver(0x20).sender_id(0x10).build().expect("message should build")
    }

    #[test]
    fn resolves_local_receiver_to_mediator() {
        let local = Message::command(3)
            .route(Route::Address)
            .post_to(7)
            .build()
            .expect("message should build");
        assert_eq!(resolve_netif(&local, 5), NETIF_MEDIATOR);
        assert_eq!(resolve_netif(&ticker(), 5), 5);
        assert_eq!(resolve_netif(&ticker().with_post_netif(6), 5), 6);
        assert_eq!(resolve_netif(&ticker().with_route(Route::Address), 5), 5);
    }

    #[test]
    fn sends_to_working_link() {
        let (pool, netifs, link) = setup();
        assert_eq!(dispatch(&pool, &netifs, &ticker(), 5), DispatchOutcome::Sent);
        assert_eq!(link.write_queue_depth(), 1);
        let sent = link.take_sent(None, None).expect("buffer should be queued");
        assert_eq!(pool.get(sent).expect("buffer held").out_netif(), 5);
    }

    #[test]
    fn unknown_interface_fails() {
        let (pool, netifs, _link) = setup();
        assert_eq!(
            dispatch(&pool, &netifs, &ticker().with_post_netif(9), 5),
            DispatchOutcome::Failed(MessageError::BadNetIf(9))
        );
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn busy_or_failed_link_is_not_ready() {
        let (pool, netifs, link) = setup();
        link.set_health(LinkHealth::Starting);
        assert_eq!(dispatch(&pool, &netifs, &ticker(), 5), DispatchOutcome::NotReady);

        link.set_health(LinkHealth::Working);
        let busy = Arc::new(
            MemoryLink::new(6, Arc::clone(&pool))
                .expect("link should build")
                .with_high_water_mark(0),
        );
        netifs.insert(busy.clone());
        assert_eq!(dispatch(&pool, &netifs, &ticker().with_post_netif(6), 5), DispatchOutcome::Sent);
        assert_eq!(dispatch(&pool, &netifs, &ticker().with_post_netif(6), 5), DispatchOutcome::NotReady);
        assert_eq!(busy.discard_sent(), 1);
    }

    #[test]
    fn exhausted_pool_is_not_ready() {
        let pool = Arc::new(BufferPool::new(PoolConfig::default().with_slots(1)).expect("pool should build"));
        let netifs = NetIfTable::new();
        netifs.insert(Arc::new(MemoryLink::new(5, Arc::clone(&pool)).expect("link should build")));
        let held = pool.allocate().expect("buffer should be free");
        assert_eq!(dispatch(&pool, &netifs, &ticker(), 5), DispatchOutcome::NotReady);
        pool.release(held);
    }
}

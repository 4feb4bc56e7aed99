//! The local device endpoint.
//!
//! The mediator is registered as the link on interface 0. It answers
//! device commands against the parameter registry, turning each request
//! buffer around into its reply, and owns the isochronous scheduler that
//! repeats read requests on an interval.

use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use linkprims_param::system::INDEX_TICKER;
use linkprims_param::{
    apply_write_request, encode_read_reply, ParameterRegistry, ReadMode, TypedValue, ValueKind,
};
use linkprims_sync::{lock_unpoisoned, BoundedDeque};
use linkprims_wire::protocol::{
    command_name, CMD_ISO_MON_VAR, CMD_ISO_MSG, CMD_ISO_VAR, CMD_LOG, CMD_READ_VAR, CMD_TICKER,
    CMD_WRITE_VAR, NETIF_MEDIATOR, NETIF_UNSET,
};
use linkprims_wire::{BufferIndex, BufferPool, Link, LinkHealth, Message, NetIfTable};
use tracing::{debug, trace, warn};

use crate::config::SchedulerConfig;
use crate::scheduler::{IsoScheduler, Scheduled, TaskKey, TaskSpec};

/// Bytes ahead of the embedded request in an isochronous request:
/// iso id, interval (u16 LE) and repeat count (u16 LE).
const ISO_HEADER_LEN: usize = 5;

fn is_iso_command(command: u8) -> bool {
    matches!(command, CMD_ISO_VAR | CMD_ISO_MON_VAR | CMD_ISO_MSG)
}

/// Local device endpoint serving the parameter registry.
pub struct Mediator {
    pool: Arc<BufferPool>,
    netifs: Weak<NetIfTable>,
    incoming: Arc<BoundedDeque<Message>>,
    registry: Arc<ParameterRegistry>,
    scheduler: Mutex<IsoScheduler>,
    started: Instant,
}

impl Mediator {
    /// Replies to requests that did not arrive on a link are decoded into
    /// `incoming`; the rest go back out through the link in `netifs` they
    /// came from.
    pub fn new(
        pool: Arc<BufferPool>,
        netifs: &Arc<NetIfTable>,
        incoming: Arc<BoundedDeque<Message>>,
        registry: Arc<ParameterRegistry>,
        scheduler: &SchedulerConfig,
    ) -> Self {
        Self {
            scheduler: Mutex::new(IsoScheduler::new(scheduler, Arc::clone(&pool))),
            pool,
            netifs: Arc::downgrade(netifs),
            incoming,
            registry,
            started: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<ParameterRegistry> {
        &self.registry
    }

    /// Milliseconds since the mediator started, wrapping at `u32::MAX`.
    pub fn ticks(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Number of scheduled isochronous tasks.
    pub fn task_count(&self) -> usize {
        lock_unpoisoned(&self.scheduler).len()
    }

    /// Handle one request buffer. Always consumes the buffer.
    pub fn handle(&self, index: BufferIndex) {
        let command = match self.pool.get(index) {
            Ok(buffer) => buffer.command(),
            Err(err) => {
                warn!(index, error = %err, "mediator given a buffer it does not hold");
                return;
            }
        };
        trace!(index, command = command_name(command), "mediator request");
        match command {
            CMD_TICKER => self.ticker(index),
            CMD_READ_VAR => self.read(index, ReadMode::Read),
            CMD_WRITE_VAR => self.write(index),
            CMD_ISO_VAR | CMD_ISO_MON_VAR | CMD_ISO_MSG => self.schedule(index, command),
            CMD_LOG => self.log(index),
            _ => {
                debug!(command, "mediator ignoring command");
                self.pool.release(index);
            }
        }
    }

    fn ticker(&self, index: BufferIndex) {
        let stored = self
            .pool
            .get(index)
            .and_then(|mut buffer| buffer.set_data(&self.ticks().to_le_bytes()));
        match stored {
            Ok(()) => self.reply(index),
            Err(err) => {
                warn!(error = %err, "ticker reply does not fit");
                self.pool.release(index);
            }
        }
    }

    fn refresh_ticker(&self) {
        let ticks = i64::from(self.ticks());
        self.registry.update(INDEX_TICKER, |parameter| {
            if parameter.kind == ValueKind::UInt {
                parameter.ram = Some(TypedValue::integer(ValueKind::UInt, ticks));
            }
        });
    }

    /// Copy the data area out, let `f` rewrite it, and copy it back.
    ///
    /// The buffer is never locked while `f` holds the registry.
    fn rewrite_data<R>(
        &self,
        index: BufferIndex,
        f: impl FnOnce(&mut [u8], usize) -> Option<(usize, R)>,
    ) -> Option<R> {
        let (mut area, len) = {
            let mut buffer = self.pool.get(index).ok()?;
            let len = buffer.data_len();
            (buffer.data_area_mut().to_vec(), len)
        };
        let (len, result) = f(&mut area, len)?;
        let mut buffer = self.pool.get(index).ok()?;
        buffer.data_area_mut().copy_from_slice(&area);
        buffer.set_data_len(len);
        Some(result)
    }

    /// Encode a read reply over the request in `index`. Returns whether the
    /// reply should be sent.
    fn encode_read(&self, index: BufferIndex, mode: ReadMode) -> bool {
        self.refresh_ticker();
        let outcome = self.rewrite_data(index, |area, len| {
            encode_read_reply(&self.registry, area, len, mode).map(|outcome| (outcome.len, outcome))
        });
        match outcome {
            Some(outcome) => mode == ReadMode::Read || outcome.changed,
            None => {
                debug!(index, "malformed read request");
                false
            }
        }
    }

    fn read(&self, index: BufferIndex, mode: ReadMode) {
        if self.encode_read(index, mode) {
            self.reply(index);
        } else {
            self.pool.release(index);
        }
    }

    fn write(&self, index: BufferIndex) {
        let outcome = self.rewrite_data(index, |area, len| {
            apply_write_request(&self.registry, area, len).map(|outcome| (outcome.len, outcome))
        });
        match outcome {
            Some(outcome) => {
                debug!(written = outcome.written, "write request applied");
                self.reply(index);
            }
            None => {
                debug!(index, "malformed write request");
                self.pool.release(index);
            }
        }
    }

    fn log(&self, index: BufferIndex) {
        if let Ok(buffer) = self.pool.get(index) {
            let data = buffer.data();
            if data.len() >= 4 {
                let ticks = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                let text = String::from_utf8_lossy(&data[4..]);
                debug!(sender = buffer.sender(), ticks, text = %text.trim_end_matches('\0'), "device log");
            }
        }
        self.pool.release(index);
    }

    /// Turn an isochronous request into a task holding the embedded request.
    fn schedule(&self, index: BufferIndex, command: u8) {
        let parsed = self.pool.get(index).ok().and_then(|mut buffer| {
            let data = buffer.data().to_vec();
            if data.len() < 3 {
                return None;
            }
            let key = TaskKey {
                iso_id: data[0],
                sender: buffer.sender(),
                sender_id: buffer.sender_id(),
                in_netif: buffer.in_netif(),
            };
            let interval = u32::from(u16::from_le_bytes([data[1], data[2]]));
            if interval == 0 {
                return Some((key, 0, 0));
            }
            let minimum = if command == CMD_ISO_MSG { ISO_HEADER_LEN + 1 } else { ISO_HEADER_LEN + 3 };
            if data.len() < minimum {
                return None;
            }
            let repeat = u32::from(u16::from_le_bytes([data[3], data[4]]));
            let embedded = if command == CMD_ISO_MSG {
                let inner = data[ISO_HEADER_LEN];
                if is_iso_command(inner) {
                    warn!(inner, "isochronous message cannot embed another isochronous command");
                    return None;
                }
                buffer.set_command(inner);
                &data[ISO_HEADER_LEN + 1..]
            } else {
                buffer.set_command(CMD_READ_VAR);
                &data[ISO_HEADER_LEN..]
            };
            buffer.set_data(embedded).ok()?;
            Some((key, interval, repeat))
        });
        let Some((key, interval, repeat)) = parsed else {
            debug!(index, "malformed isochronous request");
            self.pool.release(index);
            return;
        };

        let owner = if command == CMD_ISO_MSG { NETIF_MEDIATOR } else { key.in_netif };
        let spec = TaskSpec {
            key,
            owner,
            command,
            interval,
            repeat,
            buffer: index,
        };
        match lock_unpoisoned(&self.scheduler).schedule(spec) {
            Scheduled::Inserted => {}
            Scheduled::Cancelled(_) => {
                self.pool.release(index);
            }
            Scheduled::Full => {
                warn!(iso_id = key.iso_id, "isochronous task table full");
                self.pool.release(index);
            }
        }
    }

    /// Service the scheduler at the current tick.
    pub fn service_tasks(&self) -> usize {
        self.service_tasks_at(self.ticks())
    }

    /// Service the scheduler at tick `now`, firing every due task.
    pub fn service_tasks_at(&self, now: u32) -> usize {
        let mut scheduler = lock_unpoisoned(&self.scheduler);
        scheduler.service(now, &mut |_owner: u8, command: u8, held: BufferIndex| {
            self.fire(command, held)
        })
    }

    fn fire(&self, command: u8, held: BufferIndex) {
        if command == CMD_ISO_MSG {
            match self.pool.duplicate(held) {
                Ok(copy) => self.handle(copy),
                Err(err) => warn!(error = %err, "no buffer for isochronous message"),
            }
            return;
        }
        let mode = if command == CMD_ISO_MON_VAR { ReadMode::Monitor } else { ReadMode::Read };
        // The held buffer keeps the latest reply so monitor tasks can
        // compare against it next time.
        if !self.encode_read(held, mode) {
            return;
        }
        match self.pool.duplicate(held) {
            Ok(copy) => self.reply(copy),
            Err(err) => warn!(error = %err, "no buffer for isochronous reply"),
        }
    }

    /// Evict the tasks owned by a link that went down.
    pub fn reset_link(&self, netif: u8) -> usize {
        lock_unpoisoned(&self.scheduler).reset_owner(netif)
    }

    /// Drop every scheduled task.
    pub fn reset_tasks(&self) {
        lock_unpoisoned(&self.scheduler).clear();
    }

    fn reply(&self, index: BufferIndex) {
        let out_netif = match self.pool.get(index) {
            Ok(mut buffer) => {
                buffer.turn_around();
                buffer.out_netif()
            }
            Err(_) => return,
        };
        if out_netif == NETIF_UNSET || out_netif == NETIF_MEDIATOR {
            self.deliver_local(index);
            return;
        }
        let Some(link) = self.netifs.upgrade().and_then(|netifs| netifs.get(out_netif)) else {
            warn!(netif = out_netif, "no link for reply, dropped");
            self.pool.release(index);
            return;
        };
        if let Err(index) = link.send(index) {
            warn!(netif = out_netif, "link refused reply, dropped");
            self.pool.release(index);
        }
    }

    fn deliver_local(&self, index: BufferIndex) {
        let decoded = match self.pool.get(index) {
            Ok(buffer) => Message::decode(&buffer),
            Err(err) => Err(err),
        };
        self.pool.release(index);
        match decoded {
            Ok(message) => {
                if self.incoming.try_push_back(message).is_err() {
                    warn!("incoming queue full, reply dropped");
                }
            }
            Err(err) => debug!(error = %err, "reply not decodable"),
        }
    }
}

impl Link for Mediator {
    fn netif(&self) -> u8 {
        NETIF_MEDIATOR
    }

    fn write_queue_depth(&self) -> usize {
        0
    }

    fn health(&self) -> LinkHealth {
        LinkHealth::Working
    }

    fn send(&self, buffer: BufferIndex) -> std::result::Result<(), BufferIndex> {
        self.handle(buffer);
        Ok(())
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("registry", &self.registry.len())
            .field("tasks", &self.task_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use linkprims_param::codec::{iso_request, read_request, write_request, RWV_EEPROM, RWV_RAM};
    use linkprims_param::system::{INDEX_PARAMS, INDEX_SYS_KEY};
    use linkprims_param::{decode_read_reply, Parameter, StorageFlags};
    use linkprims_wire::{MemoryLink, PoolConfig};

    use super::*;

    struct Fixture {
        pool: Arc<BufferPool>,
        netifs: Arc<NetIfTable>,
        incoming: Arc<BoundedDeque<Message>>,
        mediator: Arc<Mediator>,
    }

    fn fixture() -> Fixture {
        let pool = Arc::new(BufferPool::new(PoolConfig::default().with_slots(16)).expect("pool should build"));
        let netifs = Arc::new(NetIfTable::new());
        let incoming = Arc::new(BoundedDeque::new(16).expect("queue should build"));
        let registry = Arc::new(ParameterRegistry::with_system_page("SN-1").expect("page should build"));
        registry
            .put(
                Parameter::new(Some(10), ValueKind::Byte)
                    .with_name("Gain")
                    .expect("name should be valid")
                    .with_flags(StorageFlags::RAM | StorageFlags::EEPROM)
                    .with_ram(TypedValue::integer(ValueKind::Byte, 3))
                    .with_eeprom(TypedValue::integer(ValueKind::Byte, 7)),
            )
            .expect("put should succeed");
        let mediator = Arc::new(Mediator::new(
            Arc::clone(&pool),
            &netifs,
            Arc::clone(&incoming),
            registry,
            &SchedulerConfig::default(),
        ));
        netifs.insert(mediator.clone());
        Fixture {
            pool,
            netifs,
            incoming,
            mediator,
        }
    }

    fn request(pool: &BufferPool, command: u8, data: &[u8], in_netif: u8) -> BufferIndex {
        let index = pool
            .create_general(false, command, 0, 0x42, 0x21, data)
            .expect("request should fit");
        pool.get(index).expect("buffer held").set_in_netif(in_netif);
        index
    }

    fn next_reply(incoming: &BoundedDeque<Message>) -> Message {
        incoming
            .pop_front(Some(Duration::from_millis(100)), None)
            .expect("reply should be queued")
    }

    #[test]
    fn ticker_replies_to_sender() {
        let fx = fixture();
        fx.mediator.handle(request(&fx.pool, CMD_TICKER, &[], NETIF_UNSET));
        let reply = next_reply(&fx.incoming);
        let general = reply.general().expect("reply is a command");
        assert_eq!(general.receiver, 0x42);
        assert_eq!(general.sender_id, 0x21);
        assert_eq!(reply.data().len(), 4);
        assert_eq!(fx.pool.in_use(), 0);
    }

    #[test]
    fn read_request_round_trips_into_client_registry() {
        let fx = fixture();
        let data = read_request(4, RWV_RAM, 0, &[INDEX_PARAMS, 10]);
        fx.mediator.handle(request(&fx.pool, CMD_READ_VAR, &data, NETIF_UNSET));

        let reply = next_reply(&fx.incoming);
        let client = ParameterRegistry::new();
        let decoded = decode_read_reply(&client, reply.data(), None, None).expect("reply should decode");
        assert_eq!(decoded, 2);
        let params = client.find(INDEX_PARAMS).expect("params decoded");
        assert_eq!(params.kind, ValueKind::Byte);
        assert_eq!(params.ram.and_then(|v| v.as_i64()), Some(10));
        assert_eq!(client.find(10).and_then(|p| p.ram).and_then(|v| v.as_i64()), Some(3));
    }

    #[test]
    fn write_request_updates_registry_and_replies() {
        let fx = fixture();
        let data = write_request(5, RWV_RAM, 0, &[(10, TypedValue::integer(ValueKind::Byte, 200))]);
        fx.mediator.handle(request(&fx.pool, CMD_WRITE_VAR, &data, NETIF_UNSET));

        let reply = next_reply(&fx.incoming);
        assert_eq!(reply.data()[3], 1);
        let gain = fx.mediator.registry().find("gain").expect("gain exists");
        assert_eq!(gain.ram.and_then(|v| v.as_i64()), Some(200));
        assert_eq!(gain.eeprom.and_then(|v| v.as_i64()), Some(7));
    }

    #[test]
    fn reply_goes_back_out_the_arrival_link() {
        let fx = fixture();
        let link = Arc::new(MemoryLink::new(6, Arc::clone(&fx.pool)).expect("link should build"));
        fx.netifs.insert(link.clone());

        fx.mediator.handle(request(&fx.pool, CMD_TICKER, &[], 6));
        let sent = link.take_sent(Some(Duration::from_millis(100)), None).expect("reply should be sent");
        let buffer = fx.pool.get(sent).expect("buffer held");
        assert_eq!(buffer.out_netif(), 6);
        assert_eq!(buffer.receiver(), 0x42);
        drop(buffer);
        fx.pool.release(sent);
        assert!(fx.incoming.is_empty());
    }

    #[test]
    fn isochronous_read_fires_each_interval() {
        let fx = fixture();
        let read = read_request(4, RWV_RAM, 0, &[10]);
        let data = iso_request(1, 100, 2, &read);
        fx.mediator.handle(request(&fx.pool, CMD_ISO_VAR, &data, NETIF_UNSET));
        assert_eq!(fx.mediator.task_count(), 1);
        assert!(fx.incoming.is_empty());

        assert_eq!(fx.mediator.service_tasks_at(1), 1);
        let first = next_reply(&fx.incoming);
        assert_eq!(first.command_id(), Some(CMD_READ_VAR));
        assert_eq!(first.sender_id(), 0x21);

        assert_eq!(fx.mediator.service_tasks_at(50), 0);
        assert_eq!(fx.mediator.service_tasks_at(100), 1);
        next_reply(&fx.incoming);
        assert_eq!(fx.mediator.task_count(), 0);
        assert_eq!(fx.pool.in_use(), 0);
    }

    #[test]
    fn monitor_task_skips_unchanged_replies() {
        let fx = fixture();
        let read = read_request(4, RWV_RAM | RWV_EEPROM, 0, &[10, INDEX_SYS_KEY]);
        let data = iso_request(2, 10, 0, &read);
        fx.mediator.handle(request(&fx.pool, CMD_ISO_MON_VAR, &data, NETIF_UNSET));

        fx.mediator.service_tasks_at(1);
        next_reply(&fx.incoming);
        fx.mediator.service_tasks_at(10);
        assert!(fx.incoming.is_empty());

        fx.mediator.registry().update(10u8, |gain| {
            gain.ram = Some(TypedValue::integer(ValueKind::Byte, 4));
        });
        fx.mediator.service_tasks_at(20);
        let changed = next_reply(&fx.incoming);
        let client = ParameterRegistry::new();
        decode_read_reply(&client, changed.data(), None, None).expect("reply should decode");
        assert_eq!(client.find(10).and_then(|p| p.ram).and_then(|v| v.as_i64()), Some(4));
    }

    #[test]
    fn zero_interval_cancels_task() {
        let fx = fixture();
        let read = read_request(4, RWV_RAM, 0, &[10]);
        fx.mediator
            .handle(request(&fx.pool, CMD_ISO_VAR, &iso_request(3, 100, 0, &read), NETIF_UNSET));
        assert_eq!(fx.mediator.task_count(), 1);

        fx.mediator
            .handle(request(&fx.pool, CMD_ISO_VAR, &iso_request(3, 0, 0, &read), NETIF_UNSET));
        assert_eq!(fx.mediator.task_count(), 0);
        assert_eq!(fx.pool.in_use(), 0);
    }

    #[test]
    fn isochronous_message_repeats_embedded_command() {
        let fx = fixture();
        let mut data = iso_request(4, 10, 0, &[]);
        data.push(CMD_TICKER);
        fx.mediator.handle(request(&fx.pool, CMD_ISO_MSG, &data, NETIF_UNSET));
        fx.mediator.service_tasks_at(1);
        assert_eq!(next_reply(&fx.incoming).command_id(), Some(CMD_TICKER));
        fx.mediator.service_tasks_at(10);
        assert_eq!(next_reply(&fx.incoming).data().len(), 4);

        let mut nested = iso_request(5, 10, 0, &[]);
        nested.push(CMD_ISO_MSG);
        fx.mediator.handle(request(&fx.pool, CMD_ISO_MSG, &nested, NETIF_UNSET));
        assert_eq!(fx.mediator.task_count(), 1);
    }

    #[test]
    fn link_reset_evicts_its_tasks() {
        let fx = fixture();
        let read = read_request(4, RWV_RAM, 0, &[10]);
        fx.mediator.handle(request(&fx.pool, CMD_ISO_VAR, &iso_request(1, 100, 0, &read), 6));
        fx.mediator.handle(request(&fx.pool, CMD_ISO_VAR, &iso_request(2, 100, 0, &read), 7));
        assert_eq!(fx.mediator.reset_link(6), 1);
        assert_eq!(fx.mediator.task_count(), 1);
        fx.mediator.reset_tasks();
        assert_eq!(fx.pool.in_use(), 0);
    }

    #[test]
    fn unknown_command_is_dropped() {
        let fx = fixture();
        fx.mediator.handle(request(&fx.pool, 40, &[1, 2], NETIF_UNSET));
        assert!(fx.incoming.is_empty());
        assert_eq!(fx.pool.in_use(), 0);
    }
}

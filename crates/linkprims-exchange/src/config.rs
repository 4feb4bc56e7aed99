use std::time::Duration;

use linkprims_wire::protocol::{ADDRESS_LOCAL, NETIF_USER_BASE};
use linkprims_wire::PoolConfig;

/// Isochronous scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Fixed number of task slots.
    pub tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tasks: 16 }
    }
}

impl SchedulerConfig {
    pub fn with_tasks(mut self, tasks: usize) -> Self {
        self.tasks = tasks;
        self
    }
}

/// Exchange engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Submissions beyond this many queued messages are refused.
    pub outgoing_capacity: usize,
    /// Decoded messages waiting for the receiver thread.
    pub incoming_capacity: usize,
    /// Waiters older than this are pruned on the next receiver pass.
    pub stale_after: Duration,
    /// Pause before retrying a message whose link was busy.
    pub retry_interval: Duration,
    /// Interface used when a message names none.
    pub default_netif: u8,
    /// Address of this node, used as the sender of local messages.
    pub node_address: u16,
    pub pool: PoolConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            outgoing_capacity: 100,
            incoming_capacity: 200,
            stale_after: Duration::from_secs(60),
            retry_interval: Duration::from_millis(200),
            default_netif: NETIF_USER_BASE,
            node_address: ADDRESS_LOCAL,
            pool: PoolConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ExchangeConfig {
    pub fn with_outgoing_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_capacity = capacity;
        self
    }

    pub fn with_incoming_capacity(mut self, capacity: usize) -> Self {
        self.incoming_capacity = capacity;
        self
    }

    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after = window;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_default_netif(mut self, netif: u8) -> Self {
        self.default_netif = netif;
        self
    }

    pub fn with_node_address(mut self, address: u16) -> Self {
        self.node_address = address;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}

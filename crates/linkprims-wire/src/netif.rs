use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use linkprims_sync::lock_unpoisoned;
use tracing::info;

use crate::link::Link;

/// Links registered by interface index.
#[derive(Default)]
pub struct NetIfTable {
    links: Mutex<HashMap<u8, Arc<dyn Link>>>,
}

impl NetIfTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link under its own interface index, returning any link it
    /// replaced.
    pub fn insert(&self, link: Arc<dyn Link>) -> Option<Arc<dyn Link>> {
        let netif = link.netif();
        info!(netif, "link registered");
        lock_unpoisoned(&self.links).insert(netif, link)
    }

    pub fn remove(&self, netif: u8) -> Option<Arc<dyn Link>> {
        let removed = lock_unpoisoned(&self.links).remove(&netif);
        if removed.is_some() {
            info!(netif, "link removed");
        }
        removed
    }

    pub fn get(&self, netif: u8) -> Option<Arc<dyn Link>> {
        lock_unpoisoned(&self.links).get(&netif).cloned()
    }

    pub fn netifs(&self) -> Vec<u8> {
        let mut netifs: Vec<_> = lock_unpoisoned(&self.links).keys().copied().collect();
        netifs.sort_unstable();
        netifs
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.links).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for NetIfTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetIfTable")
            .field("netifs", &self.netifs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;
    use crate::pool::{BufferPool, PoolConfig};

    #[test]
    fn insert_replace_remove() {
        let pool = Arc::new(BufferPool::new(PoolConfig::default().with_slots(1)).expect("pool should build"));
        let table = NetIfTable::new();
        let first: Arc<dyn Link> = Arc::new(MemoryLink::new(6, Arc::clone(&pool)).expect("link should build"));
        let second: Arc<dyn Link> = Arc::new(MemoryLink::new(6, pool).expect("link should build"));

        assert!(table.insert(first).is_none());
        assert!(table.insert(second).is_some());
        assert_eq!(table.netifs(), vec![6]);
        assert!(table.get(7).is_none());
        assert!(table.remove(6).is_some());
        assert!(table.is_empty());
    }
}

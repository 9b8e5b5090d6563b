//! Packet allocator

use crate::base::pool::Pool;
use crate::base::PoolStats;
use crate::config::PoolConfig;
use crate::packet::packet::{Packet, PacketBody};

/// Bounded, thread-safe allocator of [`Packet`]s
#[derive(Clone, Debug)]
pub struct PacketPool {
    pool: Pool<PacketBody>,
}

impl PacketPool {
    /// Create a pool of at most `max_packets` packets
    pub fn new(max_packets: usize) -> Self {
        tracing::debug!("packet pool: initializing, max_packets={}", max_packets);

        Self {
            pool: Pool::new("packet pool", max_packets),
        }
    }

    /// Create a pool sized by configuration
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.max_packets)
    }

    /// Allocate an empty packet with a single reference.
    /// Returns `None` if the pool is exhausted.
    pub fn allocate(&self) -> Option<Packet> {
        self.pool
            .acquire(PacketBody::default)
            .map(Packet::from_pooled)
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_exhausted() {
        let pool = PacketPool::new(2);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(a.ref_count(), 1);
        assert!(pool.allocate().is_none());

        drop(a);
        assert!(pool.allocate().is_some());
        drop(b);

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_from_config() {
        let config = PoolConfig {
            max_packets: 3,
            ..PoolConfig::default()
        };
        let pool = PacketPool::from_config(&config);
        assert_eq!(pool.stats().capacity, 3);
    }
}

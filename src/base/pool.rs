//! Bounded lock-free object pool
//!
//! Shared allocator behind [`BufferPool`](crate::base::BufferPool) and
//! [`PacketPool`](crate::packet::PacketPool). The pool never grows past its
//! limit and never blocks: once every slot is leased, [`Pool::acquire`]
//! returns `None` until a lease is dropped. Leases may be dropped on any
//! thread; the object goes back on the free list of the pool it came from.

use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Object that can live in a [`Pool`]
pub trait Recycle: Default + Send + 'static {
    /// Reset state before the object goes back on the free list.
    fn recycle(&mut self) {}
}

impl Recycle for Box<[u8]> {}

/// Bounded pool of reusable objects
pub struct Pool<T: Recycle> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    name: &'static str,
    free: ArrayQueue<T>,
    limit: usize,
    in_use: AtomicUsize,
    allocations: AtomicU64,
    failures: AtomicU64,
}

impl<T: Recycle> Pool<T> {
    /// Create a pool that hands out at most `limit` objects at once
    pub fn new(name: &'static str, limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                free: ArrayQueue::new(limit.max(1)),
                limit,
                in_use: AtomicUsize::new(0),
                allocations: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Lease an object, reusing a free one or creating it with `make`.
    /// Returns `None` when the limit is reached.
    pub fn acquire(&self, make: impl FnOnce() -> T) -> Option<Pooled<T>> {
        let shared = &self.shared;

        let reserved = shared
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < shared.limit {
                    Some(n + 1)
                } else {
                    None
                }
            });

        if reserved.is_err() {
            shared.failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("{}: exhausted, limit {}", shared.name, shared.limit);
            return None;
        }

        shared.allocations.fetch_add(1, Ordering::Relaxed);

        let value = shared.free.pop().unwrap_or_else(make);

        Some(Pooled {
            inner: value,
            pool: Arc::downgrade(shared),
        })
    }

    /// Maximum number of simultaneously leased objects
    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.shared.limit,
            in_use: self.shared.in_use.load(Ordering::Acquire),
            idle: self.shared.free.len(),
            allocations: self.shared.allocations.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
        }
    }
}

impl<T: Recycle> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Recycle> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Object leased from a [`Pool`], returned to it on drop
pub struct Pooled<T: Recycle> {
    inner: T,
    pool: Weak<Shared<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        let mut value = std::mem::take(&mut self.inner);

        // Pool already gone: the object is simply freed.
        let Some(shared) = self.pool.upgrade() else {
            return;
        };

        value.recycle();

        // Push before releasing the slot so the number of live objects
        // never exceeds the free list capacity.
        let _ = shared.free.push(value);
        shared.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Maximum number of simultaneous leases
    pub capacity: usize,
    /// Currently leased objects
    pub in_use: usize,
    /// Objects waiting on the free list
    pub idle: usize,
    /// Successful acquisitions since creation
    pub allocations: u64,
    /// Acquisitions refused because the pool was exhausted
    pub failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Counter {
        value: u32,
        recycled: bool,
    }

    impl Recycle for Counter {
        fn recycle(&mut self) {
            self.value = 0;
            self.recycled = true;
        }
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool: Pool<Counter> = Pool::new("test pool", 2);

        let a = pool.acquire(Counter::default);
        let b = pool.acquire(Counter::default);
        assert!(a.is_some());
        assert!(b.is_some());

        assert!(pool.acquire(Counter::default).is_none());

        let stats = pool.stats();
        assert_eq!(stats.in_use, 2);
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_pool_reuses_released_objects() {
        let pool: Pool<Counter> = Pool::new("test pool", 1);

        {
            let mut obj = pool.acquire(Counter::default).unwrap();
            obj.value = 7;
        }
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(pool.stats().idle, 1);

        let obj = pool
            .acquire(|| -> Counter { panic!("should reuse the idle object") })
            .unwrap();
        assert!(obj.recycled);
        assert_eq!(obj.value, 0);
    }

    #[test]
    fn test_pool_zero_limit() {
        let pool: Pool<Counter> = Pool::new("empty pool", 0);
        assert!(pool.acquire(Counter::default).is_none());
        assert_eq!(pool.stats().capacity, 0);
    }

    #[test]
    fn test_lease_outlives_pool() {
        let pool: Pool<Counter> = Pool::new("short pool", 1);
        let obj = pool.acquire(Counter::default).unwrap();
        drop(pool);
        drop(obj);
    }

    #[test]
    fn test_release_from_other_thread() {
        let pool: Pool<Box<[u8]>> = Pool::new("bytes pool", 4);

        let leases: Vec<_> = (0..4)
            .map(|_| pool.acquire(|| vec![0u8; 16].into_boxed_slice()).unwrap())
            .collect();
        assert!(pool.acquire(|| vec![0u8; 16].into_boxed_slice()).is_none());

        thread::spawn(move || drop(leases)).join().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.idle, 4);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let pool: Pool<Counter> = Pool::new("shared pool", 8);
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let peak = peak.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(obj) = pool.acquire(Counter::default) {
                            peak.fetch_max(pool.stats().in_use, Ordering::Relaxed);
                            drop(obj);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::Relaxed) <= 8);
        assert_eq!(pool.stats().in_use, 0);
        assert!(pool.stats().idle <= 8);
    }
}

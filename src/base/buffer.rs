//! Pooled byte buffers
//!
//! A [`Buffer`] is a fixed-capacity block of bytes leased from a
//! [`BufferPool`]. Handles are reference counted with atomic counts, so the
//! final release may happen on a different thread than the allocation; the
//! storage returns to the pool when the last handle is dropped.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::Arc;

use crate::base::pool::{Pool, PoolStats, Pooled};
use crate::config::PoolConfig;

/// Reference-counted fixed-capacity byte block owned by a [`BufferPool`]
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    data: UnsafeCell<Pooled<Box<[u8]>>>,
}

// SAFETY: the storage is written only through `Buffer::get_mut`, which
// requires the handle to be unique, or through `BufferLease::storage_mut`,
// which requires exclusive access to a lease owning every live handle.
// Everything else is shared reads.
unsafe impl Sync for BufferInner {}

impl Buffer {
    /// Byte capacity
    pub fn capacity(&self) -> usize {
        self.data().len()
    }

    /// Whole storage, regardless of how much of it was filled
    pub fn data(&self) -> &[u8] {
        // SAFETY: see `BufferInner`; no writer coexists with this borrow.
        let data: &Pooled<Box<[u8]>> = unsafe { &*self.inner.data.get() };
        &data[..]
    }

    /// Mutable storage, available only while this is the sole handle
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.inner).map(|inner| &mut inner.data.get_mut()[..])
    }

    /// Number of live handles to this buffer
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same storage
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Buffer lent out for an in-place write while two handles are live
///
/// The lease owns both handles, so the storage can be written through
/// `&mut self` without anybody else observing it. Built only from a unique
/// buffer.
pub(crate) struct BufferLease {
    buffer: Buffer,
    pending: Buffer,
}

impl BufferLease {
    /// Lend `buffer`, which must be the only handle to its storage
    pub(crate) fn new(buffer: Buffer) -> Option<Self> {
        if buffer.ref_count() != 1 {
            return None;
        }

        let pending = buffer.clone();
        Some(Self { buffer, pending })
    }

    /// Storage to write into, viewed as possibly uninitialized bytes
    pub(crate) fn storage_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        // SAFETY: both live handles belong to `self` and `&mut self` is held
        // for the lifetime of the slice. `MaybeUninit<u8>` has the layout of
        // `u8`, and the slice only ever receives initialized bytes.
        unsafe {
            let data: &mut Pooled<Box<[u8]>> = &mut *self.buffer.inner.data.get();
            let bytes: &mut [u8] = &mut data[..];
            &mut *(bytes as *mut [u8] as *mut [MaybeUninit<u8>])
        }
    }

    /// Number of live handles to the storage
    pub(crate) fn ref_count(&self) -> usize {
        self.pending.ref_count()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// End the lease, giving back the allocated handle and the pending one
    pub(crate) fn into_parts(self) -> (Buffer, Buffer) {
        (self.buffer, self.pending)
    }
}

/// Bounded, thread-safe allocator of [`Buffer`]s
#[derive(Clone, Debug)]
pub struct BufferPool {
    pool: Pool<Box<[u8]>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool of at most `max_buffers` buffers of `buffer_size` bytes
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        tracing::debug!(
            "buffer pool: initializing, buffer_size={} max_buffers={}",
            buffer_size,
            max_buffers
        );

        Self {
            pool: Pool::new("buffer pool", max_buffers),
            buffer_size,
        }
    }

    /// Create a pool sized by configuration
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.buffer_size, config.max_buffers)
    }

    /// Allocate a buffer with a single reference.
    /// Returns `None` if the pool is exhausted.
    pub fn allocate(&self) -> Option<Buffer> {
        let size = self.buffer_size;
        let data = self.pool.acquire(|| vec![0u8; size].into_boxed_slice())?;

        Some(Buffer {
            inner: Arc::new(BufferInner {
                data: UnsafeCell::new(data),
            }),
        })
    }

    /// Capacity of every buffer in this pool
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_allocate_single_reference() {
        let pool = BufferPool::new(64, 4);
        let buffer = pool.allocate().unwrap();

        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.ref_count(), 1);
        assert_eq!(pool.stats().in_use, 1);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let pool = BufferPool::new(32, 3);

        let held: Vec<Buffer> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        assert!(pool.allocate().is_none());
        assert!(pool.allocate().is_none());

        drop(held);
        assert!(pool.allocate().is_some());
    }

    #[test]
    fn test_reclaimed_on_last_release() {
        let pool = BufferPool::new(32, 1);

        let first = pool.allocate().unwrap();
        let second = first.clone();
        assert_eq!(first.ref_count(), 2);

        drop(first);
        assert_eq!(second.ref_count(), 1);
        assert!(pool.allocate().is_none());

        drop(second);
        assert_eq!(pool.stats().in_use, 0);
        assert!(pool.allocate().is_some());
    }

    #[test]
    fn test_get_mut_requires_unique_handle() {
        let pool = BufferPool::new(8, 1);
        let mut buffer = pool.allocate().unwrap();

        buffer.get_mut().unwrap()[..3].copy_from_slice(b"abc");
        assert_eq!(&buffer.data()[..3], b"abc");

        let other = buffer.clone();
        assert!(buffer.get_mut().is_none());
        assert!(buffer.ptr_eq(&other));

        drop(other);
        assert!(buffer.get_mut().is_some());
    }

    #[test]
    fn test_lease_requires_unique_buffer() {
        let pool = BufferPool::new(8, 1);
        let buffer = pool.allocate().unwrap();
        let other = buffer.clone();

        assert!(BufferLease::new(buffer).is_none());
        assert_eq!(other.ref_count(), 1);

        let mut lease = BufferLease::new(other).unwrap();
        assert_eq!(lease.ref_count(), 2);
        for (dst, src) in lease.storage_mut().iter_mut().zip(b"xyz") {
            dst.write(*src);
        }

        let (buffer, pending) = lease.into_parts();
        drop(pending);
        assert_eq!(buffer.ref_count(), 1);
        assert_eq!(&buffer.data()[..3], b"xyz");
    }

    #[test]
    fn test_release_on_other_thread() {
        let pool = BufferPool::new(16, 2);
        let buffer = pool.allocate().unwrap();
        let copy = buffer.clone();

        thread::spawn(move || drop(copy)).join().unwrap();
        assert_eq!(buffer.ref_count(), 1);

        thread::spawn(move || drop(buffer)).join().unwrap();
        assert_eq!(pool.stats().in_use, 0);
    }
}

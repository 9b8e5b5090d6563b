//! Zero-copy views into pooled buffers

use bytes::Bytes;
use std::fmt;
use std::ops::Deref;

use crate::base::buffer::Buffer;

/// View of `len` bytes at `offset` inside a [`Buffer`]
///
/// A slice holds one reference on its buffer for as long as it lives, so
/// the payload stays valid even after the receiver has let go of the buffer.
#[derive(Clone)]
pub struct Slice {
    buffer: Buffer,
    offset: usize,
    len: usize,
}

impl Slice {
    /// Create a view over `buffer[offset..offset + len]`
    pub fn new(buffer: Buffer, offset: usize, len: usize) -> Self {
        crate::fatal_if!(
            offset.checked_add(len).map_or(true, |end| end > buffer.capacity()),
            "slice: out of bounds: offset={} len={} capacity={}",
            offset,
            len,
            buffer.capacity()
        );

        Self {
            buffer,
            offset,
            len,
        }
    }

    /// Narrow the view to `[from, to)` relative to this slice
    pub fn subslice(&self, from: usize, to: usize) -> Slice {
        crate::fatal_if!(
            from > to || to > self.len,
            "slice: bad subslice: from={} to={} len={}",
            from,
            to,
            self.len
        );

        Slice::new(self.buffer.clone(), self.offset + from, to - from)
    }

    /// Viewed bytes
    pub fn data(&self) -> &[u8] {
        &self.buffer.data()[self.offset..self.offset + self.len]
    }

    /// Start of the view inside the buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the view
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Underlying buffer
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Hand the payload off as [`Bytes`] without copying.
    /// The buffer is released once every derived `Bytes` is dropped.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from_owner(self.clone())
    }
}

impl Deref for Slice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl AsRef<[u8]> for Slice {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("capacity", &self.buffer.capacity())
            .finish()
    }
}

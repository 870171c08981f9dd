use crate::storage::ring::Ring;
use crate::storage::Storage;
use std::io;

/// Fixed-capacity in-memory storage.
///
/// This is the default backend used by the relay entry points. Once the
/// region is full, writes accept no further bytes until a read frees space,
/// which is what gives a pipe over this storage its backpressure.
pub struct MemoryStorage {
    ring: Ring,
}

impl MemoryStorage {
    /// The capacity used by [`MemoryStorage::new`], 32 KiB.
    pub const DEFAULT_CAPACITY: usize = 32 * 1024;

    /// Create a storage region with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create a storage region with at least the given capacity.
    ///
    /// The capacity is rounded up to the next power of two; the effective
    /// value is reported by [`Storage::capacity`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Ring::with_capacity(capacity),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    #[inline]
    fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.ring.pull(buf))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.ring.push(buf))
    }
}

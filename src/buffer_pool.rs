//! Buffer pool for reducing allocation overhead
//!
//! Reusable BytesMut buffers for the per-connection read/write paths.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

/// Default buffer size for pooled buffers
const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Maximum number of buffers to keep in the pool
const MAX_POOLED_BUFFERS: usize = 256;

/// Maximum buffer size to return to pool (oversized buffers are dropped)
const MAX_POOLED_BUFFER_SIZE: usize = 16384;

/// A pool of reusable BytesMut buffers
pub struct BufferPool {
    pool: ArrayQueue<BytesMut>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            pool: ArrayQueue::new(MAX_POOLED_BUFFERS),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Get a buffer from the pool, or allocate a new one if the pool is empty
    #[inline]
    pub fn get(&self) -> BytesMut {
        self.pool
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size))
    }

    /// Return a buffer to the pool for reuse; cleared first, dropped if
    /// oversized or the pool is full
    #[inline]
    pub fn put(&self, mut buf: BytesMut) {
        if buf.capacity() <= MAX_POOLED_BUFFER_SIZE {
            buf.clear();
            let _ = self.pool.push(buf);
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Global buffer pool instance
static GLOBAL_POOL: std::sync::OnceLock<Arc<BufferPool>> = std::sync::OnceLock::new();

fn global_pool() -> &'static Arc<BufferPool> {
    GLOBAL_POOL.get_or_init(|| Arc::new(BufferPool::new()))
}

/// Get a buffer from the global pool
#[inline]
pub fn get_buffer() -> BytesMut {
    global_pool().get()
}

/// Return a buffer to the global pool
#[inline]
pub fn put_buffer(buf: BytesMut) {
    global_pool().put(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let pool = BufferPool::new();

        let buf = pool.get();
        assert!(buf.capacity() >= DEFAULT_BUFFER_SIZE);

        pool.put(buf);
        assert_eq!(pool.len(), 1);

        let buf2 = pool.get();
        assert!(buf2.is_empty());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_buffer_pool_drops_oversized() {
        let pool = BufferPool::new();

        let mut buf = BytesMut::with_capacity(MAX_POOLED_BUFFER_SIZE + 1);
        buf.extend_from_slice(&[0u8; 100]);

        pool.put(buf);
        assert_eq!(pool.len(), 0);
    }
}

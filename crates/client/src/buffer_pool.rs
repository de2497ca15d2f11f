//! Reusable byte buffers for request bodies.
//!
//! Batch bodies and upload chunks are assembled in buffers of up to the
//! request size limit. A [`PooledBuffer`] is checked out for one batch or
//! chunk and returned to the pool when dropped, on success and error paths
//! alike.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Thread-safe pool of byte buffers.
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    max_buffers: usize,
}

impl BufferPool {
    /// Creates an empty pool that retains at most `max_buffers` idle buffers.
    pub fn new(max_buffers: usize) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(Vec::new()),
            max_buffers,
        })
    }

    /// Checks out a cleared buffer with room for at least `capacity` bytes.
    pub fn acquire(self: &Arc<Self>, capacity: usize) -> PooledBuffer {
        let mut buf = self.buffers.lock().pop().unwrap_or_default();
        buf.clear();
        buf.reserve(capacity);
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_buffers {
            buffers.push(buf);
        }
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }
}

/// A buffer checked out of a [`BufferPool`].
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Appends up to `n` bytes from `reader`, stopping early only at end of
    /// input. Returns the number of bytes appended.
    pub async fn fill_from<R>(&mut self, reader: &mut R, n: u64) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        read_into(reader, self, n).await
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

/// Upper bound on space reserved ahead of a read.
const MAX_RESERVE: u64 = 64 * 1024 * 1024;

/// Appends up to `n` bytes from `reader` to `buf`.
pub(crate) async fn read_into<R>(reader: &mut R, buf: &mut BytesMut, n: u64) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let start = buf.len();
    buf.reserve(n.min(MAX_RESERVE) as usize);
    let mut limited = reader.take(n);
    while limited.read_buf(buf).await? != 0 {}
    Ok((buf.len() - start) as u64)
}

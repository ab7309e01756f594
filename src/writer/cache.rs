//! Bounded in-memory write cache in front of the recording file.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Accumulates file entries until the recorder loop flushes them.
#[derive(Debug)]
pub struct WriteCache {
    buf: BytesMut,
    capacity: usize,
}

impl WriteCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `bytes`, draining the cache into `sink` first if they would not fit.
    ///
    /// A write at least as large as the whole cache bypasses it.
    pub async fn write<W>(&mut self, sink: &mut W, bytes: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.buf.len() + bytes.len() > self.capacity {
            self.write_out(sink).await?;
        }
        if bytes.len() >= self.capacity {
            sink.write_all(bytes).await?;
        } else {
            self.buf.extend_from_slice(bytes);
        }
        Ok(())
    }

    /// Write the cached bytes to `sink` and flush it.
    ///
    /// This is an application-level flush; durability comes from syncing
    /// the file when it is closed.
    pub async fn flush<W>(&mut self, sink: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.write_out(sink).await?;
        sink.flush().await
    }

    async fn write_out<W>(&mut self, sink: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if !self.buf.is_empty() {
            sink.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }
}

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crossbeam_channel::{Receiver, Sender};

/// A bounded free-list of fixed-size sample buffers.
///
/// Buffers are handed out by value and come back by value, so a buffer is only
/// ever held in one place at a time. Clones share the same free-list, and any
/// number of threads can acquire and release concurrently.
#[derive(Clone)]
pub struct BufferPool {
    send: Sender<Vec<u8>>,
    recv: Receiver<Vec<u8>>,
    packet_size: usize,
    allocations: Arc<AtomicUsize>,
}

impl BufferPool {
    /// Create an empty pool holding at most `capacity` free buffers of
    /// `packet_size` bytes each.
    pub fn new(capacity: usize, packet_size: usize) -> Self {
        let (send, recv) = crossbeam_channel::bounded(capacity);
        Self {
            send,
            recv,
            packet_size,
            allocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get a buffer from the pool, allocating a zeroed one if none are free.
    ///
    /// Never blocks.
    pub fn acquire(&self) -> Vec<u8> {
        match self.recv.try_recv() {
            Ok(buf) => buf,
            Err(_) => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.packet_size]
            }
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Buffers of the wrong size are dropped with a warning. If the pool is
    /// already full, the buffer is simply dropped.
    pub fn release(&self, buf: Vec<u8>) {
        if buf.len() != self.packet_size {
            tracing::warn!(
                len = buf.len(),
                expected = self.packet_size,
                "Dropping returned buffer with the wrong size"
            );
            return;
        }
        let _ = self.send.try_send(buf);
    }

    /// Number of free buffers currently held.
    pub fn available(&self) -> usize {
        self.recv.len()
    }

    /// Maximum number of free buffers the pool will hold.
    pub fn capacity(&self) -> usize {
        self.recv.capacity().unwrap_or(0)
    }

    /// Size of every buffer handed out, in bytes.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// How many buffers the pool has had to allocate so far.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("packet_size", &self.packet_size)
            .field("available", &self.available())
            .field("capacity", &self.capacity())
            .finish()
    }
}

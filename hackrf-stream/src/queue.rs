use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// A bounded FIFO of sample packets, shared between the streaming engine and
/// the application.
///
/// While receiving, the engine pushes each completed packet in the order the
/// HackRF delivered it. While transmitting, the engine pulls packets in the
/// order the application queued them. Clones share the same queue.
#[derive(Clone)]
pub struct SampleQueue {
    send: Sender<Vec<u8>>,
    recv: Receiver<Vec<u8>>,
}

impl SampleQueue {
    /// Create a queue holding at most `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        let (send, recv) = crossbeam_channel::bounded(capacity);
        Self { send, recv }
    }

    /// Push a packet without blocking. Hands the packet back if the queue is
    /// full.
    pub fn try_push(&self, buf: Vec<u8>) -> Result<(), Vec<u8>> {
        self.send.try_send(buf).map_err(|e| e.into_inner())
    }

    /// Push a packet, waiting up to `timeout` for room. Hands the packet back
    /// on timeout.
    pub fn push_timeout(&self, buf: Vec<u8>, timeout: Duration) -> Result<(), Vec<u8>> {
        self.send
            .send_timeout(buf, timeout)
            .map_err(|e| e.into_inner())
    }

    /// Take the oldest packet, waiting up to `timeout` for one to arrive.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        match self.recv.recv_timeout(timeout) {
            Ok(buf) => Some(buf),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take the oldest packet if there is one.
    pub fn try_poll(&self) -> Option<Vec<u8>> {
        self.recv.try_recv().ok()
    }

    /// Drop everything in the queue.
    pub fn clear(&self) {
        for _ in self.recv.try_iter() {}
    }

    /// Number of packets waiting.
    pub fn len(&self) -> usize {
        self.recv.len()
    }

    /// True if no packets are waiting.
    pub fn is_empty(&self) -> bool {
        self.recv.is_empty()
    }

    /// Maximum number of packets the queue holds.
    pub fn capacity(&self) -> usize {
        self.recv.capacity().unwrap_or(0)
    }
}

impl std::fmt::Debug for SampleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

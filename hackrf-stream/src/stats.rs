use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

/// Throughput statistics for the current stream.
///
/// Only the streaming engine counts packets; any thread may read without
/// blocking.
#[derive(Debug)]
pub struct Stats {
    epoch: Instant,
    // Milliseconds since `epoch` at stream start, plus one. Zero means no
    // stream was started yet.
    started: AtomicU64,
    packets: AtomicU64,
    packet_size: u64,
}

impl Stats {
    pub(crate) fn new(packet_size: usize) -> Self {
        Self {
            epoch: Instant::now(),
            started: AtomicU64::new(0),
            packets: AtomicU64::new(0),
            packet_size: packet_size as u64,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn reset(&self) {
        self.packets.store(0, Ordering::Release);
        self.started.store(self.now_ms() + 1, Ordering::Release);
    }

    pub(crate) fn count_packet(&self) {
        self.packets.fetch_add(1, Ordering::Release);
    }

    /// Milliseconds since the current stream started, or 0 if none has.
    pub fn elapsed_ms(&self) -> u64 {
        match self.started.load(Ordering::Acquire) {
            0 => 0,
            started => self.now_ms().saturating_sub(started - 1),
        }
    }

    /// Packets moved since the current stream started.
    pub fn packet_counter(&self) -> u64 {
        self.packets.load(Ordering::Acquire)
    }

    /// Average throughput in bytes per second, over whole elapsed seconds.
    ///
    /// Reads 0 during the first second of a stream.
    pub fn average_rate(&self) -> u64 {
        let secs = self.elapsed_ms() / 1000;
        if secs == 0 {
            return 0;
        }
        self.packet_counter() * self.packet_size / secs
    }
}

//! The streaming engine: one background thread per running stream, keeping a
//! fixed number of bulk transfers in flight and moving packets between them and
//! the sample queue.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    TransceiverMode,
    device::Device,
    host::{Completion, Endpoint, TransferId, UsbHost},
    pool::BufferPool,
    queue::SampleQueue,
    stats::Stats,
};

/// Reaping gives up after this many empty polls in a row.
const REAP_ATTEMPTS: usize = 10;

/// Outcome of waiting on the in-flight transfers.
enum Next {
    /// One of ours finished and handed its buffer back.
    Packet(Vec<u8>),
    /// Nothing of ours finished this poll.
    Idle,
    /// The stream can't go on.
    End,
}

pub(crate) struct Engine<H> {
    pub(crate) device: Arc<Device<H>>,
    pub(crate) pool: BufferPool,
    pub(crate) queue: SampleQueue,
    pub(crate) stats: Arc<Stats>,
    pub(crate) mode: TransceiverMode,
    pub(crate) transfer_count: usize,
    pub(crate) tx_timeout: Duration,
    pub(crate) completion_poll: Duration,
}

impl<H: UsbHost> Engine<H> {
    /// Run the stream until the mode changes or the stream fails, then clean
    /// up every transfer still in flight.
    pub(crate) fn run(self) {
        let mut in_flight = Vec::with_capacity(self.transfer_count);
        match self.mode {
            TransceiverMode::Receive => self.receive(&mut in_flight),
            TransceiverMode::Transmit => self.transmit(&mut in_flight),
            TransceiverMode::Off => (),
        }
        self.finish(in_flight);
    }

    fn running(&self) -> bool {
        self.device.mode() == self.mode
    }

    fn submit(&self, endpoint: Endpoint, buf: Vec<u8>, in_flight: &mut Vec<TransferId>) -> bool {
        match self.device.host().submit_bulk(endpoint, buf) {
            Ok(id) => {
                in_flight.push(id);
                true
            }
            Err(err) => {
                tracing::error!(?endpoint, %err, "Couldn't submit bulk transfer");
                false
            }
        }
    }

    /// Wait for the next completion belonging to this stream.
    fn next_complete(&self, in_flight: &mut Vec<TransferId>) -> Next {
        let Completion {
            id,
            endpoint,
            buf,
            status,
        } = match self.device.host().wait_any(self.completion_poll) {
            Ok(Some(c)) => c,
            Ok(None) => return Next::Idle,
            Err(err) => {
                tracing::error!(%err, "Waiting on bulk transfers failed");
                return Next::End;
            }
        };
        let Some(pos) = in_flight.iter().position(|t| *t == id) else {
            tracing::debug!(?id, ?endpoint, "Ignoring completion of an unknown transfer");
            self.pool.release(buf);
            return Next::Idle;
        };
        in_flight.swap_remove(pos);
        if let Err(err) = status {
            tracing::error!(?endpoint, %err, "Bulk transfer failed");
            self.recycle(buf);
            return Next::End;
        }
        Next::Packet(buf)
    }

    fn recycle(&self, mut buf: Vec<u8>) {
        buf.resize(self.pool.packet_size(), 0);
        self.pool.release(buf);
    }

    fn receive(&self, in_flight: &mut Vec<TransferId>) {
        for _ in 0..self.transfer_count {
            if !self.submit(Endpoint::In, self.pool.acquire(), in_flight) {
                return;
            }
        }

        while self.running() {
            let mut buf = match self.next_complete(in_flight) {
                Next::Packet(buf) => buf,
                Next::Idle => continue,
                Next::End => break,
            };
            let packet_size = self.pool.packet_size();
            if buf.len() != packet_size {
                tracing::warn!(
                    len = buf.len(),
                    expected = packet_size,
                    "Short receive transfer, padding with zeros"
                );
                buf.resize(packet_size, 0);
            }
            self.stats.count_packet();
            if let Err(buf) = self.queue.try_push(buf) {
                tracing::warn!("Sample queue is full, stopping receive");
                self.pool.release(buf);
                break;
            }
            if !self.submit(Endpoint::In, self.pool.acquire(), in_flight) {
                break;
            }
        }
    }

    /// Take the next packet the application queued for transmit.
    ///
    /// Gives up once `tx_timeout` passes with nothing queued, on a packet of
    /// the wrong size, or when the stream is stopped.
    fn next_tx_packet(&self) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.tx_timeout;
        loop {
            if !self.running() {
                return None;
            }
            let wait = deadline
                .saturating_duration_since(Instant::now())
                .min(self.completion_poll);
            if let Some(buf) = self.queue.poll_timeout(wait) {
                if buf.len() != self.pool.packet_size() {
                    tracing::error!(
                        len = buf.len(),
                        expected = self.pool.packet_size(),
                        "Queued transmit packet has the wrong size, stopping transmit"
                    );
                    return None;
                }
                return Some(buf);
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout = ?self.tx_timeout,
                    "Nothing queued for transmit in time, stopping transmit"
                );
                return None;
            }
        }
    }

    fn transmit(&self, in_flight: &mut Vec<TransferId>) {
        for _ in 0..self.transfer_count {
            let Some(buf) = self.next_tx_packet() else {
                return;
            };
            if !self.submit(Endpoint::Out, buf, in_flight) {
                return;
            }
        }

        while self.running() {
            let buf = match self.next_complete(in_flight) {
                Next::Packet(buf) => buf,
                Next::Idle => continue,
                Next::End => break,
            };
            self.stats.count_packet();
            self.recycle(buf);
            let Some(buf) = self.next_tx_packet() else {
                break;
            };
            if !self.submit(Endpoint::Out, buf, in_flight) {
                break;
            }
        }
    }

    fn finish(&self, mut in_flight: Vec<TransferId>) {
        let host = self.device.host();
        for id in &in_flight {
            host.cancel(*id);
        }

        let mut misses = 0;
        while !in_flight.is_empty() && misses < REAP_ATTEMPTS {
            match host.wait_any(self.completion_poll) {
                Ok(Some(c)) => {
                    if let Some(pos) = in_flight.iter().position(|t| *t == c.id) {
                        in_flight.swap_remove(pos);
                    }
                    self.recycle(c.buf);
                    misses = 0;
                }
                Ok(None) => misses += 1,
                Err(err) => {
                    tracing::warn!(%err, "Waiting on cancelled transfers failed");
                    break;
                }
            }
        }
        if !in_flight.is_empty() {
            tracing::warn!(
                count = in_flight.len(),
                "Cancelled transfers never completed, their buffers are lost"
            );
        }

        // Stopped on its own, so the HackRF still thinks it's streaming.
        if self.running() {
            if let Err(err) = self.device.set_transceiver_mode(TransceiverMode::Off) {
                tracing::warn!(%err, "Couldn't switch the HackRF off after the stream ended");
                self.device.force_mode(TransceiverMode::Off);
            }
        }

        tracing::info!(
            mode = %self.mode,
            packets = self.stats.packet_counter(),
            elapsed_ms = self.stats.elapsed_ms(),
            "Stream finished"
        );
    }
}

use std::time::Duration;

use crate::{
    Error,
    consts::{PACKET_SIZE, TRANSFER_COUNT},
};

/// Driver configuration.
///
/// The defaults match what the HackRF firmware and `libhackrf` expect:
/// 16 KiB packets, four transfers in flight, and 1 MiB of queued samples.
///
/// ```
/// use std::time::Duration;
/// use hackrf_stream::Config;
///
/// let config = Config::default()
///     .with_queue_size(8 * 16384)
///     .with_tx_timeout(Duration::from_millis(250));
/// assert_eq!(config.queue_capacity(), 8);
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Size of every sample packet, in bytes. Must be a non-zero multiple of
    /// 512, the HackRF's bulk transfer granularity.
    pub packet_size: usize,
    /// Byte budget for the sample queue and buffer pool. Each holds
    /// `queue_size / packet_size` packets.
    pub queue_size: usize,
    /// Number of bulk transfers kept in flight while streaming.
    pub transfer_count: usize,
    /// How long the transmit loop waits for the application to queue the next
    /// packet before giving up.
    pub tx_timeout: Duration,
    /// How long the engine blocks waiting for a transfer before re-checking
    /// whether it was asked to stop.
    pub completion_poll: Duration,
    /// Timeout applied to every control transfer.
    pub control_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size: PACKET_SIZE,
            queue_size: 64 * PACKET_SIZE,
            transfer_count: TRANSFER_COUNT,
            tx_timeout: Duration::from_millis(1000),
            completion_poll: Duration::from_millis(100),
            control_timeout: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Set the packet size, in bytes.
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the queue byte budget.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the number of in-flight transfers.
    pub fn with_transfer_count(mut self, transfer_count: usize) -> Self {
        self.transfer_count = transfer_count;
        self
    }

    /// Set the transmit queue timeout.
    pub fn with_tx_timeout(mut self, tx_timeout: Duration) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    /// Set the engine's completion poll interval.
    pub fn with_completion_poll(mut self, completion_poll: Duration) -> Self {
        self.completion_poll = completion_poll;
        self
    }

    /// Set the control transfer timeout.
    pub fn with_control_timeout(mut self, control_timeout: Duration) -> Self {
        self.control_timeout = control_timeout;
        self
    }

    /// Number of packets the queue and the pool can each hold.
    pub fn queue_capacity(&self) -> usize {
        self.queue_size / self.packet_size.max(1)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.packet_size == 0 || self.packet_size & 0x1FF != 0 {
            return Err(Error::InvalidConfig(
                "packet size must be a non-zero multiple of 512 bytes",
            ));
        }
        if self.queue_capacity() == 0 {
            return Err(Error::InvalidConfig(
                "queue size must hold at least one packet",
            ));
        }
        if self.transfer_count == 0 {
            return Err(Error::InvalidConfig(
                "at least one transfer must be in flight",
            ));
        }
        if self.completion_poll.is_zero() {
            return Err(Error::InvalidConfig("completion poll interval is zero"));
        }
        Ok(())
    }
}

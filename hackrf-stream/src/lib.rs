/*!

A host driver for the [HackRF][hackrf], made using the pure-rust [`nusb`] crate
for USB interfacing. It speaks the [`libhackrf`][libhackrf] vendor protocol for
configuration, and keeps a continuous stream of sample packets flowing between
the HackRF and your application.

[hackrf]: https://greatscottgadgets.com/hackrf/one/
[libhackrf]: https://github.com/greatscottgadgets/hackrf/tree/master/host

The standard entry point for this library is [`open_hackrf()`], which will open
the first available HackRF device and wrap it in a [`HackRf`] driver.

Configuration goes through the [`Device`] returned by [`HackRf::device`]. Every
command checks its arguments before touching the hardware, and is safe to call
from any thread, even while streaming.

Streaming is started with [`HackRf::start_rx`] or [`HackRf::start_tx`], which
hand back the [`SampleQueue`] shared with a background engine thread. The
engine keeps a few bulk transfers in flight at all times:

- While receiving, every finished transfer is pushed onto the queue. If the
  application falls behind and the queue fills up, the stream stops rather than
  dropping samples.
- While transmitting, the engine pulls packets off the queue. If the queue runs
  dry for longer than [`Config::tx_timeout`], the stream stops.

Either way, the HackRF is switched back off when the stream ends, and
[`HackRf::mode`] goes back to [`TransceiverMode::Off`]. Packets are plain
`Vec<u8>`s of [`Config::packet_size`] bytes; hand them back with
[`HackRf::release_buffer`] to avoid allocating new ones.

Here's an example program that configures the system, enters receive mode, and
processes samples to estimate the average received power relative to full
scale:

```no_run
use std::time::Duration;

use anyhow::Result;
use hackrf_stream::{Config, samples};

fn main() -> Result<()> {
    let hackrf = hackrf_stream::open_hackrf(Config::default())?;

    // Configure: 10MHz sample rate, turn on the RF amp, set IF & BB gains to 16 dB,
    // and tune to 915 MHz.
    let dev = hackrf.device();
    dev.set_sample_rate_auto(10e6)?;
    dev.set_amp(true)?;
    dev.set_rx_lna_gain(16)?;
    dev.set_rx_vga_gain(16)?;
    dev.set_frequency(915_000_000)?;

    // Receive about a million samples, and measure average power.
    let queue = hackrf.start_rx()?;
    let mut count = 0;
    let mut pow_sum = 0.0;
    while count < 1_000_000 {
        let Some(packet) = queue.poll_timeout(Duration::from_secs(1)) else {
            break;
        };
        for x in samples(&packet) {
            let re = x.re as f64;
            let im = x.im as f64;
            pow_sum += re * re + im * im;
        }
        count += packet.len() / 2;
        hackrf.release_buffer(packet);
    }
    hackrf.stop()?;

    // Print out our measurement
    let average_power = (pow_sum / (count as f64 * 127.0 * 127.0)).log10() * 10.;
    println!("Average Power = {average_power} dbFS");
    println!("Average rate = {} bytes/s", hackrf.stats().average_rate());
    Ok(())
}
```

*/

#![warn(missing_docs)]

mod config;
mod consts;
mod device;
mod engine;
mod error;
mod host;
pub mod info;
mod nusb_host;
mod pool;
mod queue;
mod stats;

#[cfg(test)]
mod mock;

use std::{
    sync::{Arc, Mutex, PoisonError},
    thread::JoinHandle,
};

use crate::engine::Engine;

pub use crate::config::Config;
pub use crate::device::{BASEBAND_FILTER_BANDWIDTHS, Device, compute_baseband_filter_bandwidth};
pub use crate::error::Error;
pub use crate::host::{Completion, Endpoint, TransferId, UsbError, UsbHost};
pub use crate::info::{BoardId, HackRfType, SerialNumber};
pub use crate::nusb_host::{HackRfDescriptor, NusbHost, list_hackrf_devices, open_hackrf};
pub use crate::pool::BufferPool;
pub use crate::queue::SampleQueue;
pub use crate::stats::Stats;

/// Complex 8-bit signed data, as used by the HackRF.
pub type ComplexI8 = num_complex::Complex<i8>;

/// View a sample packet as interleaved I/Q samples.
///
/// A trailing odd byte, which a well-formed packet never has, is left out.
pub fn samples(packet: &[u8]) -> &[ComplexI8] {
    bytemuck::cast_slice(&packet[..packet.len() & !1])
}

/// View a sample packet as mutable interleaved I/Q samples.
///
/// A trailing odd byte, which a well-formed packet never has, is left out.
pub fn samples_mut(packet: &mut [u8]) -> &mut [ComplexI8] {
    let len = packet.len() & !1;
    bytemuck::cast_slice_mut(&mut packet[..len])
}

/// The HackRF's transceiver mode.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransceiverMode {
    /// Not streaming.
    #[default]
    Off = 0,
    /// Receiving samples.
    Receive = 1,
    /// Transmitting samples.
    Transmit = 2,
}

impl TransceiverMode {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Receive,
            2 => Self::Transmit,
            _ => Self::Off,
        }
    }
}

impl TryFrom<u8> for TransceiverMode {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Receive),
            2 => Ok(Self::Transmit),
            _ => Err(Error::InvalidParameter("Unknown transceiver mode")),
        }
    }
}

impl std::fmt::Display for TransceiverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::Receive => f.write_str("receive"),
            Self::Transmit => f.write_str("transmit"),
        }
    }
}

/// RF Filter Setting Option.
///
/// Use when calling [`Device::set_frequency_explicit`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfPathFilter {
    /// No filter selected - mixer bypassed.
    Bypass = 0,
    /// Low pass filter, `f_c = f_IF - f_LO`
    LowPass = 1,
    /// High pass filter, `f_c = f_IF + f_LO`
    HighPass = 2,
}

impl TryFrom<u8> for RfPathFilter {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Bypass),
            1 => Ok(Self::LowPass),
            2 => Ok(Self::HighPass),
            _ => Err(Error::InvalidParameter("Unknown RF path filter")),
        }
    }
}

impl std::fmt::Display for RfPathFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bypass => f.write_str("mixer bypass"),
            Self::LowPass => f.write_str("low pass filter"),
            Self::HighPass => f.write_str("high pass filter"),
        }
    }
}

/// A HackRF driver. This is the main struct for talking to the HackRF.
///
/// It owns the USB host, the [buffer pool][BufferPool], the
/// [sample queue][SampleQueue], and the [statistics][Stats] of the current
/// stream, and runs at most one streaming engine thread at a time.
///
/// Dropping the driver stops any running stream and waits for the engine
/// thread to finish.
pub struct HackRf<H: UsbHost> {
    device: Arc<Device<H>>,
    pool: BufferPool,
    queue: SampleQueue,
    stats: Arc<Stats>,
    config: Config,
    engine: Mutex<Option<JoinHandle<()>>>,
}

impl<H: UsbHost> HackRf<H> {
    /// Start a driver on an opened HackRF.
    ///
    /// Fails if the configuration is invalid, or if the board ID can't be
    /// read.
    pub fn new(host: H, config: Config) -> Result<Self, Error> {
        config.validate()?;
        let device = Device::new(host, config.control_timeout)?;
        let capacity = config.queue_capacity();
        Ok(Self {
            device: Arc::new(device),
            pool: BufferPool::new(capacity, config.packet_size),
            queue: SampleQueue::new(capacity),
            stats: Arc::new(Stats::new(config.packet_size)),
            config,
            engine: Mutex::new(None),
        })
    }

    /// The command interface, for configuring the HackRF.
    pub fn device(&self) -> &Device<H> {
        &self.device
    }

    /// The configuration this driver was started with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current transceiver mode.
    pub fn mode(&self) -> TransceiverMode {
        self.device.mode()
    }

    /// Start receiving.
    ///
    /// Returns the queue that received packets will show up on, in the order
    /// the HackRF delivered them. Keep it drained: once it fills up, the
    /// stream stops.
    pub fn start_rx(&self) -> Result<SampleQueue, Error> {
        self.start(TransceiverMode::Receive)
    }

    /// Start transmitting.
    ///
    /// Returns the queue to push packets onto, each exactly
    /// [`packet_size`][Config::packet_size] bytes. Get them from
    /// [`acquire_buffer`][Self::acquire_buffer]. The stream stops if nothing
    /// is queued for [`tx_timeout`][Config::tx_timeout], or if a packet has the
    /// wrong size.
    pub fn start_tx(&self) -> Result<SampleQueue, Error> {
        self.start(TransceiverMode::Transmit)
    }

    fn start(&self, mode: TransceiverMode) -> Result<SampleQueue, Error> {
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.device.mode();
        if current != TransceiverMode::Off {
            return Err(Error::AlreadyStreaming(current));
        }
        if let Some(handle) = engine.take() {
            if handle.join().is_err() {
                tracing::error!("Previous stream thread panicked");
            }
        }

        self.queue.clear();
        self.stats.reset();
        self.device.set_transceiver_mode(mode)?;

        let worker = Engine {
            device: self.device.clone(),
            pool: self.pool.clone(),
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            mode,
            transfer_count: self.config.transfer_count,
            tx_timeout: self.config.tx_timeout,
            completion_poll: self.config.completion_poll,
        };
        let name = match mode {
            TransceiverMode::Transmit => "hackrf-tx",
            _ => "hackrf-rx",
        };
        match std::thread::Builder::new()
            .name(name.into())
            .spawn(move || worker.run())
        {
            Ok(handle) => *engine = Some(handle),
            Err(err) => {
                tracing::error!(%err, "Couldn't spawn the stream thread");
                if let Err(err) = self.device.set_transceiver_mode(TransceiverMode::Off) {
                    tracing::warn!(%err, "Couldn't switch the HackRF back off");
                }
                self.device.force_mode(TransceiverMode::Off);
                return Err(err.into());
            }
        }

        tracing::info!(
            %mode,
            packet_size = self.config.packet_size,
            transfers = self.config.transfer_count,
            "Stream started"
        );
        Ok(self.queue.clone())
    }

    /// Stop streaming.
    ///
    /// Switches the HackRF off. The engine thread notices on its next poll,
    /// cancels its transfers and exits. Does nothing if already off.
    pub fn stop(&self) -> Result<(), Error> {
        if self.device.mode() == TransceiverMode::Off {
            return Ok(());
        }
        self.device.set_transceiver_mode(TransceiverMode::Off)?;
        tracing::info!("Stream stop requested");
        Ok(())
    }

    /// Get a packet-sized buffer from the pool, allocating one if the pool is
    /// empty.
    pub fn acquire_buffer(&self) -> Vec<u8> {
        self.pool.acquire()
    }

    /// Hand a packet back to the pool for reuse.
    pub fn release_buffer(&self, buf: Vec<u8>) {
        self.pool.release(buf)
    }

    /// The buffer pool shared with the engine.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The sample queue shared with the engine.
    pub fn queue(&self) -> &SampleQueue {
        &self.queue
    }

    /// Statistics for the current (or last) stream.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Size of every sample packet, in bytes.
    pub fn packet_size(&self) -> usize {
        self.config.packet_size
    }
}

impl<H: UsbHost> Drop for HackRf<H> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(%err, "Couldn't switch the HackRF off while dropping it");
        }
        self.device.force_mode(TransceiverMode::Off);
        let engine = self.engine.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = engine.take() {
            if handle.join().is_err() {
                tracing::error!("Stream thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::{
        consts::{self, ControlRequest},
        mock::MockHost,
    };

    const PACKET: usize = 512;

    fn config() -> Config {
        Config::default()
            .with_packet_size(PACKET)
            .with_queue_size(8 * PACKET)
            .with_completion_poll(Duration::from_millis(10))
    }

    fn driver(config: Config) -> (HackRf<MockHost>, MockHost) {
        let mock = MockHost::new(2);
        let rf = HackRf::new(mock.clone(), config).unwrap();
        mock.clear_controls();
        (rf, mock)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn last_mode_request(mock: &MockHost) -> Option<u16> {
        mock.requests(ControlRequest::SetTransceiverMode)
            .last()
            .map(|c| c.value)
    }

    #[test]
    fn sample_view() {
        let mut packet = vec![1u8, 0xff, 2, 3, 9];
        let s = samples(&packet);
        assert_eq!(s.len(), 2);
        assert_eq!(s[0], ComplexI8::new(1, -1));
        assert_eq!(s[1], ComplexI8::new(2, 3));
        samples_mut(&mut packet)[1].im = -128;
        assert_eq!(packet[3], 0x80);
    }

    #[test]
    fn mode_conversions() {
        assert_eq!(TransceiverMode::try_from(2).unwrap(), TransceiverMode::Transmit);
        assert!(TransceiverMode::try_from(3).is_err());
        assert_eq!(RfPathFilter::try_from(1).unwrap(), RfPathFilter::LowPass);
        assert!(RfPathFilter::try_from(7).is_err());
    }

    #[test]
    fn rejects_bad_config() {
        let mock = MockHost::new(2);
        let err = HackRf::new(mock.clone(), config().with_packet_size(1000));
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
        assert!(mock.controls().is_empty());
    }

    #[test]
    fn stop_while_off_is_a_no_op() {
        let (rf, mock) = driver(config());
        rf.stop().unwrap();
        assert!(mock.controls().is_empty());
        assert_eq!(rf.mode(), TransceiverMode::Off);
    }

    #[test]
    fn idle_stream_reads_zero() {
        let (rf, mock) = driver(config());
        let queue = rf.start_rx().unwrap();
        assert_eq!(rf.mode(), TransceiverMode::Receive);
        assert_eq!(last_mode_request(&mock), Some(1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(queue.is_empty());
        assert_eq!(rf.stats().packet_counter(), 0);
        assert_eq!(rf.stats().average_rate(), 0);
        assert!(rf.stats().elapsed_ms() >= 50);
        rf.stop().unwrap();
        assert_eq!(rf.mode(), TransceiverMode::Off);
        assert_eq!(last_mode_request(&mock), Some(0));
    }

    #[test]
    fn double_start_rejected() {
        let (rf, mock) = driver(config());
        rf.start_rx().unwrap();
        assert!(matches!(
            rf.start_tx(),
            Err(Error::AlreadyStreaming(TransceiverMode::Receive))
        ));
        assert!(matches!(
            rf.start_rx(),
            Err(Error::AlreadyStreaming(TransceiverMode::Receive))
        ));
        assert_eq!(mock.requests(ControlRequest::SetTransceiverMode).len(), 1);
        rf.stop().unwrap();
    }

    #[test]
    fn failed_start_stays_off() {
        let (rf, mock) = driver(config());
        mock.fail_request(ControlRequest::SetTransceiverMode);
        assert!(matches!(
            rf.start_rx(),
            Err(Error::Usb(UsbError::Stall))
        ));
        assert_eq!(rf.mode(), TransceiverMode::Off);
        assert_eq!(mock.submitted(), 0);
    }

    #[test]
    fn submit_failure_ends_stream() {
        let (rf, mock) = driver(config());
        mock.set_fail_submit(true);
        rf.start_rx().unwrap();
        wait_until(|| rf.mode() == TransceiverMode::Off);
        assert_eq!(last_mode_request(&mock), Some(0));
    }

    #[test]
    fn full_queue_stops_receive() {
        let (rf, mock) = driver(config());
        mock.set_in_budget(Some(10));
        let queue = rf.start_rx().unwrap();
        wait_until(|| rf.mode() == TransceiverMode::Off);

        assert_eq!(rf.stats().packet_counter(), 9);
        assert_eq!(queue.len(), 8);
        assert_eq!(last_mode_request(&mock), Some(0));
        assert_eq!(mock.outstanding(), 0);

        let order: Vec<u8> = std::iter::from_fn(|| queue.try_poll())
            .map(|p| {
                assert_eq!(p.len(), PACKET);
                p[0]
            })
            .collect();
        assert_eq!(order, (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn restart_after_backpressure() {
        let (rf, mock) = driver(config());
        mock.set_in_budget(Some(10));
        let queue = rf.start_rx().unwrap();
        wait_until(|| rf.mode() == TransceiverMode::Off);
        assert_eq!(queue.len(), 8);

        mock.set_in_budget(Some(0));
        let queue = rf.start_rx().unwrap();
        assert!(queue.is_empty());
        assert_eq!(rf.stats().packet_counter(), 0);
        rf.stop().unwrap();
    }

    #[test]
    fn transmit_in_order() {
        let (rf, mock) = driver(config().with_tx_timeout(Duration::from_millis(200)));
        let queue = rf.start_tx().unwrap();
        for i in 0..6u8 {
            let mut buf = rf.acquire_buffer();
            buf.fill(i);
            queue.try_push(buf).unwrap();
        }
        wait_until(|| rf.mode() == TransceiverMode::Off);

        let sent = mock.sent();
        assert!(!sent.is_empty());
        assert_eq!(sent, (0..sent.len() as u8).collect::<Vec<u8>>());
        assert_eq!(rf.stats().packet_counter(), sent.len() as u64);
        // Sent packets may have been recycled into later acquires.
        let pool = rf.pool();
        assert!(pool.allocations() <= 6);
        assert_eq!(pool.available() + queue.len(), pool.allocations());
        assert_eq!(last_mode_request(&mock), Some(0));
        assert_eq!(mock.outstanding(), 0);
    }

    #[test]
    fn wrong_size_packet_aborts_transmit() {
        let (rf, mock) = driver(config());
        let queue = rf.start_tx().unwrap();
        queue.try_push(vec![0u8; 100]).unwrap();
        wait_until(|| rf.mode() == TransceiverMode::Off);
        assert!(mock.sent().is_empty());
        assert_eq!(mock.submitted(), 0);
        assert_eq!(last_mode_request(&mock), Some(0));
    }

    #[test]
    fn commands_while_streaming() {
        let (rf, mock) = driver(config());
        rf.start_rx().unwrap();
        std::thread::scope(|s| {
            for i in 0..4u64 {
                let rf = &rf;
                s.spawn(move || {
                    rf.device()
                        .set_frequency(100_000_000 + i * 1_000_000)
                        .unwrap()
                });
            }
        });
        assert_eq!(mock.requests(ControlRequest::SetFreq).len(), 4);
        assert_eq!(rf.mode(), TransceiverMode::Receive);
        rf.stop().unwrap();
    }

    #[test]
    fn transfer_failure_ends_stream() {
        let (rf, mock) = driver(config());
        rf.start_rx().unwrap();
        mock.fail_next_in(UsbError::Disconnected);
        wait_until(|| rf.mode() == TransceiverMode::Off);

        assert_eq!(last_mode_request(&mock), Some(0));
        assert_eq!(mock.outstanding(), 0);
        assert_eq!(rf.stats().packet_counter(), 0);
        assert_eq!(rf.pool().available(), 4);

        rf.start_rx().unwrap();
        assert_eq!(rf.mode(), TransceiverMode::Receive);
        rf.stop().unwrap();
    }

    #[test]
    fn foreign_completion_is_ignored() {
        let (rf, mock) = driver(config());
        let queue = rf.start_rx().unwrap();
        wait_until(|| mock.submitted() == 4);
        mock.inject(Completion {
            id: TransferId(u64::MAX),
            endpoint: Endpoint::Out,
            buf: vec![0u8; PACKET],
            status: Ok(()),
        });
        // Consumed once only the engine's own transfers are left.
        wait_until(|| mock.outstanding() == 4);
        assert_eq!(rf.mode(), TransceiverMode::Receive);
        assert_eq!(rf.stats().packet_counter(), 0);
        assert!(queue.is_empty());

        mock.set_in_budget(Some(2));
        wait_until(|| rf.stats().packet_counter() == 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(rf.mode(), TransceiverMode::Receive);
        rf.stop().unwrap();
    }

    #[test]
    fn empty_transmit_times_out() {
        let (rf, mock) = driver(config().with_tx_timeout(Duration::from_millis(100)));
        let start = Instant::now();
        rf.start_tx().unwrap();
        wait_until(|| rf.mode() == TransceiverMode::Off);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(mock.submitted(), 0);
        assert_eq!(rf.stats().packet_counter(), 0);
        assert_eq!(last_mode_request(&mock), Some(0));
    }

    #[test]
    fn full_queue_stops_receive_default_packets() {
        let config = Config::default()
            .with_queue_size(8 * consts::PACKET_SIZE)
            .with_completion_poll(Duration::from_millis(10));
        let (rf, mock) = driver(config);
        mock.set_in_budget(Some(10));
        let queue = rf.start_rx().unwrap();
        wait_until(|| rf.mode() == TransceiverMode::Off);

        assert_eq!(rf.stats().packet_counter(), 9);
        assert_eq!(queue.len(), 8);
        assert_eq!(mock.outstanding(), 0);
        let packet = queue.try_poll().unwrap();
        assert_eq!(packet.len(), 16384);
        assert_eq!(samples(&packet).len(), 8192);
    }

    #[test]
    fn slow_cancellation_is_reaped() {
        let (rf, mock) = driver(config());
        mock.set_cancel_lag(3);
        let pool = rf.pool().clone();
        rf.start_rx().unwrap();
        wait_until(|| mock.submitted() == 4);
        rf.stop().unwrap();
        drop(rf);
        assert_eq!(mock.outstanding(), 0);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn repeated_cycles_reuse_buffers() {
        let (rf, mock) = driver(config());
        let pool = rf.pool().clone();
        for _ in 0..5 {
            rf.start_rx().unwrap();
            rf.stop().unwrap();
        }
        drop(rf);
        assert_eq!(pool.allocations(), 4);
        assert_eq!(pool.available(), 4);
        assert_eq!(mock.outstanding(), 0);
        assert_eq!(mock.submitted(), 20);
    }
}

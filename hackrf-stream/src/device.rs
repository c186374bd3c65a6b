/*!
The HackRF command protocol.

[`Device`] turns each firmware vendor request into a typed, validated
operation. Every command follows the same shape: check the arguments without
touching the hardware, then claim the interface, run one control transfer,
release the interface, and check that the HackRF moved exactly as many bytes as
the command requires.

Control transfers are serialized by a lock inside [`Device`], so commands can
be issued from any thread, including while a stream is running.
*/

use std::{
    ops::Range,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use crate::{
    Error, RfPathFilter, TransceiverMode,
    consts::{ControlRequest, VERSION_STRING_LEN},
    host::UsbHost,
    info::{BoardId, SerialNumber},
};

/// Baseband filter bandwidths supported by the MAX2837, in Hz.
pub const BASEBAND_FILTER_BANDWIDTHS: &[u32] = &[
    1750000, 2500000, 3500000, 5000000, 5500000, 6000000, 7000000, 8000000, 9000000, 10000000,
    12000000, 14000000, 15000000, 20000000, 24000000, 28000000,
];

/// Pick the widest supported baseband filter that doesn't exceed `sample_rate`.
///
/// Rates below the narrowest filter get the narrowest filter (1.75 MHz).
pub fn compute_baseband_filter_bandwidth(sample_rate: u32) -> u32 {
    BASEBAND_FILTER_BANDWIDTHS
        .iter()
        .rev()
        .find(|f| sample_rate >= **f)
        .copied()
        .unwrap_or(BASEBAND_FILTER_BANDWIDTHS[0])
}

/// The command interface of an opened HackRF.
///
/// Obtained from [`HackRf::device`][crate::HackRf::device].
pub struct Device<H> {
    host: H,
    lock: Mutex<()>,
    mode: AtomicU8,
    board: BoardId,
    timeout: Duration,
}

impl<H: UsbHost> Device<H> {
    pub(crate) fn new(host: H, timeout: Duration) -> Result<Self, Error> {
        let mut dev = Self {
            host,
            lock: Mutex::new(()),
            mode: AtomicU8::new(TransceiverMode::Off as u8),
            board: BoardId::Invalid(u8::MAX),
            timeout,
        };
        dev.board = dev.board_id()?;
        tracing::debug!(board = %dev.board, "Opened HackRF");
        Ok(dev)
    }

    pub(crate) fn host(&self) -> &H {
        &self.host
    }

    fn control_in(
        &self,
        req: ControlRequest,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.host.claim_interface()?;
        let ret = self
            .host
            .control_in(req as u8, value, index, buf, self.timeout);
        self.host.release_interface();
        ret.map_err(|err| {
            tracing::error!(request = ?req, %err, "Control transfer failed");
            err.into()
        })
    }

    fn control_out(
        &self,
        req: ControlRequest,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.host.claim_interface()?;
        let ret = self
            .host
            .control_out(req as u8, value, index, data, self.timeout);
        self.host.release_interface();
        let actual = ret.map_err(|err| {
            tracing::error!(request = ?req, %err, "Control transfer failed");
            Error::from(err)
        })?;
        expect_len(data.len(), actual)
    }

    /// Gain commands are IN transfers returning a single status byte, where 0
    /// means the HackRF rejected the setting.
    fn write_gain(&self, req: ControlRequest, gain: u16) -> Result<(), Error> {
        let mut ret = [0u8; 1];
        let n = self.control_in(req, 0, gain, &mut ret)?;
        expect_len(1, n)?;
        if ret[0] == 0 {
            tracing::error!(request = ?req, gain, "HackRF rejected gain setting");
            return Err(Error::ReturnData);
        }
        Ok(())
    }

    /// The board identifier read when the driver was opened.
    pub fn board(&self) -> BoardId {
        self.board
    }

    /// The last transceiver mode successfully set.
    pub fn mode(&self) -> TransceiverMode {
        TransceiverMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub(crate) fn force_mode(&self, mode: TransceiverMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    /// Read the [board hardware ID][BoardId] from the HackRF.
    pub fn board_id(&self) -> Result<BoardId, Error> {
        let mut ret = [0u8; 1];
        let n = self.control_in(ControlRequest::BoardIdRead, 0, 0, &mut ret)?;
        expect_len(1, n)?;
        Ok(BoardId::from_u8(ret[0]))
    }

    /// Get the firmware version as a string.
    pub fn version_string(&self) -> Result<String, Error> {
        let mut buf = vec![0u8; VERSION_STRING_LEN];
        let n = self.control_in(ControlRequest::VersionStringRead, 0, 0, &mut buf)?;
        if n < 1 {
            return Err(Error::ShortTransfer {
                expected: 1,
                actual: n,
            });
        }
        buf.truncate(n);
        while buf.last() == Some(&0) {
            buf.pop();
        }
        String::from_utf8(buf).map_err(|_| Error::ReturnData)
    }

    /// Get the MCU's part ID and serial number.
    ///
    /// See [`SerialNumber`] for more info.
    pub fn part_id_and_serial(&self) -> Result<SerialNumber, Error> {
        let mut buf = [0u8; SerialNumber::WIRE_LEN];
        let n = self.control_in(ControlRequest::BoardPartidSerialnoRead, 0, 0, &mut buf)?;
        expect_len(SerialNumber::WIRE_LEN, n)?;
        Ok(SerialNumber::from_le_bytes(&buf))
    }

    /// Set the sample rate using a clock frequency in Hz and a divider value.
    ///
    /// The resulting sample rate is `freq_hz/divider`. Divider value can be
    /// 1-31, and the rate range should be 2-20MHz.
    ///
    /// Unlike [`set_sample_rate_auto`][Self::set_sample_rate_auto], this
    /// leaves the baseband filter alone.
    pub fn set_sample_rate(&self, freq_hz: u32, divider: u32) -> Result<(), Error> {
        #[repr(C)]
        #[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
        struct FracRateParams {
            freq_hz: u32,
            divider: u32,
        }

        const DIV_RANGE: Range<u32> = Range { start: 1, end: 32 };
        if !DIV_RANGE.contains(&divider) {
            return Err(Error::ValueRange {
                range: DIV_RANGE,
                val: divider,
            });
        }

        let params = FracRateParams {
            freq_hz: freq_hz.to_le(),
            divider: divider.to_le(),
        };
        self.control_out(
            ControlRequest::SampleRateSet,
            0,
            0,
            bytemuck::bytes_of(&params),
        )
    }

    /// Set the sample rate, which should be between 2-20 MHz, and a matching
    /// baseband filter.
    ///
    /// Picks the clock frequency and divider that land closest to `freq`,
    /// preferring the smaller divider on ties, then sets the baseband filter
    /// to 3/4 of the resulting rate, rounded down to a supported setting.
    pub fn set_sample_rate_auto(&self, freq: f64) -> Result<(), Error> {
        let freq = freq.clamp(2e6, 20e6);

        let mut freq_hz = 0;
        let mut divider = 1;
        let mut diff = f64::MAX;
        for i in 1u32..32 {
            let new_freq_hz = (freq * (i as f64)).round() as u32;
            let new_diff = ((new_freq_hz as f64) / (i as f64) - freq).abs();
            if new_diff < diff {
                freq_hz = new_freq_hz;
                divider = i;
                diff = new_diff;
            }
        }

        self.set_sample_rate(freq_hz, divider)?;
        let rate = (freq_hz as u64 * 3 / (divider as u64 * 4)) as u32;
        self.set_baseband_filter_bandwidth(compute_baseband_filter_bandwidth(rate))
    }

    /// Set the baseband filter bandwidth, in Hz.
    ///
    /// The value is sent as-is; use [`compute_baseband_filter_bandwidth`] to
    /// pick one of the supported settings.
    pub fn set_baseband_filter_bandwidth(&self, bandwidth_hz: u32) -> Result<(), Error> {
        self.control_out(
            ControlRequest::BasebandFilterBandwidthSet,
            (bandwidth_hz & 0xffff) as u16,
            (bandwidth_hz >> 16) as u16,
            &[],
        )
    }

    /// Set the RX VGA (baseband) gain.
    ///
    /// Must be in the range of 0-62 dB, and is forced to 2 dB steps.
    /// Intermediate values are rounded down.
    pub fn set_rx_vga_gain(&self, gain: u16) -> Result<(), Error> {
        if gain > 62 {
            return Err(Error::ValueRange {
                range: Range { start: 0, end: 63 },
                val: gain as u32,
            });
        }
        self.write_gain(ControlRequest::SetVgaGain, gain & !0x01)
    }

    /// Set the TX VGA (IF) gain, 0-47 dB in 1 dB steps.
    pub fn set_tx_vga_gain(&self, gain: u16) -> Result<(), Error> {
        if gain > 47 {
            return Err(Error::ValueRange {
                range: Range { start: 0, end: 48 },
                val: gain as u32,
            });
        }
        self.write_gain(ControlRequest::SetTxvgaGain, gain)
    }

    /// Set the RX LNA (IF) gain.
    ///
    /// Must be in the range of 0-40 dB, and is forced to 8 dB steps.
    /// Intermediate values are rounded down.
    pub fn set_rx_lna_gain(&self, gain: u16) -> Result<(), Error> {
        if gain > 40 {
            return Err(Error::ValueRange {
                range: Range { start: 0, end: 41 },
                val: gain as u32,
            });
        }
        self.write_gain(ControlRequest::SetLnaGain, gain & !0x07)
    }

    /// Set the operating frequency (recommended method).
    ///
    /// This uses the tuning code onboard the HackRF, which picks the LO and IF
    /// frequencies as well as the RF path filter.
    pub fn set_frequency(&self, freq_hz: u64) -> Result<(), Error> {
        const ONE_MHZ: u64 = 1_000_000;
        #[repr(C)]
        #[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
        struct FreqParams {
            mhz: u32,
            hz: u32,
        }

        let mhz = u32::try_from(freq_hz / ONE_MHZ)
            .map_err(|_| Error::InvalidParameter("Frequency is far beyond any tuning range"))?;
        let hz = (freq_hz % ONE_MHZ) as u32;
        tracing::debug!(mhz, hz, "Tuning");
        let params = FreqParams {
            mhz: mhz.to_le(),
            hz: hz.to_le(),
        };
        self.control_out(ControlRequest::SetFreq, 0, 0, bytemuck::bytes_of(&params))
    }

    /// Set the IF & LO tuning frequencies, and the RF path filter.
    ///
    /// You may be looking for [`set_frequency`][Self::set_frequency] instead.
    ///
    /// IF frequency must be between 2150-2750 MHz. LO frequency must be
    /// between 84.375-5400 MHz, unless the filter is set to bypass mode, in
    /// which case it's ignored.
    pub fn set_frequency_explicit(
        &self,
        if_freq_hz: u64,
        lo_freq_hz: u64,
        path: RfPathFilter,
    ) -> Result<(), Error> {
        #[repr(C, packed)]
        #[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
        struct FreqParams {
            if_freq_hz: u64,
            lo_freq_hz: u64,
            path: u8,
        }

        const IF_RANGE: Range<u64> = Range {
            start: 2_150_000_000,
            end: 2_750_000_001,
        };
        const LO_RANGE: Range<u64> = Range {
            start: 84_375_000,
            end: 5_400_000_001,
        };

        if !IF_RANGE.contains(&if_freq_hz) {
            return Err(Error::TuningRange {
                range: IF_RANGE,
                val: if_freq_hz,
            });
        }
        if path != RfPathFilter::Bypass && !LO_RANGE.contains(&lo_freq_hz) {
            return Err(Error::TuningRange {
                range: LO_RANGE,
                val: lo_freq_hz,
            });
        }

        tracing::debug!(if_freq_hz, lo_freq_hz, %path, "Tuning explicitly");
        let params = FreqParams {
            if_freq_hz: if_freq_hz.to_le(),
            lo_freq_hz: lo_freq_hz.to_le(),
            path: path as u8,
        };
        self.control_out(
            ControlRequest::SetFreqExplicit,
            0,
            0,
            bytemuck::bytes_of(&params),
        )
    }

    /// Enable/disable the 14dB RF amplifiers.
    pub fn set_amp(&self, enable: bool) -> Result<(), Error> {
        self.control_out(ControlRequest::AmpEnable, enable as u16, 0, &[])
    }

    /// Enable/disable antenna port power (the bias-tee).
    ///
    /// Jawbreaker and rad1o boards can't do this; on those this returns
    /// [`Error::Unsupported`] without sending anything.
    pub fn set_antenna_power(&self, enable: bool) -> Result<(), Error> {
        if !self.board.has_antenna_power() {
            tracing::warn!(board = %self.board, "Antenna power isn't supported, ignoring");
            return Err(Error::Unsupported {
                board: self.board,
                feature: "Antenna power",
            });
        }
        self.control_out(ControlRequest::AntennaEnable, enable as u16, 0, &[])
    }

    /// Switch the HackRF's transceiver mode.
    ///
    /// This only tells the HackRF; the sample stream is run by
    /// [`HackRf::start_rx`][crate::HackRf::start_rx] and
    /// [`HackRf::start_tx`][crate::HackRf::start_tx]. The mode read back by
    /// [`mode`][Self::mode] only changes if the HackRF accepted the request.
    pub fn set_transceiver_mode(&self, mode: TransceiverMode) -> Result<(), Error> {
        self.control_out(ControlRequest::SetTransceiverMode, mode as u16, 0, &[])?;
        self.mode.store(mode as u8, Ordering::Release);
        tracing::debug!(%mode, "Transceiver mode set");
        Ok(())
    }
}

fn expect_len(expected: usize, actual: usize) -> Result<(), Error> {
    if expected != actual {
        return Err(Error::ShortTransfer { expected, actual });
    }
    Ok(())
}

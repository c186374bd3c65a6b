pub const HACKRF_USB_VID: u16 = 0x1d50;
pub const HACKRF_JAWBREAKER_USB_PID: u16 = 0x604b;
pub const HACKRF_ONE_USB_PID: u16 = 0x6089;
pub const RAD1O_USB_PID: u16 = 0xcc15;

/// Vendor request codes understood by the HackRF firmware.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlRequest {
    SetTransceiverMode = 1,
    SampleRateSet = 6,
    BasebandFilterBandwidthSet = 7,
    BoardIdRead = 14,
    VersionStringRead = 15,
    SetFreq = 16,
    AmpEnable = 17,
    BoardPartidSerialnoRead = 18,
    SetLnaGain = 19,
    SetVgaGain = 20,
    SetTxvgaGain = 21,
    AntennaEnable = 23,
    SetFreqExplicit = 24,
}

pub const RX_ENDPOINT_ADDRESS: u8 = 0x81;
pub const TX_ENDPOINT_ADDRESS: u8 = 0x02;

/// Bytes per sample packet, and thus per bulk transfer.
pub const PACKET_SIZE: usize = 16384;
/// Number of bulk transfers kept in flight while streaming.
pub const TRANSFER_COUNT: usize = 4;
/// Longest version string the firmware will send.
pub const VERSION_STRING_LEN: usize = 255;

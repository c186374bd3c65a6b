//! Identity of a HackRF board.
//!
//! Covers the three things a HackRF will say about itself:
//!
//! - The [board identifier][BoardId], with [`Device::board_id`].
//! - The firmware version, with [`Device::version_string`].
//! - The MCU's [part ID and serial number][SerialNumber], with
//!   [`Device::part_id_and_serial`].
//!
//! plus the [`HackRfType`] implied by the USB product ID, which is known
//! before talking to the board at all.
//!
//! [`Device::board_id`]: crate::Device::board_id
//! [`Device::version_string`]: crate::Device::version_string
//! [`Device::part_id_and_serial`]: crate::Device::part_id_and_serial
use crate::consts::{HACKRF_JAWBREAKER_USB_PID, HACKRF_ONE_USB_PID, HACKRF_USB_VID, RAD1O_USB_PID};

/// The MCU serial number.
///
/// The Part ID identifies the exact LPC43xx part that was populated. The
/// "serial number" is referred to as the device unique ID in the user manual
/// for the LPC43xx.
///
/// On the wire this is six little-endian 32-bit words, part ID first.
#[repr(C)]
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct SerialNumber {
    pub part_id: [u32; 2],
    pub serial_no: [u32; 4],
}

impl SerialNumber {
    /// Size of the encoded form, in bytes.
    pub const WIRE_LEN: usize = 24;

    pub(crate) fn from_le_bytes(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        let mut v: SerialNumber = bytemuck::pod_read_unaligned(bytes);
        for x in v.part_id.iter_mut().chain(v.serial_no.iter_mut()) {
            *x = u32::from_le(*x);
        }
        v
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "part ID 0x{:08x} 0x{:08x}, serial ",
            self.part_id[0], self.part_id[1]
        )?;
        for x in self.serial_no {
            write!(f, "{x:08x}")?;
        }
        Ok(())
    }
}

/// The physical board's identifier, as reported by the firmware.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardId {
    Jellybean,
    Jawbreaker,
    HackRfOne,
    Rad1o,
    /// Any identifier outside the known set.
    Invalid(u8),
}

impl std::fmt::Display for BoardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jellybean => f.write_str("Jellybean"),
            Self::Jawbreaker => f.write_str("Jawbreaker"),
            Self::HackRfOne => f.write_str("HackRF One"),
            Self::Rad1o => f.write_str("rad1o"),
            Self::Invalid(_) => f.write_str("INVALID BOARD ID"),
        }
    }
}

impl BoardId {
    pub(crate) fn from_u8(v: u8) -> Self {
        use BoardId::*;
        match v {
            0 => Jellybean,
            1 => Jawbreaker,
            2 => HackRfOne,
            3 => Rad1o,
            v => Invalid(v),
        }
    }

    /// The raw identifier byte.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Jellybean => 0,
            Self::Jawbreaker => 1,
            Self::HackRfOne => 2,
            Self::Rad1o => 3,
            Self::Invalid(v) => v,
        }
    }

    /// Whether the board can power an antenna through its RF port.
    pub fn has_antenna_power(self) -> bool {
        !matches!(self, Self::Jawbreaker | Self::Rad1o)
    }
}

/// The type of HackRF device, as told by its USB product ID.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HackRfType {
    Jawbreaker,
    One,
    Rad1o,
}

impl std::fmt::Display for HackRfType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jawbreaker => f.write_str("Jawbreaker"),
            Self::One => f.write_str("HackRF One"),
            Self::Rad1o => f.write_str("rad1o"),
        }
    }
}

impl HackRfType {
    /// Match a USB vendor/product ID pair against the known HackRF devices.
    pub fn from_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        if vendor_id != HACKRF_USB_VID {
            return None;
        }
        match product_id {
            HACKRF_JAWBREAKER_USB_PID => Some(Self::Jawbreaker),
            HACKRF_ONE_USB_PID => Some(Self::One),
            RAD1O_USB_PID => Some(Self::Rad1o),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_id_mapping() {
        assert_eq!(BoardId::from_u8(0), BoardId::Jellybean);
        assert_eq!(BoardId::from_u8(2).to_string(), "HackRF One");
        assert_eq!(BoardId::from_u8(3).to_string(), "rad1o");
        assert_eq!(BoardId::from_u8(4), BoardId::Invalid(4));
        assert_eq!(BoardId::from_u8(4).to_string(), "INVALID BOARD ID");
        assert_eq!(BoardId::from_u8(0xfe).as_u8(), 0xfe);
        assert!(!BoardId::Jawbreaker.has_antenna_power());
        assert!(BoardId::HackRfOne.has_antenna_power());
    }

    #[test]
    fn usb_ids() {
        assert_eq!(HackRfType::from_ids(0x1d50, 0x6089), Some(HackRfType::One));
        assert_eq!(
            HackRfType::from_ids(0x1d50, 0x604b),
            Some(HackRfType::Jawbreaker)
        );
        assert_eq!(HackRfType::from_ids(0x1d50, 0xcc15), Some(HackRfType::Rad1o));
        assert_eq!(HackRfType::from_ids(0x1d50, 0x6088), None);
        assert_eq!(HackRfType::from_ids(0x1d51, 0x6089), None);
    }

    #[test]
    fn serial_decode() {
        let mut bytes = [0u8; 24];
        for (i, word) in bytes.chunks_exact_mut(4).enumerate() {
            word.copy_from_slice(&(0xa000_cb3c + i as u32).to_le_bytes());
        }
        let s = SerialNumber::from_le_bytes(&bytes);
        assert_eq!(s.part_id, [0xa000_cb3c, 0xa000_cb3d]);
        assert_eq!(
            s.serial_no,
            [0xa000_cb3e, 0xa000_cb3f, 0xa000_cb40, 0xa000_cb41]
        );
    }
}

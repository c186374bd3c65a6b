use std::ops::Range;

use crate::{TransceiverMode, host::UsbError, info::BoardId};

/// An error from operating the HackRF.
///
/// Some errors are recoverable:
///
/// - `Usb` may just be a failed control transfer on the USB cable, and the
///   command can be retried. `Disconnected` is the one that isn't coming back.
/// - `ShortTransfer` and `ReturnData` mean the HackRF answered, but not with
///   what the protocol expects. The command had no guaranteed effect.
/// - `ValueRange`, `TuningRange`, and `InvalidParameter` all mean the arguments
///   to a function were out of range, and may even provide a hint of how to fix
///   them. Nothing was sent to the HackRF.
/// - `Unsupported` means the connected board variant can't do this at all.
/// - `AlreadyStreaming` means a stream has to be stopped before starting a new
///   one.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Failure reported by the USB host adapter.
    #[error("USB error")]
    Usb(#[from] UsbError),

    /// Underlying OS I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// A control transfer moved a different number of bytes than the command
    /// requires.
    #[error("Transfer moved {actual} bytes, expected {expected}")]
    #[allow(missing_docs)]
    ShortTransfer { expected: usize, actual: usize },

    /// Returned data from a HackRF didn't make any sense, or the HackRF
    /// refused the command.
    #[error("Invalid return data")]
    ReturnData,

    /// The provided argument value is out of range.
    #[error("Value ({val}) out of range ({}..{})", .range.start, .range.end)]
    #[allow(missing_docs)]
    ValueRange { range: Range<u32>, val: u32 },

    /// The provided tuning frequency is out of range.
    #[error("Tuning Value ({val} Hz) out of range ({}..{} Hz)", .range.start, .range.end)]
    #[allow(missing_docs)]
    TuningRange { range: Range<u64>, val: u64 },

    /// Some argument to a function is invalid in a way not easily expressed as
    /// a range.
    #[error("Invalid Parameter: {0}")]
    InvalidParameter(&'static str),

    /// The connected board doesn't support this feature.
    #[error("{feature} is not supported on {board}")]
    #[allow(missing_docs)]
    Unsupported {
        board: BoardId,
        feature: &'static str,
    },

    /// A stream is already running.
    #[error("Already streaming (mode: {0})")]
    AlreadyStreaming(TransceiverMode),

    /// The driver configuration can't work.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

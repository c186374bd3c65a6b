/*!
The USB host adapter seam.

Everything the driver needs from the USB stack goes through [`UsbHost`]:
vendor control transfers for configuration, and asynchronous bulk transfers for
the sample stream. [`NusbHost`][crate::NusbHost] is the real implementation;
tests drive the driver with a scripted host instead.

Bulk transfers are tagged requests: [`UsbHost::submit_bulk`] takes ownership of
a buffer, and the buffer only comes back inside the matching [`Completion`].
*/

use std::time::Duration;

use crate::consts::{RX_ENDPOINT_ADDRESS, TX_ENDPOINT_ADDRESS};

/// One of the two bulk endpoints of a HackRF.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Device to host, carries received samples.
    In,
    /// Host to device, carries samples to transmit.
    Out,
}

impl Endpoint {
    /// The USB endpoint address.
    pub fn address(self) -> u8 {
        match self {
            Self::In => RX_ENDPOINT_ADDRESS,
            Self::Out => TX_ENDPOINT_ADDRESS,
        }
    }
}

/// Identifies a submitted bulk transfer until it completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

/// A finished bulk transfer, handing its buffer back to the caller.
#[derive(Debug)]
pub struct Completion {
    /// The transfer this completion belongs to.
    pub id: TransferId,
    /// The endpoint the transfer was submitted on.
    pub endpoint: Endpoint,
    /// The buffer the transfer owned. For IN transfers, holds the received
    /// bytes.
    pub buf: Vec<u8>,
    /// Whether the transfer went through.
    pub status: Result<(), UsbError>,
}

/// A failure reported by the USB host adapter.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum UsbError {
    /// The interface couldn't be claimed for the transfer.
    #[error("couldn't claim the USB interface")]
    Claim,
    /// The transfer was cancelled before it finished.
    #[error("transfer cancelled")]
    Cancelled,
    /// The endpoint stalled.
    #[error("endpoint stalled")]
    Stall,
    /// The device is gone.
    #[error("device disconnected")]
    Disconnected,
    /// The transfer didn't finish within its timeout.
    #[error("transfer timed out")]
    Timeout,
    /// Any other host-side failure.
    #[error("USB transfer failed: {0}")]
    Other(String),
}

/// Access to an opened, permitted HackRF with one bulk IN and one bulk OUT
/// endpoint.
///
/// Control transfers may be issued from any thread; the driver serializes them
/// itself. Bulk submission, waiting and cancellation are only ever driven by
/// the streaming engine thread.
pub trait UsbHost: Send + Sync + 'static {
    /// Claim the device interface ahead of a control transfer.
    fn claim_interface(&self) -> Result<(), UsbError> {
        Ok(())
    }

    /// Release the interface after a control transfer.
    fn release_interface(&self) {}

    /// Vendor control transfer, device to host. Returns the number of bytes
    /// written into `buf`.
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Vendor control transfer, host to device. Returns the number of bytes the
    /// device accepted.
    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Submit an asynchronous bulk transfer that owns `buf` until it completes.
    ///
    /// IN transfers read up to `buf.len()` bytes; OUT transfers send all of
    /// `buf`.
    fn submit_bulk(&self, endpoint: Endpoint, buf: Vec<u8>) -> Result<TransferId, UsbError>;

    /// Block until any submitted transfer completes, or `timeout` passes.
    ///
    /// Returns `Ok(None)` on timeout.
    fn wait_any(&self, timeout: Duration) -> Result<Option<Completion>, UsbError>;

    /// Request cancellation of a transfer. The transfer still shows up in
    /// [`wait_any`][UsbHost::wait_any], with a [`UsbError::Cancelled`] status
    /// if it was cut short.
    fn cancel(&self, id: TransferId);
}

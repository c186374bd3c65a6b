//! The real USB host, built on [`nusb`].

use std::{
    collections::VecDeque,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use nusb::transfer::{
    ControlIn, ControlOut, ControlType, Queue, Recipient, RequestBuffer, TransferError,
};

use crate::{
    Config, Error, HackRf, HackRfType,
    host::{Completion, Endpoint, TransferId, UsbError, UsbHost},
};

impl From<TransferError> for UsbError {
    fn from(value: TransferError) -> Self {
        match value {
            TransferError::Cancelled => Self::Cancelled,
            TransferError::Stall => Self::Stall,
            TransferError::Disconnected => Self::Disconnected,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Transfers submitted on one endpoint, oldest first. nusb completes a queue
/// in submission order, so the front entry always names the next completion.
struct Lane<Q> {
    queue: Q,
    ids: VecDeque<(TransferId, usize)>,
}

impl<Q> Lane<Q> {
    fn new(queue: Q) -> Self {
        Self {
            queue,
            ids: VecDeque::new(),
        }
    }
}

/// A [`UsbHost`] talking to a real HackRF through [`nusb`].
///
/// nusb transfers are futures; a small private tokio runtime drives them so
/// every call can be bounded by a timeout.
pub struct NusbHost {
    interface: nusb::Interface,
    runtime: tokio::runtime::Runtime,
    next_id: AtomicU64,
    rx: Mutex<Lane<Queue<RequestBuffer>>>,
    tx: Mutex<Lane<Queue<Vec<u8>>>>,
}

impl NusbHost {
    /// Wrap an already-claimed HackRF interface.
    pub fn new(interface: nusb::Interface) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("hackrf-usb")
            .enable_time()
            .build()?;
        Ok(Self {
            rx: Mutex::new(Lane::new(interface.bulk_in_queue(Endpoint::In.address()))),
            tx: Mutex::new(Lane::new(interface.bulk_out_queue(Endpoint::Out.address()))),
            interface,
            runtime,
            next_id: AtomicU64::new(0),
        })
    }

    fn rx(&self) -> MutexGuard<'_, Lane<Queue<RequestBuffer>>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tx(&self) -> MutexGuard<'_, Lane<Queue<Vec<u8>>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> TransferId {
        TransferId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

enum Finished {
    In(nusb::transfer::Completion<Vec<u8>>),
    Out(nusb::transfer::Completion<nusb::transfer::ResponseBuffer>),
}

impl UsbHost for NusbHost {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let length = u16::try_from(buf.len())
            .map_err(|_| UsbError::Other("control read longer than 65535 bytes".into()))?;
        let fut = self.interface.control_in(ControlIn {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
            length,
        });
        let data = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, fut).await })
            .map_err(|_| UsbError::Timeout)?
            .into_result()?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let fut = self.interface.control_out(ControlOut {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
            data,
        });
        let resp = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, fut).await })
            .map_err(|_| UsbError::Timeout)?
            .into_result()?;
        Ok(resp.actual_length())
    }

    fn submit_bulk(&self, endpoint: Endpoint, buf: Vec<u8>) -> Result<TransferId, UsbError> {
        let id = self.next_id();
        let len = buf.len();
        match endpoint {
            Endpoint::In => {
                let mut lane = self.rx();
                lane.queue.submit(RequestBuffer::reuse(buf, len));
                lane.ids.push_back((id, len));
            }
            Endpoint::Out => {
                let mut lane = self.tx();
                lane.queue.submit(buf);
                lane.ids.push_back((id, len));
            }
        }
        Ok(id)
    }

    fn wait_any(&self, timeout: Duration) -> Result<Option<Completion>, UsbError> {
        let mut rx = self.rx();
        let mut tx = self.tx();
        let rx_busy = !rx.ids.is_empty();
        let tx_busy = !tx.ids.is_empty();
        if !rx_busy && !tx_busy {
            drop((rx, tx));
            std::thread::sleep(timeout);
            return Ok(None);
        }

        let rx_queue = &mut rx.queue;
        let tx_queue = &mut tx.queue;
        let finished = self.runtime.block_on(async {
            tokio::time::timeout(timeout, async {
                tokio::select! {
                    c = rx_queue.next_complete(), if rx_busy => Finished::In(c),
                    c = tx_queue.next_complete(), if tx_busy => Finished::Out(c),
                }
            })
            .await
        });

        match finished {
            Err(_) => Ok(None),
            Ok(Finished::In(c)) => {
                let Some((id, _)) = rx.ids.pop_front() else {
                    return Err(UsbError::Other("unexpected IN completion".into()));
                };
                Ok(Some(Completion {
                    id,
                    endpoint: Endpoint::In,
                    buf: c.data,
                    status: c.status.map_err(UsbError::from),
                }))
            }
            Ok(Finished::Out(c)) => {
                let Some((id, len)) = tx.ids.pop_front() else {
                    return Err(UsbError::Other("unexpected OUT completion".into()));
                };
                let mut buf = c.data.reuse();
                buf.resize(len, 0);
                Ok(Some(Completion {
                    id,
                    endpoint: Endpoint::Out,
                    buf,
                    status: c.status.map_err(UsbError::from),
                }))
            }
        }
    }

    /// nusb can only cancel a whole endpoint queue, so this cancels every
    /// transfer on the endpoint `id` was submitted to.
    fn cancel(&self, id: TransferId) {
        {
            let mut rx = self.rx();
            if rx.ids.iter().any(|(t, _)| *t == id) {
                rx.queue.cancel_all();
                return;
            }
        }
        let mut tx = self.tx();
        if tx.ids.iter().any(|(t, _)| *t == id) {
            tx.queue.cancel_all();
        }
    }
}

/// A HackRF device descriptor, which can be opened.
///
/// These are mostly returned from calling [`list_hackrf_devices`], but can also
/// be formed by trying to convert a [`nusb::DeviceInfo`] into one.
pub struct HackRfDescriptor {
    info: nusb::DeviceInfo,
    ty: HackRfType,
}

impl HackRfDescriptor {
    /// Get the serial number of this HackRF, as a string.
    pub fn serial(&self) -> Option<&str> {
        self.info.serial_number()
    }

    /// Get the [type][HackRfType] of HackRF radio this is.
    pub fn radio_type(&self) -> HackRfType {
        self.ty
    }

    /// Open this HackRF and start a driver for it.
    pub fn open(self, config: Config) -> Result<HackRf<NusbHost>, Error> {
        let device = self.info.open()?;
        #[cfg(not(target_os = "windows"))]
        {
            let active = device
                .active_configuration()
                .map_err(std::io::Error::from)?;
            if active.configuration_value() != 1 {
                device.detach_kernel_driver(0)?;
                device.set_configuration(1)?;
            }
        }
        let interface = device.detach_and_claim_interface(0)?;
        tracing::info!(radio = %self.ty, serial = ?self.info.serial_number(), "Opening HackRF");
        HackRf::new(NusbHost::new(interface)?, config)
    }
}

/// Try and turn any [`nusb::DeviceInfo`] descriptor into a HackRF, failing if
/// the VID and PID don't match any known devices.
impl TryFrom<nusb::DeviceInfo> for HackRfDescriptor {
    type Error = &'static str;
    fn try_from(value: nusb::DeviceInfo) -> Result<Self, Self::Error> {
        match HackRfType::from_ids(value.vendor_id(), value.product_id()) {
            Some(ty) => Ok(HackRfDescriptor { info: value, ty }),
            None => Err("VID/PID doesn't match any HackRF"),
        }
    }
}

/// List all available HackRF devices.
pub fn list_hackrf_devices() -> Result<Vec<HackRfDescriptor>, std::io::Error> {
    Ok(nusb::list_devices()?
        .filter_map(|d| HackRfDescriptor::try_from(d).ok())
        .collect())
}

/// Open the first detected HackRF device in the system.
///
/// This is a shortcut for calling [`list_hackrf_devices`] and opening the
/// first one.
pub fn open_hackrf(config: Config) -> Result<HackRf<NusbHost>, Error> {
    list_hackrf_devices()?
        .into_iter()
        .next()
        .ok_or_else(|| std::io::Error::other("No HackRF devices"))?
        .open(config)
}

use std::{
    os::raw::{c_int, c_uint, c_void},
    ptr::{self, NonNull},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use libusb1_sys::{self as ffi, constants::*};
use rusb::{Context, DeviceHandle, UsbContext};

use super::{BulkUrb, IsoPacket, IsoUrb, Urb, UrbStatus, UsbTransport};

const DESCRIPTOR_TIMEOUT: Duration = Duration::from_secs(1);

type SharedHandle = Arc<RwLock<DeviceHandle<Context>>>;

/// [`UsbTransport`] backed by a libusb device handle.
///
/// Synchronous requests go through `rusb`; URBs are driven through the raw libusb
/// asynchronous API.
pub struct LibusbTransport {
    handle: SharedHandle,
}

impl LibusbTransport {
    pub fn new(handle: DeviceHandle<Context>) -> Self {
        Self {
            handle: Arc::new(RwLock::new(handle)),
        }
    }

    /// Wraps an already-open usbfs file descriptor (eg. one handed out by the Android USB
    /// manager).
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open usbfs device file descriptor that stays open for the lifetime
    /// of the returned transport.
    #[cfg(unix)]
    pub unsafe fn from_fd(fd: std::os::unix::io::RawFd) -> rusb::Result<Self> {
        let ctx = Context::new()?;
        let handle = ctx.open_device_with_fd(fd)?;
        Ok(Self::new(handle))
    }

    fn read(&self) -> rusb::Result<RwLockReadGuard<'_, DeviceHandle<Context>>> {
        self.handle.read().map_err(|_| rusb::Error::Other)
    }

    fn write(&self) -> rusb::Result<RwLockWriteGuard<'_, DeviceHandle<Context>>> {
        self.handle.write().map_err(|_| rusb::Error::Other)
    }
}

impl UsbTransport for LibusbTransport {
    fn device_ids(&self) -> rusb::Result<(u16, u16)> {
        let desc = self.read()?.device().device_descriptor()?;
        Ok((desc.vendor_id(), desc.product_id()))
    }

    fn config_descriptor(&self, index: u8) -> rusb::Result<Vec<u8>> {
        super::read_config_descriptor(self, index, DESCRIPTOR_TIMEOUT)
    }

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.read()?
            .read_control(request_type, request, value, index, buf, timeout)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.read()?
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn detach_kernel_driver(&self, interface: u8) -> rusb::Result<()> {
        self.write()?.detach_kernel_driver(interface)
    }

    fn claim_interface(&self, interface: u8) -> rusb::Result<()> {
        self.write()?.claim_interface(interface)
    }

    fn release_interface(&self, interface: u8) -> rusb::Result<()> {
        self.write()?.release_interface(interface)
    }

    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> rusb::Result<()> {
        self.write()?.set_alternate_setting(interface, alt_setting)
    }

    fn clear_halt(&self, endpoint: u8) -> rusb::Result<()> {
        self.write()?.clear_halt(endpoint)
    }

    fn bulk_transfer(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.read()?.read_bulk(endpoint, buf, timeout)
    }

    fn bulk_urb(
        &self,
        endpoint: u8,
        len: usize,
        timeout: Duration,
    ) -> rusb::Result<Box<dyn BulkUrb>> {
        let raw = RawTransfer::alloc(self.handle.clone(), 0, len)?;
        let timeout_ms = timeout.as_millis().min(u128::from(c_uint::MAX)) as c_uint;
        // SAFETY: the transfer was just allocated and isn't submitted.
        unsafe {
            let t = raw.transfer.as_ptr();
            (*t).endpoint = endpoint;
            (*t).transfer_type = LIBUSB_TRANSFER_TYPE_BULK as _;
            (*t).timeout = timeout_ms;
            (*t).length = len as c_int;
        }
        Ok(Box::new(LibusbBulkUrb { raw }))
    }

    fn iso_urb(
        &self,
        endpoint: u8,
        num_packets: usize,
        packet_size: usize,
    ) -> rusb::Result<Box<dyn IsoUrb>> {
        let total = num_packets * packet_size;
        let raw = RawTransfer::alloc(self.handle.clone(), num_packets, total)?;
        // SAFETY: the transfer was allocated with `num_packets` packet descriptors and isn't
        // submitted.
        unsafe {
            let t = raw.transfer.as_ptr();
            (*t).endpoint = endpoint;
            (*t).transfer_type = LIBUSB_TRANSFER_TYPE_ISOCHRONOUS as _;
            (*t).timeout = 0;
            (*t).length = total as c_int;
            (*t).num_iso_packets = num_packets as c_int;
            let descs = raw.iso_descs();
            for i in 0..num_packets {
                (*descs.add(i)).length = packet_size as c_uint;
            }
        }
        Ok(Box::new(LibusbIsoUrb {
            raw,
            num_packets,
            packet_size,
        }))
    }
}

extern "system" fn transfer_callback(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: `user_data` points at the completion flag owned by the `RawTransfer`, which
    // outlives every submission.
    unsafe {
        let completed = (*transfer).user_data as *mut c_int;
        ptr::write_volatile(completed, 1);
    }
}

fn error_from_libusb(code: c_int) -> rusb::Error {
    match code {
        LIBUSB_ERROR_IO => rusb::Error::Io,
        LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
        LIBUSB_ERROR_ACCESS => rusb::Error::Access,
        LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
        LIBUSB_ERROR_BUSY => rusb::Error::Busy,
        LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    }
}

/// An allocated `libusb_transfer` with its buffer and completion flag.
struct RawTransfer {
    transfer: NonNull<ffi::libusb_transfer>,
    completed: Box<c_int>,
    buffer: Vec<u8>,
    /// Bytes filled by the last completed transfer.
    len: usize,
    submitted: bool,
    ctx: *mut ffi::libusb_context,
    // Keeps the device handle (and thus `dev_handle` and `ctx`) alive.
    _handle: SharedHandle,
}

// SAFETY: the transfer is only touched through `&mut self`, and libusb transfers may be
// submitted and reaped from any thread.
unsafe impl Send for RawTransfer {}

impl RawTransfer {
    fn alloc(handle: SharedHandle, iso_packets: usize, len: usize) -> rusb::Result<Self> {
        let (dev, ctx) = {
            let guard = handle.read().map_err(|_| rusb::Error::Other)?;
            (guard.as_raw(), guard.context().as_raw())
        };

        // SAFETY: plain allocation; a null return means out of memory.
        let transfer = unsafe { ffi::libusb_alloc_transfer(iso_packets as c_int) };
        let transfer = NonNull::new(transfer).ok_or(rusb::Error::NoMem)?;

        let mut raw = Self {
            transfer,
            completed: Box::new(0),
            buffer: vec![0; len],
            len: 0,
            submitted: false,
            ctx,
            _handle: handle,
        };

        // SAFETY: freshly allocated transfer; the buffer and flag are heap allocations that
        // never move while `raw` is alive.
        unsafe {
            let t = raw.transfer.as_ptr();
            (*t).dev_handle = dev;
            (*t).buffer = raw.buffer.as_mut_ptr();
            (*t).user_data = &mut *raw.completed as *mut c_int as *mut c_void;
            (*t).callback = transfer_callback;
        }
        Ok(raw)
    }

    /// Pointer to the first isochronous packet descriptor.
    fn iso_descs(&self) -> *mut ffi::libusb_iso_packet_descriptor {
        // SAFETY: only computes the address of the trailing descriptor array.
        unsafe {
            ptr::addr_of_mut!((*self.transfer.as_ptr()).iso_packet_desc)
                as *mut ffi::libusb_iso_packet_descriptor
        }
    }

    fn submit(&mut self) -> rusb::Result<()> {
        if self.submitted {
            return Err(rusb::Error::Busy);
        }
        *self.completed = 0;
        // SAFETY: the transfer is fully initialized and not in flight.
        let rc = unsafe { ffi::libusb_submit_transfer(self.transfer.as_ptr()) };
        if rc < 0 {
            return Err(error_from_libusb(rc));
        }
        self.submitted = true;
        Ok(())
    }

    fn cancel(&mut self) -> rusb::Result<()> {
        if !self.submitted {
            return Ok(());
        }
        // SAFETY: the transfer is in flight.
        let rc = unsafe { ffi::libusb_cancel_transfer(self.transfer.as_ptr()) };
        match rc {
            // Already completed; `wait` will reap it.
            LIBUSB_ERROR_NOT_FOUND => Ok(()),
            rc if rc < 0 => Err(error_from_libusb(rc)),
            _ => Ok(()),
        }
    }

    /// Waits for the submitted transfer and returns its libusb status.
    fn wait(&mut self) -> rusb::Result<c_int> {
        if !self.submitted {
            return Err(rusb::Error::NotFound);
        }
        let completed: *mut c_int = &mut *self.completed;
        // SAFETY: `completed` is only written by `transfer_callback`, which runs inside
        // `libusb_handle_events_completed`.
        while unsafe { ptr::read_volatile(completed) } == 0 {
            let rc = unsafe { ffi::libusb_handle_events_completed(self.ctx, completed) };
            if rc < 0 && rc != LIBUSB_ERROR_INTERRUPTED {
                return Err(error_from_libusb(rc));
            }
        }
        self.submitted = false;
        // SAFETY: the transfer has completed and belongs to us again.
        let (status, actual) = unsafe {
            let t = self.transfer.as_ptr();
            ((*t).status, (*t).actual_length)
        };
        self.len = actual.max(0) as usize;
        Ok(status)
    }

    fn status_to_result(status: c_int, completed: usize) -> rusb::Result<UrbStatus> {
        match status {
            LIBUSB_TRANSFER_COMPLETED => Ok(UrbStatus::Completed(completed)),
            LIBUSB_TRANSFER_CANCELLED => Ok(UrbStatus::Cancelled),
            LIBUSB_TRANSFER_TIMED_OUT => Err(rusb::Error::Timeout),
            LIBUSB_TRANSFER_STALL => Err(rusb::Error::Pipe),
            LIBUSB_TRANSFER_NO_DEVICE => Err(rusb::Error::NoDevice),
            LIBUSB_TRANSFER_OVERFLOW => Err(rusb::Error::Overflow),
            _ => Err(rusb::Error::Io),
        }
    }
}

impl Drop for RawTransfer {
    fn drop(&mut self) {
        if self.submitted {
            if let Err(e) = self.cancel() {
                log::warn!("failed to cancel transfer: {}", e);
            }
            if let Err(e) = self.wait() {
                // The kernel may still own the buffer; leaking is the only safe option.
                log::error!("failed to reap cancelled transfer: {}", e);
                std::mem::forget(std::mem::take(&mut self.buffer));
                return;
            }
        }
        // SAFETY: the transfer isn't in flight.
        unsafe { ffi::libusb_free_transfer(self.transfer.as_ptr()) };
    }
}

struct LibusbBulkUrb {
    raw: RawTransfer,
}

impl Urb for LibusbBulkUrb {
    fn submit(&mut self) -> rusb::Result<()> {
        self.raw.submit()
    }

    fn wait(&mut self) -> rusb::Result<UrbStatus> {
        let status = self.raw.wait()?;
        match status {
            LIBUSB_TRANSFER_COMPLETED => Ok(UrbStatus::Completed(self.raw.len)),
            // `actual_length` stays visible through `data()`.
            LIBUSB_TRANSFER_TIMED_OUT => Ok(UrbStatus::TimedOut(self.raw.len)),
            _ => {
                self.raw.len = 0;
                RawTransfer::status_to_result(status, 0)
            }
        }
    }

    fn cancel(&mut self) -> rusb::Result<()> {
        self.raw.cancel()
    }
}

impl BulkUrb for LibusbBulkUrb {
    fn data(&self) -> &[u8] {
        &self.raw.buffer[..self.raw.len]
    }

    fn capacity(&self) -> usize {
        self.raw.buffer.len()
    }
}

struct LibusbIsoUrb {
    raw: RawTransfer,
    num_packets: usize,
    packet_size: usize,
}

impl Urb for LibusbIsoUrb {
    fn submit(&mut self) -> rusb::Result<()> {
        self.raw.submit()
    }

    fn wait(&mut self) -> rusb::Result<UrbStatus> {
        let status = self.raw.wait()?;
        RawTransfer::status_to_result(status, self.num_packets)
    }

    fn cancel(&mut self) -> rusb::Result<()> {
        self.raw.cancel()
    }
}

impl IsoUrb for LibusbIsoUrb {
    fn num_packets(&self) -> usize {
        self.num_packets
    }

    fn packet(&self, index: usize) -> IsoPacket {
        assert!(index < self.num_packets);
        // SAFETY: `index` is in bounds of the descriptor array, and the transfer isn't in
        // flight whenever the caller holds `&self` after `wait`.
        let desc = unsafe { &*self.raw.iso_descs().add(index) };
        IsoPacket {
            status: desc.status as i32,
            actual_length: (desc.actual_length as usize).min(self.packet_size),
        }
    }

    fn packet_data(&self, index: usize) -> &[u8] {
        let packet = self.packet(index);
        let start = index * self.packet_size;
        &self.raw.buffer[start..start + packet.actual_length]
    }
}

//! The USB layer.
//!
//! Everything this library does with the device goes through [`UsbTransport`]: synchronous
//! control and bulk transfers, interface management, and asynchronous URBs for the streaming
//! engines. [`LibusbTransport`] implements it on top of libusb.

mod libusb;
#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

pub use self::libusb::LibusbTransport;

/// Result of waiting for an URB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbStatus {
    /// The transfer finished. Bulk URBs report the number of bytes received, isochronous URBs
    /// their number of packets.
    Completed(usize),
    /// The transfer was cancelled before it finished.
    Cancelled,
    /// A bulk transfer timed out after receiving this many bytes.
    TimedOut(usize),
}

/// Status and length of one packet of a completed isochronous URB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacket {
    /// 0 on success, a libusb transfer status otherwise.
    pub status: i32,
    pub actual_length: usize,
}

/// Operations shared by bulk and isochronous URBs.
///
/// The URB's buffer belongs to the kernel between `submit` and the matching `wait`.
pub trait Urb: Send {
    fn submit(&mut self) -> rusb::Result<()>;

    /// Blocks until the URB completes or is cancelled.
    fn wait(&mut self) -> rusb::Result<UrbStatus>;

    /// Requests cancellation. The URB is only reusable after `wait` has returned.
    fn cancel(&mut self) -> rusb::Result<()>;
}

/// An asynchronous bulk transfer with its own receive buffer.
pub trait BulkUrb: Urb {
    /// The bytes received by the last completed transfer.
    fn data(&self) -> &[u8];

    fn capacity(&self) -> usize;
}

/// An asynchronous isochronous transfer of a fixed number of packets.
pub trait IsoUrb: Urb {
    fn num_packets(&self) -> usize;
    fn packet(&self, index: usize) -> IsoPacket;

    /// The bytes received in packet `index` of the last completed transfer.
    fn packet_data(&self, index: usize) -> &[u8];
}

/// An opened USB device.
pub trait UsbTransport: Send + Sync {
    /// `(idVendor, idProduct)`
    fn device_ids(&self) -> rusb::Result<(u16, u16)>;

    /// Reads the complete configuration descriptor `index`, including all class-specific
    /// descriptors.
    fn config_descriptor(&self, index: u8) -> rusb::Result<Vec<u8>>;

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn detach_kernel_driver(&self, interface: u8) -> rusb::Result<()>;
    fn claim_interface(&self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&self, interface: u8) -> rusb::Result<()>;
    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> rusb::Result<()>;
    fn clear_halt(&self, endpoint: u8) -> rusb::Result<()>;

    fn bulk_transfer(&self, endpoint: u8, buf: &mut [u8], timeout: Duration)
        -> rusb::Result<usize>;

    fn bulk_urb(&self, endpoint: u8, len: usize, timeout: Duration)
        -> rusb::Result<Box<dyn BulkUrb>>;

    fn iso_urb(
        &self,
        endpoint: u8,
        num_packets: usize,
        packet_size: usize,
    ) -> rusb::Result<Box<dyn IsoUrb>>;
}

pub(crate) const REQ_TYPE_STANDARD_DEVICE_IN: u8 = 0x80;
pub(crate) const REQ_GET_DESCRIPTOR: u8 = 0x06;
pub(crate) const DESC_TYPE_CONFIGURATION: u16 = 0x02;

const CONFIG_HEADER_LEN: usize = 9;

/// Reads a configuration descriptor with `GET_DESCRIPTOR`: first the 9-byte header to learn
/// `wTotalLength`, then the whole blob.
pub(crate) fn read_config_descriptor(
    transport: &dyn UsbTransport,
    index: u8,
    timeout: Duration,
) -> rusb::Result<Vec<u8>> {
    let value = DESC_TYPE_CONFIGURATION << 8 | u16::from(index);

    let mut header = [0; CONFIG_HEADER_LEN];
    let n = transport.control_in(
        REQ_TYPE_STANDARD_DEVICE_IN,
        REQ_GET_DESCRIPTOR,
        value,
        0,
        &mut header,
        timeout,
    )?;
    if n < CONFIG_HEADER_LEN {
        return Err(rusb::Error::Io);
    }

    let total = usize::from(u16::from_le_bytes([header[2], header[3]]));
    let mut buf = vec![0; total.max(CONFIG_HEADER_LEN)];
    let n = transport.control_in(
        REQ_TYPE_STANDARD_DEVICE_IN,
        REQ_GET_DESCRIPTOR,
        value,
        0,
        &mut buf,
        timeout,
    )?;
    buf.truncate(n);
    log::trace!("configuration descriptor {}: {} bytes", index, n);
    Ok(buf)
}

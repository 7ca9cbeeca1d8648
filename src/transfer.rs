//! Transfer engines keeping a ring of URBs in flight on a streaming endpoint.
//!
//! Both engines present a blocking `read` that returns one payload per call. The URB at the
//! ring's read index is always waited on before its successor, and its data is copied out before
//! it is handed back to the kernel.

use std::time::Duration;

use crate::{
    error::{Action, Error, ErrorKind, ResultExt},
    frame::PayloadSource,
    transport::{BulkUrb, IsoUrb, Urb, UrbStatus, UsbTransport},
    Result,
};

/// Upper bound on the buffer size of a bulk URB.
pub const DEFAULT_BULK_URB_SIZE: usize = 16384;
pub const DEFAULT_BULK_URBS: usize = 64;
pub const DEFAULT_ISO_TRANSFERS: usize = 8;
pub const DEFAULT_ISO_PACKETS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Submitted,
}

/// A fixed set of URBs submitted round-robin.
struct Ring<U: Urb + ?Sized> {
    urbs: Vec<Box<U>>,
    states: Vec<SlotState>,
    next: usize,
    closed: bool,
    /// Bytes received by the URB of the last `wait_next` if it timed out.
    timed_out_len: usize,
}

impl<U: Urb + ?Sized> Ring<U> {
    /// Creates and submits `count` URBs. If any of them fails, the ones already submitted are
    /// cancelled and reaped before the error is returned.
    fn new(count: usize, mut create: impl FnMut() -> rusb::Result<Box<U>>) -> Result<Self> {
        let mut ring = Self {
            urbs: Vec::with_capacity(count),
            states: Vec::with_capacity(count),
            next: 0,
            closed: false,
            timed_out_len: 0,
        };

        for i in 0..count {
            let urb = match create() {
                Ok(urb) => urb,
                Err(e) => {
                    log::debug!("failed to create URB {} of {}: {}", i, count, e);
                    ring.close();
                    return Err(e).during(Action::StreamSetup);
                }
            };
            ring.urbs.push(urb);
            ring.states.push(SlotState::Idle);
            if let Err(e) = ring.submit(i) {
                log::debug!("failed to submit URB {} of {}: {}", i, count, e);
                ring.close();
                return Err(e).during(Action::StreamSetup);
            }
        }

        Ok(ring)
    }

    fn submit(&mut self, index: usize) -> rusb::Result<()> {
        self.urbs[index].submit()?;
        self.states[index] = SlotState::Submitted;
        log::trace!("URB {}: submitted", index);
        Ok(())
    }

    /// Waits for the URB at the read index and returns its slot.
    ///
    /// The slot stays at the read index until [`Ring::release`] hands it back to the kernel.
    fn wait_next(&mut self) -> Result<usize> {
        if self.closed {
            return Err(Error::with_action(ErrorKind::Cancelled, Action::StreamRead));
        }

        self.timed_out_len = 0;
        let index = self.next;
        if self.states[index] == SlotState::Idle {
            // An earlier resubmission failed.
            self.submit(index).during(Action::StreamRead)?;
        }

        let result = self.urbs[index].wait();
        self.states[index] = SlotState::Idle;
        match result {
            Ok(UrbStatus::Completed(n)) => {
                log::trace!("URB {}: completed ({})", index, n);
                Ok(index)
            }
            Ok(UrbStatus::Cancelled) => {
                log::trace!("URB {}: cancelled", index);
                self.close();
                Err(Error::with_action(ErrorKind::Cancelled, Action::StreamRead))
            }
            Ok(UrbStatus::TimedOut(n)) => {
                if n > 0 {
                    log::debug!("URB {}: timed out, discarding {} bytes", index, n);
                } else {
                    log::trace!("URB {}: timed out", index);
                }
                self.timed_out_len = n;
                self.release(index);
                Err(Error::with_action(rusb::Error::Timeout, Action::StreamRead))
            }
            Err(e) => {
                log::trace!("URB {}: failed: {}", index, e);
                self.release(index);
                Err(e).during(Action::StreamRead)
            }
        }
    }

    fn urb(&self, index: usize) -> &U {
        &self.urbs[index]
    }

    /// Resubmits slot `index` and advances the read index past it.
    fn release(&mut self, index: usize) {
        if let Err(e) = self.submit(index) {
            log::warn!("failed to resubmit URB {}: {}", index, e);
        }
        self.next = (index + 1) % self.urbs.len();
    }

    /// Cancels every submitted URB, then reaps them all.
    fn close(&mut self) {
        self.closed = true;

        for (i, urb) in self.urbs.iter_mut().enumerate() {
            if self.states[i] == SlotState::Submitted {
                if let Err(e) = urb.cancel() {
                    log::debug!("failed to cancel URB {}: {}", i, e);
                }
            }
        }
        for (i, urb) in self.urbs.iter_mut().enumerate() {
            if self.states[i] == SlotState::Submitted {
                if let Err(e) = urb.wait() {
                    log::debug!("URB {} failed while closing: {}", i, e);
                }
                self.states[i] = SlotState::Idle;
            }
        }
    }
}

impl<U: Urb + ?Sized> Drop for Ring<U> {
    fn drop(&mut self) {
        if !self.closed {
            self.close();
        }
    }
}

/// Keeps bulk URBs in flight and returns one payload per read, delimited by short transfers.
pub struct BulkEngine {
    ring: Ring<dyn BulkUrb>,
    /// Set when a read failed partway through a payload. The rest of that payload is discarded
    /// before the next one is returned.
    resync: bool,
}

impl BulkEngine {
    /// Allocates and submits `num_urbs` URBs of `min(max_payload, size_cap)` bytes (`size_cap`
    /// if the device didn't report a payload size).
    pub fn new(
        transport: &dyn UsbTransport,
        endpoint: u8,
        max_payload: usize,
        num_urbs: usize,
        size_cap: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if num_urbs == 0 || size_cap == 0 {
            return Err(Error::with_action(
                ErrorKind::Other("bulk engine needs at least one non-empty URB".into()),
                Action::StreamSetup,
            ));
        }
        let size = match max_payload {
            0 => size_cap,
            n => n.min(size_cap),
        };
        log::debug!(
            "bulk engine: endpoint {:#04x}, {} URBs of {} bytes",
            endpoint,
            num_urbs,
            size
        );
        let ring = Ring::new(num_urbs, || transport.bulk_urb(endpoint, size, timeout))?;
        Ok(Self {
            ring,
            resync: false,
        })
    }

    /// Reads one payload into `buf`.
    ///
    /// Completed URBs are concatenated until one comes back short. If `buf` cannot hold the
    /// payload, the URBs are still recycled and `BufferTooSmall` is returned. After an error in
    /// the middle of a payload, its remaining transfers are dropped by the next read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.resync {
            self.skip_payload_tail()?;
        }

        let mut total = 0;
        loop {
            let index = match self.ring.wait_next() {
                Ok(index) => index,
                Err(e) => {
                    let partial = self.ring.timed_out_len;
                    if !e.is_cancelled() && (total > 0 || partial > 0) {
                        self.resync = true;
                    }
                    return Err(e);
                }
            };
            let urb = self.ring.urb(index);
            let data = urb.data();
            let n = data.len();
            let full = n >= urb.capacity();
            let fits = total + n <= buf.len();
            if fits {
                buf[total..total + n].copy_from_slice(data);
            }
            self.ring.release(index);

            if !fits {
                self.resync = full;
                return Err(Error::with_action(
                    ErrorKind::BufferTooSmall {
                        required: total + n,
                        available: buf.len(),
                    },
                    Action::StreamRead,
                ));
            }
            total += n;
            if !full {
                return Ok(total);
            }
        }
    }

    /// Discards completed transfers up to and including the next short one.
    fn skip_payload_tail(&mut self) -> Result<()> {
        let mut skipped = 0;
        while self.resync {
            let index = self.ring.wait_next()?;
            let urb = self.ring.urb(index);
            let n = urb.data().len();
            let full = n >= urb.capacity();
            self.ring.release(index);
            skipped += n;
            if !full {
                self.resync = false;
            }
        }
        log::debug!("discarded {} bytes of an interrupted payload", skipped);
        Ok(())
    }

    pub fn close(&mut self) {
        self.ring.close();
    }
}

/// Number of packets per isochronous transfer: enough to hold `max_frame_size`, at most `cap`.
pub fn packets_per_transfer(max_frame_size: usize, packet_size: usize, cap: usize) -> usize {
    if packet_size == 0 {
        return 1;
    }
    let packets = (max_frame_size + packet_size - 1) / packet_size;
    packets.max(1).min(cap.max(1))
}

/// Keeps isochronous transfers in flight and returns one non-empty packet per read.
pub struct IsoEngine {
    ring: Ring<dyn IsoUrb>,
    /// Slot and next packet of a partially consumed transfer.
    current: Option<(usize, usize)>,
    skipped: u64,
}

impl IsoEngine {
    pub fn new(
        transport: &dyn UsbTransport,
        endpoint: u8,
        num_transfers: usize,
        num_packets: usize,
        packet_size: usize,
    ) -> Result<Self> {
        if num_transfers == 0 || num_packets == 0 || packet_size == 0 {
            return Err(Error::with_action(
                ErrorKind::Other("isochronous engine needs at least one non-empty packet".into()),
                Action::StreamSetup,
            ));
        }
        log::debug!(
            "isochronous engine: endpoint {:#04x}, {} transfers of {}x{} bytes",
            endpoint,
            num_transfers,
            num_packets,
            packet_size
        );
        let ring = Ring::new(num_transfers, || {
            transport.iso_urb(endpoint, num_packets, packet_size)
        })?;
        Ok(Self {
            ring,
            current: None,
            skipped: 0,
        })
    }

    /// Reads the next non-empty, error-free packet into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let (index, mut packet) = match self.current.take() {
                Some(current) => current,
                None => (self.ring.wait_next()?, 0),
            };

            let urb = self.ring.urb(index);
            let count = urb.num_packets();
            let mut found = None;
            while packet < count {
                let desc = urb.packet(packet);
                packet += 1;
                if desc.status != 0 || desc.actual_length == 0 {
                    if desc.status != 0 {
                        log::trace!("URB {}: packet {} status {}", index, packet - 1, desc.status);
                    }
                    self.skipped += 1;
                    continue;
                }
                found = Some(packet - 1);
                break;
            }

            let result = found.map(|p| {
                let data = urb.packet_data(p);
                if data.len() <= buf.len() {
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                } else {
                    Err(Error::with_action(
                        ErrorKind::BufferTooSmall {
                            required: data.len(),
                            available: buf.len(),
                        },
                        Action::StreamRead,
                    ))
                }
            });

            if packet < count {
                self.current = Some((index, packet));
            } else {
                self.ring.release(index);
            }

            if let Some(result) = result {
                return result;
            }
        }
    }

    /// Number of packets skipped because they were empty or reported an error.
    pub fn skipped_packets(&self) -> u64 {
        self.skipped
    }

    pub fn close(&mut self) {
        self.current = None;
        self.ring.close();
    }
}

/// The transfer engine driving a stream.
pub enum TransferEngine {
    Bulk(BulkEngine),
    Iso(IsoEngine),
}

impl TransferEngine {
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            TransferEngine::Bulk(engine) => engine.read(buf),
            TransferEngine::Iso(engine) => engine.read(buf),
        }
    }

    /// Cancels and reaps every URB. Reads afterwards fail with `Cancelled`.
    pub fn close(&mut self) {
        match self {
            TransferEngine::Bulk(engine) => engine.close(),
            TransferEngine::Iso(engine) => engine.close(),
        }
    }
}

impl PayloadSource for TransferEngine {
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.read(buf)
    }
}

//! Video streaming sessions.

use std::{sync::Arc, time::Duration};

use crate::{
    error::{Action, Error, ResultExt},
    frame::{Frame, FrameReader},
    probe::ProbeCommit,
    transfer::{
        TransferEngine, DEFAULT_BULK_URBS, DEFAULT_BULK_URB_SIZE, DEFAULT_ISO_PACKETS,
        DEFAULT_ISO_TRANSFERS,
    },
    transport::UsbTransport,
    Result,
};

/// Parameters of the transfer pipeline backing a stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Frame interval to request during negotiation. `None` uses the frame's default interval.
    pub frame_interval: Option<Duration>,
    pub bulk_urbs: usize,
    /// Upper bound on the buffer size of each bulk URB.
    pub bulk_urb_size: usize,
    pub iso_transfers: usize,
    /// Upper bound on the number of packets per isochronous transfer.
    pub iso_packets: usize,
    pub bulk_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            frame_interval: None,
            bulk_urbs: DEFAULT_BULK_URBS,
            bulk_urb_size: DEFAULT_BULK_URB_SIZE,
            iso_transfers: DEFAULT_ISO_TRANSFERS,
            iso_packets: DEFAULT_ISO_PACKETS,
            bulk_timeout: Duration::from_secs(5),
        }
    }
}

/// A running video stream.
///
/// Owns the claimed streaming interface until it is closed or dropped.
pub struct Stream {
    transport: Arc<dyn UsbTransport>,
    interface: u8,
    /// Selected alternate setting, for isochronous interfaces.
    alt_setting: Option<u8>,
    endpoint: u8,
    probe_commit: ProbeCommit,
    reader: FrameReader<TransferEngine>,
    closed: bool,
}

impl Stream {
    pub(crate) fn new(
        transport: Arc<dyn UsbTransport>,
        interface: u8,
        alt_setting: Option<u8>,
        endpoint: u8,
        probe_commit: ProbeCommit,
        reader: FrameReader<TransferEngine>,
    ) -> Self {
        Self {
            transport,
            interface,
            alt_setting,
            endpoint,
            probe_commit,
            reader,
            closed: false,
        }
    }

    /// The parameters the device committed to.
    pub fn probe_commit(&self) -> &ProbeCommit {
        &self.probe_commit
    }

    pub fn interface_number(&self) -> u8 {
        self.interface
    }

    /// The alternate setting carrying the stream, or `None` for bulk streams.
    pub fn alt_setting(&self) -> Option<u8> {
        self.alt_setting
    }

    pub fn endpoint_address(&self) -> u8 {
        self.endpoint
    }

    /// Blocks until the next complete frame has been received.
    ///
    /// Transport errors are returned as they occur and the partially received frame is kept, so
    /// reading may be retried. After [`Stream::close`], this fails with `Cancelled`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        self.reader.read_frame()
    }

    /// Number of payloads that were dropped, either because their header was malformed or
    /// because they arrived after the end of a frame.
    pub fn dropped_payloads(&self) -> u64 {
        self.reader.builder().dropped_payloads()
    }

    /// Cancels all transfers and gives the interface back.
    ///
    /// Isochronous interfaces are switched back to the zero-bandwidth alternate setting 0.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader.source_mut().close();

        let mut result = Ok(());
        if self.alt_setting.is_some() {
            if let Err(e) = self.transport.set_alt_setting(self.interface, 0) {
                log::warn!("failed to reset interface {} to alt 0: {}", self.interface, e);
                result = Err(Error::with_action(e, Action::ClosingStream));
            }
        }
        let release = self
            .transport
            .release_interface(self.interface)
            .during(Action::ClosingStream);
        log::debug!("stream on interface {} closed", self.interface);
        result.and(release)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error while dropping stream: {}", e);
        }
    }
}

//! Stream parameter negotiation on a Video Streaming interface.

use std::time::Duration;

use crate::{
    config::{Interface, TransferType},
    error::{Action, Error, ErrorKind, ResultExt},
    format::{FormatIndex, FrameIndex, StreamingInterfaceDesc, StreamingInterfaceId},
    frame::FrameReader,
    probe::ProbeCommit,
    request::{Request, Target},
    stream::{Stream, StreamOptions},
    transfer::{packets_per_transfer, BulkEngine, IsoEngine, TransferEngine},
    util::BcdVersion,
    Device, Result,
};

/// Controls associated with Video Streaming interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ControlId {
    Probe = 0x01,
    Commit = 0x02,
    StillProbe = 0x03,
    StillCommit = 0x04,
    StillImageTrigger = 0x05,
    StreamErrorCode = 0x06,
    GenerateKeyFrame = 0x07,
    UpdateFrameSegment = 0x08,
    SynchDelay = 0x09,
}

/// Grants access to a Video Streaming interface.
pub struct StreamingInterface<'a> {
    device: &'a Device,
    desc: &'a StreamingInterfaceDesc,
    version: BcdVersion,
}

impl<'a> StreamingInterface<'a> {
    pub(crate) fn new(
        device: &'a Device,
        desc: &'a StreamingInterfaceDesc,
        version: BcdVersion,
    ) -> Self {
        Self {
            device,
            desc,
            version,
        }
    }

    pub fn id(&self) -> StreamingInterfaceId {
        self.desc.id()
    }

    pub fn desc(&self) -> &StreamingInterfaceDesc {
        self.desc
    }

    /// Negotiates `format`/`frame`, configures the endpoint and starts the transfer pipeline.
    pub fn start_stream(
        &mut self,
        format: FormatIndex,
        frame: FrameIndex,
        options: &StreamOptions,
    ) -> Result<Stream> {
        let probe_commit = self.negotiate(format, frame, options.frame_interval)?;
        let interface = self.id().as_raw();

        match self.start_transfers(&probe_commit, options) {
            Ok((alt_setting, endpoint, reader)) => Ok(Stream::new(
                self.device.gateway().transport().clone(),
                interface,
                alt_setting,
                endpoint,
                probe_commit,
                reader,
            )),
            Err(e) => {
                self.release(true);
                Err(e)
            }
        }
    }

    /// Runs the Probe/Commit handshake and returns the committed parameters.
    ///
    /// On success the interface stays claimed; on failure it is released.
    pub fn negotiate(
        &mut self,
        format: FormatIndex,
        frame: FrameIndex,
        frame_interval: Option<Duration>,
    ) -> Result<ProbeCommit> {
        let frame_desc = self.desc.frame(format, frame)?;
        let interval = match frame_interval {
            Some(interval) => {
                if !frame_desc.frame_intervals().contains(interval) {
                    return Err(Error::with_action(
                        ErrorKind::NotSupported(format!(
                            "frame interval {:?} for frame {} of format {}",
                            interval,
                            frame.as_raw(),
                            format.as_raw()
                        )),
                        Action::StreamNegotiation,
                    ));
                }
                interval
            }
            None => frame_desc.default_frame_interval(),
        };

        let transport = self.device.gateway().transport();
        let interface = self.id().as_raw();
        match transport.detach_kernel_driver(interface) {
            Ok(()) | Err(rusb::Error::NotFound) | Err(rusb::Error::NotSupported) => {}
            Err(e) => log::warn!("failed to detach kernel driver from {}: {}", interface, e),
        }
        transport
            .claim_interface(interface)
            .during(Action::StreamNegotiation)?;

        let res = self.probe_and_commit(format, frame, interval);
        if res.is_err() {
            self.release(false);
        }
        res
    }

    fn probe_and_commit(
        &self,
        format: FormatIndex,
        frame: FrameIndex,
        interval: Duration,
    ) -> Result<ProbeCommit> {
        let max = self.read_probe(Request::GetMax)?;
        log::debug!("device maximum: {:?}", max);

        let mut probe = max;
        probe.format_index = format;
        probe.frame_index = frame;
        probe.set_frame_interval(interval);
        log::debug!("probing: {:?}", probe);
        self.write_probe_commit(ControlId::Probe, &probe)?;

        let negotiated = self.read_probe(Request::GetCur)?;
        log::debug!("negotiated: {:?}", negotiated);
        if negotiated.format_index != format || negotiated.frame_index != frame {
            return Err(Error::with_action(
                ErrorKind::NotSupported(format!(
                    "device changed format/frame {}/{} to {}/{}",
                    format.as_raw(),
                    frame.as_raw(),
                    negotiated.format_index.as_raw(),
                    negotiated.frame_index.as_raw()
                )),
                Action::StreamNegotiation,
            ));
        }
        let exceeding = negotiated.fields_exceeding(&max);
        if !exceeding.is_empty() {
            log::warn!("negotiated values exceed the device maximum: {:?}", exceeding);
        }

        self.write_probe_commit(ControlId::Commit, &negotiated)?;
        Ok(negotiated)
    }

    fn read_probe(&self, request: Request) -> Result<ProbeCommit> {
        let mut buf = vec![0; ProbeCommit::wire_len(self.version)];
        let n = self.device.gateway().get_raw(
            self.target(),
            request.code(),
            ControlId::Probe as u8,
            0,
            &mut buf,
        )?;
        ProbeCommit::decode(&buf[..n])
    }

    fn write_probe_commit(&self, control: ControlId, value: &ProbeCommit) -> Result<()> {
        self.device.gateway().set(
            self.target(),
            Request::SetCur.code(),
            control as u8,
            0,
            &value.encode(self.version),
        )
    }

    fn start_transfers(
        &self,
        probe_commit: &ProbeCommit,
        options: &StreamOptions,
    ) -> Result<(Option<u8>, u8, FrameReader<TransferEngine>)> {
        let transport = self.device.gateway().transport();
        let interface_number = self.id().as_raw();
        let endpoint = self.desc.endpoint_address();
        let interface = self
            .device
            .config()
            .interface(interface_number)
            .ok_or_else(|| {
                Error::with_action(
                    ErrorKind::NotFound(format!("interface {}", interface_number)),
                    Action::StreamSetup,
                )
            })?;
        let transfer_type = interface
            .alt_settings()
            .iter()
            .find_map(|alt| alt.endpoint(endpoint))
            .map(|ep| ep.transfer_type())
            .ok_or_else(|| {
                Error::with_action(
                    ErrorKind::NotFound(format!("endpoint {:#04x}", endpoint)),
                    Action::StreamSetup,
                )
            })?;

        let max_payload = probe_commit.max_payload_transfer_size as usize;
        let frame_size = probe_commit.max_video_frame_size as usize;
        match transfer_type {
            TransferType::Isochronous => {
                let alt = select_alt_setting(interface, endpoint, max_payload).ok_or_else(|| {
                    Error::with_action(
                        ErrorKind::NotFound(format!(
                            "isochronous alternate setting for endpoint {:#04x}",
                            endpoint
                        )),
                        Action::StreamSetup,
                    )
                })?;
                let packet_size = interface
                    .alt_setting(alt)
                    .and_then(|a| a.endpoint(endpoint))
                    .map_or(0, |ep| ep.effective_packet_size());
                log::debug!(
                    "selected alt setting {} ({} bytes per packet) for {} byte payloads",
                    alt,
                    packet_size,
                    max_payload
                );
                transport
                    .set_alt_setting(interface_number, alt)
                    .during(Action::StreamSetup)?;

                let packets = packets_per_transfer(frame_size, packet_size, options.iso_packets);
                let engine = IsoEngine::new(
                    &**transport,
                    endpoint,
                    options.iso_transfers,
                    packets,
                    packet_size,
                )?;
                let reader = FrameReader::new(
                    TransferEngine::Iso(engine),
                    packet_size,
                    packet_size,
                    frame_size,
                );
                Ok((Some(alt), endpoint, reader))
            }
            TransferType::Bulk => {
                let engine = BulkEngine::new(
                    &**transport,
                    endpoint,
                    max_payload,
                    options.bulk_urbs,
                    options.bulk_urb_size,
                    options.bulk_timeout,
                )?;
                // A single read may concatenate several URBs into one payload.
                let buf_len = max_payload.max(frame_size).max(options.bulk_urb_size);
                let reader =
                    FrameReader::new(TransferEngine::Bulk(engine), max_payload, buf_len, frame_size);
                Ok((None, endpoint, reader))
            }
            other => Err(Error::with_action(
                ErrorKind::NotSupported(format!(
                    "{:?} endpoint {:#04x} for video data",
                    other, endpoint
                )),
                Action::StreamSetup,
            )),
        }
    }

    fn release(&self, reset_alt: bool) {
        let transport = self.device.gateway().transport();
        let interface = self.id().as_raw();
        if reset_alt {
            if let Err(e) = transport.set_alt_setting(interface, 0) {
                log::debug!("failed to reset interface {} to alt 0: {}", interface, e);
            }
        }
        if let Err(e) = transport.release_interface(interface) {
            log::warn!("failed to release interface {}: {}", interface, e);
        }
    }

    fn target(&self) -> Target {
        Target::Interface {
            interface: self.id().as_raw(),
            entity: 0,
        }
    }
}

/// Picks the alternate setting whose `endpoint` can carry payloads of `max_payload` bytes.
///
/// Alternate settings are scanned in order, skipping ones without endpoints. The first whose
/// effective packet size is at least `max_payload` wins; if none is large enough, the last one
/// with the endpoint is used.
pub fn select_alt_setting(interface: &Interface, endpoint: u8, max_payload: usize) -> Option<u8> {
    let mut last = None;
    for alt in interface.alt_settings() {
        if alt.endpoints().is_empty() {
            continue;
        }
        let ep = match alt.endpoint(endpoint) {
            Some(ep) => ep,
            None => continue,
        };
        if ep.effective_packet_size() >= max_payload {
            return Some(alt.alt_setting());
        }
        last = Some(alt.alt_setting());
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ConfigurationView,
        format::{FormatIndex, FrameIndex},
        testutil,
        transport::mock::{Completion, MockTransport},
    };
    use std::sync::Arc;

    fn probe_record(frame: u8, max_payload: u32, len: usize) -> Vec<u8> {
        let record = ProbeCommit {
            format_index: FormatIndex(1),
            frame_index: FrameIndex(frame),
            frame_interval: 333_333,
            max_video_frame_size: 640 * 480 * 2,
            max_payload_transfer_size: max_payload,
            ..Default::default()
        };
        let mut bytes = record.encode(BcdVersion::UVC_1_5);
        bytes.truncate(len);
        bytes
    }

    fn webcam() -> (MockTransport, Device) {
        testutil::init_logger();
        let mock = MockTransport::new((0x046D, 0x0825), testutil::webcam_config());
        let device = Device::with_transport(Arc::new(mock.clone())).unwrap();
        (mock, device)
    }

    #[test]
    fn alt_setting_selection() {
        let config = ConfigurationView::parse(&testutil::webcam_config()).unwrap();
        let iface = config.interface(1).unwrap();
        assert_eq!(select_alt_setting(iface, 0x81, 2048), Some(2));
        assert_eq!(select_alt_setting(iface, 0x81, 512), Some(1));
        assert_eq!(select_alt_setting(iface, 0x81, 3072), Some(2));
        assert_eq!(select_alt_setting(iface, 0x81, 8192), Some(2));
        assert_eq!(select_alt_setting(iface, 0x82, 512), None);
    }

    #[test]
    fn four_step_negotiation() {
        let (mock, device) = webcam();
        let id = device.streaming_interfaces()[0].id();
        let mut vs = device.streaming_interface_by_id(id).unwrap();

        // UVC 1.1 device: 34-byte records, wIndex = interface 1, wValue = VS_PROBE_CONTROL
        mock.respond(0x83, 0x0100, 0x0001, Ok(probe_record(1, 3072, 34)));
        mock.respond(0x81, 0x0100, 0x0001, Ok(probe_record(2, 2048, 34)));

        let negotiated = vs
            .negotiate(FormatIndex(1), FrameIndex(2), None)
            .unwrap();
        assert_eq!(negotiated.format_index, FormatIndex(1));
        assert_eq!(negotiated.frame_index, FrameIndex(2));
        assert_eq!(negotiated.max_payload_transfer_size, 2048);

        let calls = mock.calls();
        let steps: Vec<_> = calls.iter().map(|c| (c.request, c.value)).collect();
        assert_eq!(
            steps,
            [(0x83, 0x0100), (0x01, 0x0100), (0x81, 0x0100), (0x01, 0x0200)]
        );
        // the patched probe carries the requested frame and its default interval
        assert_eq!(calls[1].data.len(), 34);
        assert_eq!(calls[1].data[2], 1);
        assert_eq!(calls[1].data[3], 2);
        assert_eq!(&calls[1].data[4..8], &333_333u32.to_le_bytes());
        assert_eq!(calls[3].data, probe_record(2, 2048, 34));
        assert_eq!(mock.claimed(), [1]);
        assert!(mock.released().is_empty());
    }

    #[test]
    fn failed_negotiation_releases_interface() {
        let (mock, device) = webcam();
        let id = device.streaming_interfaces()[0].id();
        let mut vs = device.streaming_interface_by_id(id).unwrap();

        // GET_MAX is not scripted: the device stalls
        let err = vs
            .negotiate(FormatIndex(1), FrameIndex(1), None)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Transport(rusb::Error::Pipe)));
        assert_eq!(mock.released(), [1]);
    }

    #[test]
    fn device_changing_frame_is_rejected() {
        let (mock, device) = webcam();
        let id = device.streaming_interfaces()[0].id();
        let mut vs = device.streaming_interface_by_id(id).unwrap();

        mock.respond(0x83, 0x0100, 0x0001, Ok(probe_record(1, 3072, 34)));
        mock.respond(0x81, 0x0100, 0x0001, Ok(probe_record(1, 3072, 34)));
        let err = vs
            .negotiate(FormatIndex(1), FrameIndex(2), None)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotSupported(_)));
        assert_eq!(mock.released(), [1]);
        // no commit
        assert_eq!(mock.calls().len(), 3);
    }

    #[test]
    fn fractional_frame_interval_is_accepted() {
        let (mock, device) = webcam();
        let id = device.streaming_interfaces()[0].id();
        let mut vs = device.streaming_interface_by_id(id).unwrap();

        mock.respond(0x83, 0x0100, 0x0001, Ok(probe_record(2, 3072, 34)));
        mock.respond(0x81, 0x0100, 0x0001, Ok(probe_record(2, 3072, 34)));
        vs.negotiate(
            FormatIndex(1),
            FrameIndex(2),
            Some(Duration::from_secs(1) / 15),
        )
        .unwrap();
        assert_eq!(&mock.calls()[1].data[4..8], &666_666u32.to_le_bytes());

        let (mock, device) = webcam();
        let mut vs = device.streaming_interface_by_id(id).unwrap();
        mock.respond(0x83, 0x0100, 0x0001, Ok(probe_record(1, 3072, 34)));
        mock.respond(0x81, 0x0100, 0x0001, Ok(probe_record(1, 3072, 34)));
        vs.negotiate(
            FormatIndex(1),
            FrameIndex(1),
            Some(Duration::from_secs(1) / 30),
        )
        .unwrap();
        assert_eq!(&mock.calls()[1].data[4..8], &333_333u32.to_le_bytes());
    }

    #[test]
    fn unsupported_interval_is_rejected_before_io() {
        let (mock, device) = webcam();
        let id = device.streaming_interfaces()[0].id();
        let mut vs = device.streaming_interface_by_id(id).unwrap();
        let err = vs
            .negotiate(
                FormatIndex(1),
                FrameIndex(1),
                Some(Duration::from_millis(50)),
            )
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotSupported(_)));
        assert!(mock.calls().is_empty());
        assert!(mock.claimed().is_empty());
    }

    #[test]
    fn short_uvc_1_0_response_is_accepted() {
        let (mock, device) = webcam();
        let id = device.streaming_interfaces()[0].id();
        let mut vs = device.streaming_interface_by_id(id).unwrap();
        mock.respond(0x83, 0x0100, 0x0001, Ok(probe_record(1, 3072, 26)));
        mock.respond(0x81, 0x0100, 0x0001, Ok(probe_record(1, 3072, 26)));
        let negotiated = vs
            .negotiate(FormatIndex(1), FrameIndex(1), None)
            .unwrap();
        assert_eq!(negotiated.clock_frequency, 0);
        assert_eq!(negotiated.max_payload_transfer_size, 3072);
    }

    #[test]
    fn isochronous_stream() {
        let (mock, device) = webcam();
        let id = device.streaming_interfaces()[0].id();
        let mut vs = device.streaming_interface_by_id(id).unwrap();
        mock.respond(0x83, 0x0100, 0x0001, Ok(probe_record(1, 3072, 34)));
        mock.respond(0x81, 0x0100, 0x0001, Ok(probe_record(1, 2048, 34)));

        mock.push_completion(Completion::Iso(vec![
            (0, vec![0x02, 0x80, 1, 2, 3]),
            (0, Vec::new()),
            (-71, vec![0xFF; 8]),
            (0, vec![0x02, 0x82, 4, 5]),
        ]));

        let mut stream = vs
            .start_stream(FormatIndex(1), FrameIndex(1), &StreamOptions::default())
            .unwrap();
        assert_eq!(stream.alt_setting(), Some(2));
        assert_eq!(mock.alt_settings(), [(1, 2)]);

        let frame = stream.read_frame().unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 4, 5]);
        assert_eq!(frame.num_payloads(), 2);

        stream.close().unwrap();
        assert!(stream.read_frame().unwrap_err().is_cancelled());
        assert_eq!(mock.alt_settings(), [(1, 2), (1, 0)]);
        assert_eq!(mock.released(), [1]);

        let urbs = mock.stream();
        assert_eq!(urbs.created, 8);
        assert_eq!(urbs.in_flight, 0);
    }

    #[test]
    fn bulk_stream_closes_on_drop() {
        testutil::init_logger();
        let mock = MockTransport::new((0x2BC5, 0x0501), testutil::bulk_camera_config());
        let device = Device::with_transport(Arc::new(mock.clone())).unwrap();
        let id = device.streaming_interfaces()[0].id();
        let mut vs = device.streaming_interface_by_id(id).unwrap();

        let record = probe_record(1, 512, 48);
        mock.respond(0x83, 0x0100, 0x0001, Ok(record.clone()));
        mock.respond(0x81, 0x0100, 0x0001, Ok(record));
        mock.push_completion(Completion::Bulk(vec![0x02, 0x83, 9, 9]));

        let options = StreamOptions {
            bulk_urbs: 4,
            ..Default::default()
        };
        let mut stream = vs
            .start_stream(FormatIndex(1), FrameIndex(1), &options)
            .unwrap();
        assert_eq!(stream.alt_setting(), None);
        assert_eq!(stream.endpoint_address(), 0x82);
        let frame = stream.read_frame().unwrap();
        assert_eq!(frame.data(), &[9, 9]);
        assert!(frame.fid());

        drop(stream);
        assert!(mock.alt_settings().is_empty());
        assert_eq!(mock.released(), [1]);
        assert_eq!(mock.stream().in_flight, 0);
    }
}

//! Audio streaming sessions.

use crate::{
    audio::{AudioFormat, AudioStreamingInterfaceDesc},
    error::{Action, Error, ErrorKind, ResultExt},
    request::{Gateway, Request, Target},
    stream::StreamOptions,
    transfer::{packets_per_transfer, IsoEngine},
    Device, Result,
};

/// Endpoint control selector of the UAC 1.0 sampling frequency control.
const EP_SAMPLING_FREQ_CONTROL: u8 = 0x01;

/// Grants access to an Audio Streaming interface.
pub struct AudioStreamingInterface<'a> {
    device: &'a Device,
    desc: &'a AudioStreamingInterfaceDesc,
}

impl<'a> AudioStreamingInterface<'a> {
    pub(crate) fn new(device: &'a Device, desc: &'a AudioStreamingInterfaceDesc) -> Self {
        Self { device, desc }
    }

    pub fn interface_number(&self) -> u8 {
        self.desc.interface_number()
    }

    pub fn desc(&self) -> &AudioStreamingInterfaceDesc {
        self.desc
    }

    /// Selects alternate setting `alt`, programs the sampling frequency and starts the
    /// isochronous pipeline.
    ///
    /// The sampling frequency is only sent to the endpoint when its `EP_GENERAL` descriptor
    /// advertises the sampling frequency control; otherwise the device runs at its fixed rate.
    pub fn start_stream(
        &mut self,
        alt: u8,
        sample_rate_hz: u32,
        options: &StreamOptions,
    ) -> Result<AudioStream> {
        let interface = self.interface_number();
        let alt_desc = self.desc.alt_setting(alt)?;
        if !alt_desc.format_type().sample_rates().contains(sample_rate_hz) {
            return Err(Error::with_action(
                ErrorKind::NotSupported(format!(
                    "sampling frequency {} Hz on interface {} alt {}",
                    sample_rate_hz, interface, alt
                )),
                Action::AudioSetup,
            ));
        }

        let gateway = self.device.gateway();
        let transport = gateway.transport();
        match transport.detach_kernel_driver(interface) {
            Ok(()) | Err(rusb::Error::NotFound) | Err(rusb::Error::NotSupported) => {}
            Err(e) => log::warn!("failed to detach kernel driver from {}: {}", interface, e),
        }
        transport
            .claim_interface(interface)
            .during(Action::AudioSetup)?;

        let endpoint = alt_desc.endpoint_address();
        let format = alt_desc.audio_format(sample_rate_hz);
        let setup = || -> Result<IsoEngine> {
            transport
                .set_alt_setting(interface, alt)
                .during(Action::AudioSetup)?;

            let has_freq_control = alt_desc
                .endpoint_general()
                .map_or(false, |ep| ep.sampling_frequency_control());
            if has_freq_control {
                let [b0, b1, b2, _] = sample_rate_hz.to_le_bytes();
                gateway.set(
                    Target::Endpoint(endpoint),
                    Request::SetCur.code(),
                    EP_SAMPLING_FREQ_CONTROL,
                    0,
                    &[b0, b1, b2],
                )?;
            } else {
                log::debug!(
                    "endpoint {:#04x} has no sampling frequency control, not programming it",
                    endpoint
                );
            }

            let packet_size = alt_desc.max_packet_size();
            // Size transfers for roughly 10 ms of audio.
            let bytes_per_10ms = sample_rate_hz as usize
                * usize::from(format.channels)
                * usize::from(alt_desc.format_type().subframe_size())
                / 100;
            let packets = packets_per_transfer(bytes_per_10ms, packet_size, options.iso_packets);
            IsoEngine::new(
                &**transport,
                endpoint,
                options.iso_transfers,
                packets,
                packet_size,
            )
        };

        match setup() {
            Ok(engine) => {
                log::debug!(
                    "audio stream on interface {} alt {}: {:?}",
                    interface,
                    alt,
                    format
                );
                Ok(AudioStream {
                    gateway: gateway.clone(),
                    interface,
                    endpoint,
                    format,
                    buf: vec![0; alt_desc.max_packet_size()],
                    engine,
                    closed: false,
                })
            }
            Err(e) => {
                if let Err(e) = transport.set_alt_setting(interface, 0) {
                    log::debug!("failed to reset interface {} to alt 0: {}", interface, e);
                }
                if let Err(e) = transport.release_interface(interface) {
                    log::warn!("failed to release interface {}: {}", interface, e);
                }
                Err(e)
            }
        }
    }
}

/// One isochronous packet worth of audio samples.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub format: AudioFormat,
    pub data: Vec<u8>,
}

/// A running audio stream.
pub struct AudioStream {
    gateway: Gateway,
    interface: u8,
    endpoint: u8,
    format: AudioFormat,
    buf: Vec<u8>,
    engine: IsoEngine,
    closed: bool,
}

impl AudioStream {
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn endpoint_address(&self) -> u8 {
        self.endpoint
    }

    /// Blocks until the next non-empty packet arrives.
    pub fn read_buffer(&mut self) -> Result<AudioBuffer> {
        let n = self.engine.read(&mut self.buf)?;
        Ok(AudioBuffer {
            format: self.format,
            data: self.buf[..n].to_vec(),
        })
    }

    /// Reads the sampling frequency the endpoint is currently running at.
    pub fn read_sample_rate(&self) -> Result<u32> {
        let mut buf = [0; 3];
        self.gateway.get(
            Target::Endpoint(self.endpoint),
            Request::GetCur.code(),
            EP_SAMPLING_FREQ_CONTROL,
            0,
            &mut buf,
        )?;
        Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], 0]))
    }

    /// Number of packets skipped because they were empty or reported an error.
    pub fn skipped_packets(&self) -> u64 {
        self.engine.skipped_packets()
    }

    /// Cancels all transfers, switches back to alternate setting 0 and releases the interface.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.engine.close();

        let transport = self.gateway.transport();
        let reset = transport
            .set_alt_setting(self.interface, 0)
            .during(Action::ClosingStream);
        if let Err(e) = &reset {
            log::warn!("failed to reset interface {} to alt 0: {}", self.interface, e);
        }
        let release = transport
            .release_interface(self.interface)
            .during(Action::ClosingStream);
        reset.and(release)
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error while dropping audio stream: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testutil,
        transport::mock::{Completion, MockTransport},
    };
    use std::sync::Arc;

    fn microphone() -> (MockTransport, Device) {
        testutil::init_logger();
        let mock = MockTransport::new((0x0D8C, 0x0014), testutil::microphone_config());
        let device = Device::with_transport(Arc::new(mock.clone())).unwrap();
        (mock, device)
    }

    #[test]
    fn start_programs_sampling_frequency() {
        let (mock, device) = microphone();
        let mut iface = device.audio_streaming_interface_by_id(1).unwrap();
        mock.push_completion(Completion::Iso(vec![
            (0, Vec::new()),
            (0, vec![0x11; 192]),
            (0, vec![0x22; 96]),
        ]));

        let mut stream = iface
            .start_stream(1, 48_000, &StreamOptions::default())
            .unwrap();
        assert_eq!(mock.claimed(), [1]);
        assert_eq!(mock.alt_settings(), [(1, 1)]);

        let call = &mock.calls()[0];
        assert_eq!(call.request_type, 0x22);
        assert_eq!(call.request, 0x01);
        assert_eq!(call.value, 0x0100);
        assert_eq!(call.index, 0x0084);
        assert_eq!(call.data, vec![0x80, 0xBB, 0x00]);

        let buffer = stream.read_buffer().unwrap();
        assert_eq!(buffer.data, vec![0x11; 192]);
        assert_eq!(buffer.format.channels, 2);
        assert_eq!(buffer.format.sample_rate_hz, 48_000);
        assert_eq!(buffer.format.bits_per_sample, 16);
        let buffer = stream.read_buffer().unwrap();
        assert_eq!(buffer.data.len(), 96);
        assert_eq!(stream.skipped_packets(), 1);

        stream.close().unwrap();
        assert!(stream.read_buffer().unwrap_err().is_cancelled());
        assert_eq!(mock.alt_settings(), [(1, 1), (1, 0)]);
        assert_eq!(mock.released(), [1]);
    }

    #[test]
    fn read_back_sample_rate() {
        let (mock, device) = microphone();
        let mut iface = device.audio_streaming_interface_by_id(1).unwrap();
        let stream = iface
            .start_stream(1, 44_100, &StreamOptions::default())
            .unwrap();
        mock.respond(0x81, 0x0100, 0x0084, Ok(vec![0x44, 0xAC, 0x00]));
        assert_eq!(stream.read_sample_rate().unwrap(), 44_100);
        assert_eq!(mock.calls()[1].request_type, 0xA2);
    }

    #[test]
    fn unsupported_rate_is_rejected_before_io() {
        let (mock, device) = microphone();
        let mut iface = device.audio_streaming_interface_by_id(1).unwrap();
        let err = iface
            .start_stream(1, 32_000, &StreamOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err.kind(), ErrorKind::NotSupported(_)));
        assert!(mock.claimed().is_empty());

        let err = iface
            .start_stream(3, 48_000, &StreamOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err.kind(), ErrorKind::NotFound(_)));
    }

    #[test]
    fn setup_failure_releases_interface() {
        let (mock, device) = microphone();
        let mut iface = device.audio_streaming_interface_by_id(1).unwrap();
        mock.fail_out(0x01, 0x0100, 0x0084, rusb::Error::Pipe);
        let err = iface
            .start_stream(1, 48_000, &StreamOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err.kind(), ErrorKind::Transport(rusb::Error::Pipe)));
        assert_eq!(mock.alt_settings(), [(1, 1), (1, 0)]);
        assert_eq!(mock.released(), [1]);
        assert_eq!(mock.stream().created, 0);
    }
}

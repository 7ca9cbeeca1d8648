use crate::{
    audio::{self, AudioStreamingInterfaceDesc, AudioTopology},
    config::{ConfigurationView, Interface, TransferType},
    error::*,
    format::{self, StreamingInterfaceDesc},
    topo::{self, InterruptEndpointDesc, Topology},
    Result,
};

const VIDEO_CLASS: u8 = 0x0E;
const AUDIO_CLASS: u8 = 0x01;
const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

const SUBCLASS_CONTROL: u8 = 0x01;
const SUBCLASS_STREAMING: u8 = 0x02;

/// Devices that expose their video function with a vendor-specific interface class.
const VENDOR_CLASS_VIDEO_DEVICES: &[(u16, u16)] = &[(0x199E, 0x8101), (0x199E, 0x8102)];

/// Everything needed to communicate with a device, extracted from its configuration descriptor.
#[derive(Debug)]
pub(crate) struct DeviceInfo {
    pub(crate) config: ConfigurationView,
    pub(crate) video: Option<VideoFunction>,
    pub(crate) audio: Option<AudioFunction>,
}

#[derive(Debug)]
pub(crate) struct VideoFunction {
    pub(crate) control_interface: u8,
    pub(crate) topology: Topology,
    /// Address and class-specific descriptor of the VC interrupt endpoint. Optional.
    pub(crate) interrupt_endpoint: Option<(u8, Option<InterruptEndpointDesc>)>,
    pub(crate) streaming_interfaces: Vec<StreamingInterfaceDesc>,
}

#[derive(Debug)]
pub(crate) struct AudioFunction {
    pub(crate) control_interface: u8,
    pub(crate) topology: AudioTopology,
    pub(crate) streaming_interfaces: Vec<AudioStreamingInterfaceDesc>,
}

/// Finds the video and audio functions of a device.
///
/// Fails with `NotFound` if the device has neither a video nor an audio control interface.
pub(crate) fn detect(ids: (u16, u16), config: ConfigurationView) -> Result<DeviceInfo> {
    let (vendor_id, product_id) = ids;
    log::trace!("detecting functions of {:04x}:{:04x}", vendor_id, product_id);

    let video_class = if VENDOR_CLASS_VIDEO_DEVICES.contains(&ids) {
        log::debug!(
            "{:04x}:{:04x} uses a vendor-specific video interface class",
            vendor_id,
            product_id
        );
        VENDOR_SPECIFIC_CLASS
    } else {
        VIDEO_CLASS
    };

    let video = match find_interface(&config, video_class, SUBCLASS_CONTROL) {
        Some(iface) => Some(detect_video(&config, iface, video_class)?),
        None => None,
    };
    let audio = match find_interface(&config, AUDIO_CLASS, SUBCLASS_CONTROL) {
        Some(iface) => Some(detect_audio(&config, iface)?),
        None => None,
    };

    if video.is_none() && audio.is_none() {
        return err(
            ErrorKind::NotFound(format!(
                "{:04x}:{:04x} has neither a video nor an audio control interface",
                vendor_id, product_id
            )),
            Action::ParsingDescriptors,
        );
    }

    Ok(DeviceInfo {
        config,
        video,
        audio,
    })
}

fn find_interface(config: &ConfigurationView, class: u8, subclass: u8) -> Option<&Interface> {
    let mut matching = config.interfaces().iter().filter(|iface| {
        let alt = iface.first_alt_setting();
        alt.class() == class && alt.subclass() == subclass
    });
    let first = matching.next();
    for other in matching {
        log::warn!(
            "ignoring additional control interface {} (class {:#04x})",
            other.number(),
            class
        );
    }
    first
}

/// Resolves the streaming interfaces a control interface header lists.
///
/// Headers that don't list any (UAC 2.0) fall back to every interface of the given class and
/// streaming subclass.
fn streaming_interfaces<'a>(
    config: &'a ConfigurationView,
    listed: &[u8],
    class: u8,
) -> Result<Vec<&'a Interface>> {
    if listed.is_empty() {
        return Ok(config
            .interfaces()
            .iter()
            .filter(|iface| {
                let alt = iface.first_alt_setting();
                alt.class() == class && alt.subclass() == SUBCLASS_STREAMING
            })
            .collect());
    }

    listed
        .iter()
        .map(|&number| {
            config.interface(number).ok_or_else(|| {
                Error::with_action(
                    ErrorKind::InvalidDescriptor(format!(
                        "header lists streaming interface {}, which does not exist",
                        number
                    )),
                    Action::ParsingDescriptors,
                )
            })
        })
        .collect()
}

fn detect_video(config: &ConfigurationView, iface: &Interface, class: u8) -> Result<VideoFunction> {
    let alt = iface.first_alt_setting();

    let interrupt_ep = match alt.endpoints() {
        [] => None,
        [ep] => {
            if ep.transfer_type() != TransferType::Interrupt {
                return err(
                    ErrorKind::InvalidDescriptor(format!(
                        "control interface has {:?} endpoint, only interrupt endpoints are allowed",
                        ep.transfer_type()
                    )),
                    Action::ParsingDescriptors,
                );
            }
            Some(ep.address())
        }
        eps => {
            return err(
                ErrorKind::InvalidDescriptor(format!(
                    "control interface has {} endpoints, only 1 is allowed",
                    eps.len()
                )),
                Action::ParsingDescriptors,
            );
        }
    };

    let (topology, interrupt_desc) = topo::parse::parse_control_interface(alt)?;
    log::debug!(
        "video control interface {}: UVC {}",
        iface.number(),
        topology.header().uvc_version()
    );

    let streaming_interfaces =
        streaming_interfaces(config, topology.header().streaming_interfaces(), class)?
            .into_iter()
            .map(|vs| format::parse::parse_streaming_interface(vs.first_alt_setting()))
            .collect::<Result<Vec<_>>>()?;

    Ok(VideoFunction {
        control_interface: iface.number(),
        topology,
        interrupt_endpoint: interrupt_ep.map(|addr| (addr, interrupt_desc)),
        streaming_interfaces,
    })
}

fn detect_audio(config: &ConfigurationView, iface: &Interface) -> Result<AudioFunction> {
    let topology = audio::parse_control_interface(iface.first_alt_setting())?;
    log::debug!(
        "audio control interface {}: ADC {}",
        iface.number(),
        topology.header().adc_version()
    );

    let streaming_interfaces = streaming_interfaces(
        config,
        topology.header().streaming_interfaces(),
        AUDIO_CLASS,
    )?
    .into_iter()
    .map(audio::parse_streaming_interface)
    .collect::<Result<Vec<_>>>()?;

    Ok(AudioFunction {
        control_interface: iface.number(),
        topology,
        streaming_interfaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, ConfigBuilder};

    fn detect_raw(ids: (u16, u16), raw: &[u8]) -> Result<DeviceInfo> {
        testutil::init_logger();
        detect(ids, ConfigurationView::parse(raw).unwrap())
    }

    #[test]
    fn webcam() {
        let info = detect_raw((0x046D, 0x0825), &testutil::webcam_config()).unwrap();
        assert!(info.audio.is_none());
        let video = info.video.unwrap();
        assert_eq!(video.control_interface, 0);
        let (addr, desc) = video.interrupt_endpoint.unwrap();
        assert_eq!(addr, 0x83);
        assert_eq!(desc.unwrap().max_transfer_size, 16);
        assert_eq!(video.streaming_interfaces.len(), 1);
        assert_eq!(video.streaming_interfaces[0].id().as_raw(), 1);
        assert_eq!(video.streaming_interfaces[0].formats().len(), 1);
    }

    #[test]
    fn microphone() {
        let info = detect_raw((0x0D8C, 0x0014), &testutil::microphone_config()).unwrap();
        assert!(info.video.is_none());
        let audio = info.audio.unwrap();
        assert_eq!(audio.control_interface, 0);
        assert_eq!(audio.streaming_interfaces.len(), 1);
        assert_eq!(audio.streaming_interfaces[0].interface_number(), 1);
        assert_eq!(audio.streaming_interfaces[0].alt_settings().len(), 1);
    }

    #[test]
    fn vendor_class_quirk() {
        let raw = ConfigBuilder::new()
            .interface(0, 0, 0xFF, 0x01, 0)
            .raw(&[0x24, 0x01, 0x00, 0x01, 0x0D, 0x00])
            .build();

        let info = detect_raw((0x199E, 0x8102), &raw).unwrap();
        let video = info.video.unwrap();
        assert!(video.interrupt_endpoint.is_none());
        assert_eq!(
            video.topology.header().uvc_version(),
            crate::util::BcdVersion::UVC_1_0
        );

        // Other devices with the same layout are not video devices.
        let err = detect_raw((0x1234, 0x5678), &raw).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound(_)));
    }

    #[test]
    fn missing_streaming_interface() {
        let raw = ConfigBuilder::new()
            .interface(0, 0, 0x0E, 0x01, 0)
            .raw(&[0x24, 0x01, 0x10, 0x01, 0x0D, 0x00, 0x80, 0x8D, 0x5B, 0x00, 0x01, 0x04])
            .build();
        let err = detect_raw((0x1234, 0x5678), &raw).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDescriptor(_)));
    }

    #[test]
    fn bulk_control_endpoint_is_rejected() {
        let raw = ConfigBuilder::new()
            .interface(0, 0, 0x0E, 0x01, 0)
            .raw(&[0x24, 0x01, 0x00, 0x01, 0x0D, 0x00])
            .endpoint(0x83, 0x02, 64, 0)
            .build();
        let err = detect_raw((0x1234, 0x5678), &raw).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDescriptor(_)));
    }

    #[test]
    fn no_functions() {
        let raw = ConfigBuilder::new()
            .interface(0, 0, 0x03, 0x01, 0x02)
            .endpoint(0x81, 0x03, 8, 10)
            .build();
        let err = detect_raw((0x046D, 0xC077), &raw).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound(_)));
    }
}

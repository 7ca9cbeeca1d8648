use std::io;

use byteorder::{ReadBytesExt, LE};

use crate::{
    config::{Interface, TransferType},
    descriptor::{parse_interface_extras, ClassSpecificRecord},
    error::*,
    topo::{SourceId, TermId},
    util::{io_err, io_err_res, BcdVersion, BytesExt},
    Result,
};

use super::*;

const AC_DESC_SUBTYPE_HEADER: u8 = 0x01;
const AC_DESC_SUBTYPE_INPUT_TERMINAL: u8 = 0x02;
const AC_DESC_SUBTYPE_OUTPUT_TERMINAL: u8 = 0x03;
const AC_DESC_SUBTYPE_MIXER_UNIT: u8 = 0x04;
const AC_DESC_SUBTYPE_SELECTOR_UNIT: u8 = 0x05;
const AC_DESC_SUBTYPE_FEATURE_UNIT: u8 = 0x06;
const AC_DESC_SUBTYPE_PROCESSING_UNIT: u8 = 0x07;
const AC_DESC_SUBTYPE_EXTENSION_UNIT: u8 = 0x08;
const AC_DESC_SUBTYPE_CLOCK_SOURCE: u8 = 0x0A;
const AC_DESC_SUBTYPE_CLOCK_SELECTOR: u8 = 0x0B;
const AC_DESC_SUBTYPE_CLOCK_MULTIPLIER: u8 = 0x0C;

const AS_DESC_SUBTYPE_GENERAL: u8 = 0x01;
const AS_DESC_SUBTYPE_FORMAT_TYPE: u8 = 0x02;

const EP_DESC_SUBTYPE_GENERAL: u8 = 0x01;

/// Decodes one class-specific record of an Audio Control interface.
///
/// Terminals and units are decoded with their UAC 1.0 layout. The header is decoded with the
/// UAC 2.0 layout when its `bcdADC` says so.
pub fn parse_audio_control(record: &ClassSpecificRecord) -> Result<AudioControlEntity> {
    if !record.is_interface() {
        return Ok(AudioControlEntity::Unknown {
            subtype: record.subtype(),
            payload: record.payload().to_vec(),
        });
    }
    parse_control_record(record.subtype(), record.payload()).during(Action::ParsingDescriptors)
}

/// Decodes one class-specific record of an Audio Streaming interface or its data endpoint.
pub fn parse_audio_streaming(record: &ClassSpecificRecord) -> Result<AudioStreamingEntity> {
    let res = if record.is_endpoint() {
        parse_endpoint_record(record.subtype(), record.payload())
    } else {
        parse_streaming_record(record.subtype(), record.payload())
    };
    res.during(Action::ParsingDescriptors)
}

/// Parses the class-specific descriptors of an Audio Control interface into an
/// [`AudioTopology`].
pub(crate) fn parse_control_interface(alt: &crate::config::AltSetting) -> Result<AudioTopology> {
    let mut entities = Vec::new();
    for record in parse_interface_extras(alt.extra())? {
        let entity = parse_audio_control(&record)?;
        log::debug!("AC entity: {:?}", entity);
        entities.push(entity);
    }

    AudioTopology::from_entities(entities).map_err(|msg| {
        Error::with_action(ErrorKind::InvalidDescriptor(msg), Action::ParsingDescriptors)
    })
}

/// Collects the streaming alternate settings of an Audio Streaming interface.
///
/// Alternate settings without a format (such as the zero-bandwidth setting 0) or without an
/// isochronous endpoint are skipped.
pub(crate) fn parse_streaming_interface(iface: &Interface) -> Result<AudioStreamingInterfaceDesc> {
    let mut alt_settings = Vec::new();
    for alt in iface.alt_settings() {
        let mut general = None;
        let mut format = None;
        for record in parse_interface_extras(alt.extra())? {
            match parse_audio_streaming(&record)? {
                AudioStreamingEntity::General(g) => general = Some(g),
                AudioStreamingEntity::FormatType(f) => format = Some(f),
                other => log::debug!("AS entity: {:?}", other),
            }
        }

        let (general, format) = match (general, format) {
            (Some(g), Some(f)) => (g, f),
            _ => continue,
        };

        let endpoint = match alt
            .endpoints()
            .iter()
            .find(|ep| ep.transfer_type() == TransferType::Isochronous)
        {
            Some(ep) => ep,
            None => {
                log::warn!(
                    "audio streaming interface {} alt {} has a format but no isochronous endpoint",
                    iface.number(),
                    alt.alt_setting()
                );
                continue;
            }
        };

        let mut endpoint_general = None;
        for record in parse_interface_extras(endpoint.extra())? {
            if let AudioStreamingEntity::EndpointGeneral(desc) = parse_audio_streaming(&record)? {
                endpoint_general = Some(desc);
            }
        }

        alt_settings.push(AudioAltSettingDesc {
            alt_setting: alt.alt_setting(),
            general,
            format,
            endpoint_address: endpoint.address(),
            max_packet_size: endpoint.max_packet_size(),
            endpoint_general,
        });
    }

    Ok(AudioStreamingInterfaceDesc {
        interface: iface.number(),
        alt_settings,
    })
}

trait AudioBytesExt {
    fn read_nonzero_clock_id(&mut self) -> io::Result<ClockId>;
    fn read_sources(&mut self) -> io::Result<Vec<SourceId>>;
}

impl AudioBytesExt for &'_ [u8] {
    fn read_nonzero_clock_id(&mut self) -> io::Result<ClockId> {
        ClockId::new(self.read_u8()?)
            .ok_or_else(|| io_err("bClockID is 0, only non-zero numbers are allowed"))
    }

    fn read_sources(&mut self) -> io::Result<Vec<SourceId>> {
        let num = self.read_u8()?;
        (0..num).map(|_| self.read_nonzero_source_id()).collect()
    }
}

fn parse_control_record(subtype: u8, mut raw: &[u8]) -> io::Result<AudioControlEntity> {
    let entity = match subtype {
        AC_DESC_SUBTYPE_HEADER => {
            let adc_version = BcdVersion(raw.read_u16::<LE>()?);
            if adc_version >= BcdVersion(0x0200) {
                let category = raw.read_u8()?;
                let total_len = raw.read_u16::<LE>()?;
                AudioControlEntity::Header(AudioControlHeader {
                    adc_version,
                    total_len,
                    category: Some(category),
                    streaming_interfaces: Vec::new(),
                })
            } else {
                let total_len = raw.read_u16::<LE>()?;
                let count = raw.read_u8()?;
                AudioControlEntity::Header(AudioControlHeader {
                    adc_version,
                    total_len,
                    category: None,
                    streaming_interfaces: raw.read_bytes(count.into())?,
                })
            }
        }
        AC_DESC_SUBTYPE_INPUT_TERMINAL => {
            let id = raw.read_nonzero_term_id()?;
            let terminal_type = raw.read_u16::<LE>()?;
            let assoc = TermId::new(raw.read_u8()?);
            let channels = raw.read_u8()?;
            let channel_config = raw.read_u16::<LE>()?;
            let _channel_names = raw.read_u8()?;
            AudioControlEntity::InputTerminal(AudioInputTerminalDesc {
                id,
                terminal_type,
                assoc,
                channels,
                channel_config,
                string: raw.read_u8()?,
            })
        }
        AC_DESC_SUBTYPE_OUTPUT_TERMINAL => {
            AudioControlEntity::OutputTerminal(AudioOutputTerminalDesc {
                id: raw.read_nonzero_term_id()?,
                terminal_type: raw.read_u16::<LE>()?,
                assoc: TermId::new(raw.read_u8()?),
                source: raw.read_nonzero_source_id()?,
                string: raw.read_u8()?,
            })
        }
        AC_DESC_SUBTYPE_MIXER_UNIT => {
            let id = raw.read_nonzero_unit_id()?;
            let sources = raw.read_sources()?;
            let channels = raw.read_u8()?;
            let channel_config = raw.read_u16::<LE>()?;
            let _channel_names = raw.read_u8()?;
            // `bmControls` runs up to the trailing `iMixer`
            let controls = match raw.split_last() {
                Some((_, controls)) => controls.to_vec(),
                None => return Err(io::ErrorKind::UnexpectedEof.into()),
            };
            AudioControlEntity::MixerUnit(MixerUnitDesc {
                id,
                sources,
                channels,
                channel_config,
                controls,
            })
        }
        AC_DESC_SUBTYPE_SELECTOR_UNIT => {
            AudioControlEntity::SelectorUnit(AudioSelectorUnitDesc {
                id: raw.read_nonzero_unit_id()?,
                sources: raw.read_sources()?,
            })
        }
        AC_DESC_SUBTYPE_FEATURE_UNIT => {
            let id = FeatureUnitId(raw.read_nonzero_unit_id()?);
            let source = raw.read_nonzero_source_id()?;
            let control_size = usize::from(raw.read_u8()?);
            if control_size == 0 {
                return io_err_res("feature unit bControlSize is 0");
            }
            let controls = match raw.split_last() {
                Some((_, controls)) => controls,
                None => return Err(io::ErrorKind::UnexpectedEof.into()),
            };
            if controls.is_empty() || controls.len() % control_size != 0 {
                return io_err_res(format!(
                    "feature unit bmaControls length {} is not a multiple of bControlSize {}",
                    controls.len(),
                    control_size
                ));
            }
            AudioControlEntity::FeatureUnit(FeatureUnitDesc {
                id,
                source,
                controls: controls.chunks(control_size).map(<[u8]>::to_vec).collect(),
            })
        }
        AC_DESC_SUBTYPE_PROCESSING_UNIT => {
            let id = raw.read_nonzero_unit_id()?;
            let process_type = raw.read_u16::<LE>()?;
            let sources = raw.read_sources()?;
            let channels = raw.read_u8()?;
            let channel_config = raw.read_u16::<LE>()?;
            let _channel_names = raw.read_u8()?;
            let control_size = raw.read_u8()?;
            let controls = raw.read_bytes(control_size.into())?;
            let _string = raw.read_u8()?;
            AudioControlEntity::ProcessingUnit(AudioProcessingUnitDesc {
                id,
                process_type,
                sources,
                channels,
                channel_config,
                controls,
                specific: raw.to_vec(),
            })
        }
        AC_DESC_SUBTYPE_EXTENSION_UNIT => {
            let id = raw.read_nonzero_unit_id()?;
            let extension_code = raw.read_u16::<LE>()?;
            let sources = raw.read_sources()?;
            let channels = raw.read_u8()?;
            let channel_config = raw.read_u16::<LE>()?;
            let _channel_names = raw.read_u8()?;
            let control_size = raw.read_u8()?;
            AudioControlEntity::ExtensionUnit(AudioExtensionUnitDesc {
                id,
                extension_code,
                sources,
                channels,
                channel_config,
                controls: raw.read_bytes(control_size.into())?,
            })
        }
        AC_DESC_SUBTYPE_CLOCK_SOURCE => AudioControlEntity::ClockSource(ClockSourceDesc {
            id: raw.read_nonzero_clock_id()?,
            attributes: raw.read_u8()?,
            controls: raw.read_u8()?,
            assoc: TermId::new(raw.read_u8()?),
        }),
        AC_DESC_SUBTYPE_CLOCK_SELECTOR => {
            let id = raw.read_nonzero_clock_id()?;
            let num = raw.read_u8()?;
            let sources = (0..num)
                .map(|_| raw.read_nonzero_clock_id())
                .collect::<io::Result<_>>()?;
            AudioControlEntity::ClockSelector(ClockSelectorDesc {
                id,
                sources,
                controls: raw.read_u8()?,
            })
        }
        AC_DESC_SUBTYPE_CLOCK_MULTIPLIER => {
            AudioControlEntity::ClockMultiplier(ClockMultiplierDesc {
                id: raw.read_nonzero_clock_id()?,
                source: raw.read_nonzero_clock_id()?,
                controls: raw.read_u8()?,
            })
        }
        _ => AudioControlEntity::Unknown {
            subtype,
            payload: raw.to_vec(),
        },
    };

    Ok(entity)
}

fn parse_streaming_record(subtype: u8, mut raw: &[u8]) -> io::Result<AudioStreamingEntity> {
    let entity = match subtype {
        AS_DESC_SUBTYPE_GENERAL => AudioStreamingEntity::General(AsGeneralDesc {
            terminal_link: raw.read_nonzero_term_id()?,
            delay: raw.read_u8()?,
            format_tag: raw.read_u16::<LE>()?,
        }),
        AS_DESC_SUBTYPE_FORMAT_TYPE => {
            let format_type = raw.read_u8()?;
            let desc = match FormatType::from_raw(format_type) {
                Some(FormatType::TypeI) | Some(FormatType::TypeIII) => {
                    let channels = raw.read_u8()?;
                    let subframe_size = raw.read_u8()?;
                    let bit_resolution = raw.read_u8()?;
                    FormatTypeDesc {
                        format_type,
                        channels,
                        subframe_size,
                        bit_resolution,
                        max_bit_rate: 0,
                        samples_per_frame: 0,
                        sample_rates: read_sample_rates(&mut raw)?,
                    }
                }
                Some(FormatType::TypeII) => {
                    let max_bit_rate = raw.read_u16::<LE>()?;
                    let samples_per_frame = raw.read_u16::<LE>()?;
                    FormatTypeDesc {
                        format_type,
                        channels: 0,
                        subframe_size: 0,
                        bit_resolution: 0,
                        max_bit_rate,
                        samples_per_frame,
                        sample_rates: read_sample_rates(&mut raw)?,
                    }
                }
                None => return io_err_res(format!("unknown bFormatType {}", format_type)),
            };
            AudioStreamingEntity::FormatType(desc)
        }
        _ => AudioStreamingEntity::Unknown {
            subtype,
            payload: raw.to_vec(),
        },
    };

    Ok(entity)
}

fn parse_endpoint_record(subtype: u8, mut raw: &[u8]) -> io::Result<AudioStreamingEntity> {
    match subtype {
        EP_DESC_SUBTYPE_GENERAL => Ok(AudioStreamingEntity::EndpointGeneral(AsEndpointDesc {
            attributes: raw.read_u8()?,
            lock_delay_units: raw.read_u8()?,
            lock_delay: raw.read_u16::<LE>()?,
        })),
        _ => Ok(AudioStreamingEntity::Unknown {
            subtype,
            payload: raw.to_vec(),
        }),
    }
}

/// `bSamFreqType` followed by either a 3-byte lower/upper bound (0) or that many 3-byte
/// frequencies.
fn read_sample_rates(raw: &mut &[u8]) -> io::Result<SampleRates> {
    let count = raw.read_u8()?;
    if count == 0 {
        let min = raw.read_u24_le()?;
        let max = raw.read_u24_le()?;
        if min > max {
            return io_err_res(format!(
                "continuous sampling frequency range {}..{} is inverted",
                min, max
            ));
        }
        Ok(SampleRates::Continuous { min, max })
    } else {
        let rates = (0..count)
            .map(|_| raw.read_u24_le())
            .collect::<io::Result<_>>()?;
        Ok(SampleRates::Discrete(rates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ConfigurationView, descriptor::CS_ENDPOINT, testutil};

    fn record(subtype: u8, payload: &[u8]) -> ClassSpecificRecord {
        ClassSpecificRecord::new(crate::descriptor::CS_INTERFACE, subtype, payload.to_vec())
    }

    #[test]
    fn microphone_control_interface() {
        testutil::init_logger();
        let config = ConfigurationView::parse(&testutil::microphone_config()).unwrap();
        let alt = config.interface(0).unwrap().first_alt_setting();
        let topo = parse_control_interface(alt).unwrap();

        assert_eq!(topo.header().adc_version(), BcdVersion(0x0100));
        assert_eq!(topo.header().streaming_interfaces(), &[1]);

        let it = topo.input_terminals().next().unwrap();
        assert_eq!(it.id().as_raw(), 1);
        assert_eq!(it.terminal_type(), 0x0201);
        assert_eq!(it.channels(), 2);
        assert_eq!(it.channel_config(), 0x0003);

        let fu = topo.feature_units().next().unwrap();
        assert_eq!(fu.id().as_raw(), 2);
        assert_eq!(fu.source().as_raw(), 1);
        assert_eq!(fu.num_channels(), 2);
        // master: mute + volume, channels: volume only
        assert!(fu.supports_bit(0, 0));
        assert!(fu.supports_bit(0, 1));
        assert!(!fu.supports_bit(1, 0));
        assert!(fu.supports_bit(1, 1));
        assert!(fu.supports_bit(2, 1));
        assert!(!fu.supports_bit(3, 1));

        let ot = topo.output_terminals().next().unwrap();
        assert_eq!(ot.id().as_raw(), 3);
        assert_eq!(ot.source().as_raw(), 2);
    }

    #[test]
    fn microphone_streaming_interface() {
        let config = ConfigurationView::parse(&testutil::microphone_config()).unwrap();
        let desc = parse_streaming_interface(config.interface(1).unwrap()).unwrap();
        assert_eq!(desc.interface_number(), 1);
        assert_eq!(desc.alt_settings().len(), 1);

        let alt = desc.alt_setting(1).unwrap();
        assert_eq!(alt.general().terminal_link().as_raw(), 3);
        assert_eq!(alt.general().format_tag(), Some(FormatTag::Pcm));
        assert_eq!(alt.format_type().format_type(), Some(FormatType::TypeI));
        assert_eq!(alt.format_type().channels(), 2);
        assert_eq!(alt.format_type().subframe_size(), 2);
        assert_eq!(alt.format_type().bit_resolution(), 16);
        assert_eq!(
            alt.format_type().sample_rates(),
            &SampleRates::Discrete(vec![44_100, 48_000])
        );
        assert_eq!(alt.endpoint_address(), 0x84);
        assert_eq!(alt.max_packet_size(), 192);
        assert!(alt
            .endpoint_general()
            .unwrap()
            .sampling_frequency_control());

        assert!(desc.alt_setting(0).is_err());

        let format = alt.audio_format(48_000);
        assert_eq!(
            format,
            AudioFormat {
                channels: 2,
                sample_rate_hz: 48_000,
                bits_per_sample: 16,
                format_type: 1,
                format_tag: 1,
            }
        );
    }

    #[test]
    fn continuous_sample_rates() {
        let entity = parse_audio_streaming(&record(
            AS_DESC_SUBTYPE_FORMAT_TYPE,
            &[0x01, 0x01, 0x03, 0x18, 0x00, 0x40, 0x1F, 0x00, 0x00, 0x77, 0x01],
        ))
        .unwrap();
        match entity {
            AudioStreamingEntity::FormatType(f) => {
                assert_eq!(f.bit_resolution(), 24);
                assert_eq!(
                    f.sample_rates(),
                    &SampleRates::Continuous {
                        min: 8_000,
                        max: 96_000
                    }
                );
                assert!(f.sample_rates().contains(44_100));
                assert!(!f.sample_rates().contains(192_000));
            }
            e => panic!("unexpected entity {:?}", e),
        }
    }

    #[test]
    fn type_ii_format() {
        let entity = parse_audio_streaming(&record(
            AS_DESC_SUBTYPE_FORMAT_TYPE,
            &[0x02, 0x80, 0x01, 0x00, 0x06, 0x01, 0x80, 0xBB, 0x00],
        ))
        .unwrap();
        match entity {
            AudioStreamingEntity::FormatType(f) => {
                assert_eq!(f.format_type(), Some(FormatType::TypeII));
                assert_eq!(f.max_bit_rate(), 384);
                assert_eq!(f.samples_per_frame(), 1536);
                assert_eq!(f.sample_rates().max(), Some(48_000));
            }
            e => panic!("unexpected entity {:?}", e),
        }
    }

    #[test]
    fn feature_unit_with_wide_controls() {
        let entity = parse_audio_control(&record(
            AC_DESC_SUBTYPE_FEATURE_UNIT,
            &[0x05, 0x04, 0x02, 0x01, 0x02, 0x02, 0x00, 0x00],
        ))
        .unwrap();
        match entity {
            AudioControlEntity::FeatureUnit(fu) => {
                assert_eq!(fu.num_channels(), 1);
                assert!(fu.supports_bit(0, 0));
                assert!(fu.supports_bit(0, 9));
                assert!(fu.supports_bit(1, 1));
                assert!(!fu.supports_bit(1, 9));
            }
            e => panic!("unexpected entity {:?}", e),
        }
    }

    #[test]
    fn feature_unit_errors() {
        let err = parse_audio_control(&record(
            AC_DESC_SUBTYPE_FEATURE_UNIT,
            &[0x05, 0x04, 0x00, 0x00],
        ))
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDescriptor(_)));

        let err = parse_audio_control(&record(
            AC_DESC_SUBTYPE_FEATURE_UNIT,
            &[0x05, 0x04, 0x02, 0x01, 0x02, 0x02, 0x00],
        ))
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDescriptor(_)));

        let err = parse_audio_control(&record(AC_DESC_SUBTYPE_FEATURE_UNIT, &[0x05, 0x04]))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ShortBuffer));
    }

    #[test]
    fn clock_entities() {
        let source = parse_audio_control(&record(
            AC_DESC_SUBTYPE_CLOCK_SOURCE,
            &[0x10, 0x03, 0x07, 0x00, 0x00],
        ))
        .unwrap();
        match source {
            AudioControlEntity::ClockSource(c) => {
                assert_eq!(c.id().as_raw(), 0x10);
                assert_eq!(c.clock_type(), ClockType::InternalProgrammable);
                assert!(!c.synced_to_sof());
                assert_eq!(c.frequency_control(), ControlAccess::ReadWrite);
                assert_eq!(c.validity_control(), ControlAccess::ReadOnly);
                assert_eq!(c.associated_terminal(), None);
            }
            e => panic!("unexpected entity {:?}", e),
        }

        let selector = parse_audio_control(&record(
            AC_DESC_SUBTYPE_CLOCK_SELECTOR,
            &[0x11, 0x02, 0x10, 0x12, 0x03, 0x00],
        ))
        .unwrap();
        match selector {
            AudioControlEntity::ClockSelector(c) => {
                let sources: Vec<_> = c.sources().iter().map(|s| s.as_raw()).collect();
                assert_eq!(sources, [0x10, 0x12]);
                assert_eq!(c.selector_control(), ControlAccess::ReadWrite);
            }
            e => panic!("unexpected entity {:?}", e),
        }

        let err = parse_audio_control(&record(
            AC_DESC_SUBTYPE_CLOCK_MULTIPLIER,
            &[0x12, 0x00, 0x00, 0x00],
        ))
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDescriptor(_)));
    }

    #[test]
    fn uac2_header() {
        let entity = parse_audio_control(&record(
            AC_DESC_SUBTYPE_HEADER,
            &[0x00, 0x02, 0x08, 0x40, 0x00, 0x00],
        ))
        .unwrap();
        match entity {
            AudioControlEntity::Header(h) => {
                assert_eq!(h.category(), Some(0x08));
                assert_eq!(h.total_len(), 0x40);
                assert!(h.streaming_interfaces().is_empty());
            }
            e => panic!("unexpected entity {:?}", e),
        }
    }

    #[test]
    fn endpoint_general() {
        let entity = parse_audio_streaming(&ClassSpecificRecord::new(
            CS_ENDPOINT,
            EP_DESC_SUBTYPE_GENERAL,
            vec![0x81, 0x02, 0x10, 0x00],
        ))
        .unwrap();
        match entity {
            AudioStreamingEntity::EndpointGeneral(ep) => {
                assert!(ep.sampling_frequency_control());
                assert!(!ep.pitch_control());
                assert!(ep.max_packets_only());
                assert_eq!(ep.lock_delay(), (2, 16));
            }
            e => panic!("unexpected entity {:?}", e),
        }
    }

    #[test]
    fn missing_header_is_invalid() {
        let entities = vec![AudioControlEntity::Unknown {
            subtype: 0x09,
            payload: Vec::new(),
        }];
        assert!(AudioTopology::from_entities(entities).is_err());
    }
}

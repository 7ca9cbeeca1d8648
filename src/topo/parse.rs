use std::io;

use byteorder::{ReadBytesExt, LE};

use crate::{
    config::AltSetting,
    descriptor::{parse_interface_extras, ClassSpecificRecord},
    error::*,
    util::{io_err, BcdVersion, BytesExt},
    Result,
};

use super::*;

const CONTROL_DESC_SUBTYPE_HEADER: u8 = 0x01;
const CONTROL_DESC_SUBTYPE_INPUT_TERM: u8 = 0x02;
const CONTROL_DESC_SUBTYPE_OUTPUT_TERMINAL: u8 = 0x03;
const CONTROL_DESC_SUBTYPE_SELECTOR_UNIT: u8 = 0x04;
const CONTROL_DESC_SUBTYPE_PROCESSING_UNIT: u8 = 0x05;
const CONTROL_DESC_SUBTYPE_EXTENSION_UNIT: u8 = 0x06;
const CONTROL_DESC_SUBTYPE_ENCODING_UNIT: u8 = 0x07;

const ENDPOINT_DESC_SUBTYPE_INTERRUPT: u8 = 0x03;

/// Decodes one class-specific record of a Video Control interface.
///
/// Records with a subtype we don't know are returned as [`VideoControlEntity::Unknown`].
pub fn parse_video_control(record: &ClassSpecificRecord) -> Result<VideoControlEntity> {
    let res = if record.is_endpoint() {
        parse_endpoint_record(record.subtype(), record.payload())
    } else {
        parse_interface_record(record.subtype(), record.payload())
    };
    res.during(Action::ParsingDescriptors)
}

/// Parses the class-specific descriptors of a Video Control interface into a [`Topology`].
pub(crate) fn parse_control_interface(
    alt: &AltSetting,
) -> Result<(Topology, Option<InterruptEndpointDesc>)> {
    let mut entities = Vec::new();
    for record in parse_interface_extras(alt.extra())? {
        let entity = parse_video_control(&record)?;
        log::debug!("VC entity: {:?}", entity);
        entities.push(entity);
    }

    let mut interrupt_ep = None;
    for ep in alt.endpoints() {
        for record in parse_interface_extras(ep.extra())? {
            if let VideoControlEntity::InterruptEndpoint(desc) = parse_video_control(&record)? {
                interrupt_ep = Some(desc);
            }
        }
    }

    let topo = Topology::from_entities(entities).map_err(|msg| {
        Error::with_action(ErrorKind::InvalidDescriptor(msg), Action::ParsingDescriptors)
    })?;
    Ok((topo, interrupt_ep))
}

fn parse_endpoint_record(subtype: u8, mut raw: &[u8]) -> io::Result<VideoControlEntity> {
    match subtype {
        ENDPOINT_DESC_SUBTYPE_INTERRUPT => Ok(VideoControlEntity::InterruptEndpoint(
            InterruptEndpointDesc {
                max_transfer_size: raw.read_u16::<LE>()?,
            },
        )),
        _ => Ok(VideoControlEntity::Unknown {
            subtype,
            payload: raw.to_vec(),
        }),
    }
}

fn parse_interface_record(subtype: u8, mut raw: &[u8]) -> io::Result<VideoControlEntity> {
    let entity = match subtype {
        CONTROL_DESC_SUBTYPE_HEADER => {
            let uvc_version = BcdVersion(raw.read_u16::<LE>()?);
            let total_len = raw.read_u16::<LE>()?;
            // Everything past `wTotalLength` is treated as optional when the record ends there;
            // a record that ends in the middle of a field is still an error.
            let clock_freq_hz = if raw.is_empty() {
                0
            } else {
                raw.read_u32::<LE>()?
            };
            let streaming_interfaces = if raw.is_empty() {
                Vec::new()
            } else {
                let count = raw.read_u8()?;
                raw.read_bytes(count.into())?
            };

            VideoControlEntity::Header(ControlHeader {
                uvc_version,
                total_len,
                clock_freq_hz,
                streaming_interfaces,
            })
        }
        CONTROL_DESC_SUBTYPE_INPUT_TERM => {
            let mut term = InputTerminalDesc {
                term_id: raw.read_nonzero_term_id()?,
                term_type: raw.read_u16::<LE>()?,
                assoc: TermId::new(raw.read_u8()?),
                string: raw.read_u8()?,
                kind: InputTerminalKind::Other,
            };
            if term.terminal_type() == Some(InputTerminalType::InCamera) {
                let objective_focal_length_min = raw.read_u16::<LE>()?;
                let objective_focal_length_max = raw.read_u16::<LE>()?;
                let ocular_focal_length = raw.read_u16::<LE>()?;
                let size = raw.read_u8()?;
                let controls_raw = raw.read_bytes(size.into())?;
                term.kind = InputTerminalKind::Camera(CameraTerminalDesc {
                    id: CameraId(term.term_id),
                    objective_focal_length_min,
                    objective_focal_length_max,
                    ocular_focal_length,
                    controls: CameraControls::from_bits_truncate(
                        (&controls_raw[..]).read_bitmask(size)?,
                    ),
                    controls_raw,
                });
            }

            VideoControlEntity::InputTerminal(term)
        }
        CONTROL_DESC_SUBTYPE_OUTPUT_TERMINAL => {
            VideoControlEntity::OutputTerminal(OutputTerminalDesc {
                term_id: raw.read_nonzero_term_id()?,
                term_type: raw.read_u16::<LE>()?,
                assoc: TermId::new(raw.read_u8()?),
                source: raw.read_nonzero_source_id()?,
                string: raw.read_u8()?,
            })
        }
        CONTROL_DESC_SUBTYPE_SELECTOR_UNIT => VideoControlEntity::SelectorUnit(SelectorUnitDesc {
            id: SelectorUnitId(raw.read_nonzero_unit_id()?),
            inputs: {
                let num = raw.read_u8()?;
                (0..num)
                    .map(|_| raw.read_nonzero_source_id())
                    .collect::<io::Result<Vec<_>>>()?
            },
        }),
        CONTROL_DESC_SUBTYPE_PROCESSING_UNIT => {
            let id = ProcessingUnitId(raw.read_nonzero_unit_id()?);
            let source = raw.read_nonzero_source_id()?;
            let max_multiplier = raw.read_u16::<LE>()?;
            let size = raw.read_u8()?;
            let controls_raw = raw.read_bytes(size.into())?;
            let string = raw.read_u8()?;
            // `bmVideoStandards` was added in UVC 1.1.
            let standards = if raw.is_empty() {
                None
            } else {
                Some(VideoStandards::from_bits_truncate(raw.read_u8()?))
            };

            VideoControlEntity::ProcessingUnit(ProcessingUnitDesc {
                id,
                source,
                max_multiplier,
                controls: ProcessingUnitControls::from_bits_truncate(
                    (&controls_raw[..]).read_bitmask(size)?,
                ),
                controls_raw,
                string,
                standards,
            })
        }
        CONTROL_DESC_SUBTYPE_EXTENSION_UNIT => {
            VideoControlEntity::ExtensionUnit(ExtensionUnitDesc {
                id: ExtensionUnitId(raw.read_nonzero_unit_id()?),
                extension_code: raw.read_guid()?,
                num_controls: raw.read_u8()?,
                inputs: {
                    let count = raw.read_u8()?;
                    (0..count)
                        .map(|_| raw.read_nonzero_source_id())
                        .collect::<io::Result<Vec<_>>>()?
                },
                controls_bitmap: {
                    let size = raw.read_u8()?;
                    raw.read_bytes(size.into())?
                },
            })
        }
        CONTROL_DESC_SUBTYPE_ENCODING_UNIT => {
            let id = EncodingUnitId(raw.read_nonzero_unit_id()?);
            let source = raw.read_nonzero_source_id()?;
            let string = raw.read_u8()?;
            let size = raw.read_u8()?;
            if size == 0 {
                return Err(io_err("encoding unit declares an empty bmControls"));
            }
            VideoControlEntity::EncodingUnit(EncodingUnitDesc {
                id,
                source,
                string,
                controls: EncodingUnitControls::from_bits_truncate(raw.read_bitmask(size)?),
                controls_runtime: EncodingUnitControls::from_bits_truncate(
                    raw.read_bitmask(size)?,
                ),
            })
        }
        _ => {
            log::warn!("unknown VC descriptor subtype {:#04x}", subtype);
            VideoControlEntity::Unknown {
                subtype,
                payload: raw.to_vec(),
            }
        }
    };

    if !raw.is_empty() {
        log::trace!(
            "{} trailing bytes after VC descriptor subtype {:#04x}",
            raw.len(),
            subtype
        );
    }

    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse_interface_extras;

    fn parse_one(raw: &[u8]) -> Result<VideoControlEntity> {
        let records = parse_interface_extras(raw)?;
        assert_eq!(records.len(), 1);
        parse_video_control(&records[0])
    }

    #[test]
    fn minimal_header() {
        let entity = parse_one(&[0x07, 0x24, 0x01, 0x00, 0x01, 0x0D, 0x00]).unwrap();
        match entity {
            VideoControlEntity::Header(h) => {
                assert_eq!(h.uvc_version().raw(), 0x0100);
                assert_eq!(h.total_len(), 0x000D);
                assert!(h.streaming_interfaces().is_empty());
            }
            e => panic!("unexpected entity {:?}", e),
        }
    }

    #[test]
    fn header_with_interfaces() {
        let entity = parse_one(&[
            0x0D, 0x24, 0x01, 0x10, 0x01, 0x4D, 0x00, 0x80, 0x8D, 0x5B, 0x00, 0x01, 0x01,
        ])
        .unwrap();
        match entity {
            VideoControlEntity::Header(h) => {
                assert_eq!(h.uvc_version(), BcdVersion::UVC_1_1);
                assert_eq!(h.clock_freq_hz(), 6_000_000);
                assert_eq!(h.streaming_interfaces(), &[1]);
            }
            e => panic!("unexpected entity {:?}", e),
        }
    }

    #[test]
    fn header_cut_inside_clock_field() {
        let err = parse_one(&[0x09, 0x24, 0x01, 0x00, 0x01, 0x0D, 0x00, 0x80, 0x8D]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ShortBuffer));
    }

    #[test]
    fn camera_terminal() {
        let entity = parse_one(&[
            0x12, 0x24, 0x02, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x03, 0x0A, 0x00, 0x02,
        ])
        .unwrap();
        let term = match entity {
            VideoControlEntity::InputTerminal(t) => t,
            e => panic!("unexpected entity {:?}", e),
        };
        assert_eq!(term.terminal_type(), Some(InputTerminalType::InCamera));
        let cam = term.as_camera_desc().unwrap();
        assert_eq!(cam.id().as_raw(), 1);
        assert!(cam.controls().contains(CameraControls::AUTO_EXPOSURE_MODE));
        assert!(cam.controls().contains(CameraControls::EXPOSURE_TIME_ABS));
        assert!(cam.controls().contains(CameraControls::FOCUS_AUTO));
        assert!(cam.supports_bit(17));
        assert!(!cam.supports_bit(21));
        assert!(!cam.supports_bit(30));
    }

    #[test]
    fn uvc10_processing_unit_has_no_standards() {
        let entity = parse_one(&[
            0x0B, 0x24, 0x05, 0x02, 0x01, 0x00, 0x40, 0x02, 0x7F, 0x05, 0x00,
        ])
        .unwrap();
        let pu = match entity {
            VideoControlEntity::ProcessingUnit(pu) => pu,
            e => panic!("unexpected entity {:?}", e),
        };
        assert_eq!(pu.id().as_raw(), 2);
        assert_eq!(pu.max_multiplier(), 0x4000);
        assert!(pu.controls().contains(ProcessingUnitControls::BRIGHTNESS));
        assert!(pu.controls().contains(ProcessingUnitControls::POWER_LINE_FREQUENCY));
        assert!(pu.standards().is_none());
        assert!(!pu.supports_bit(18));
    }

    #[test]
    fn processing_unit_with_standards() {
        let entity = parse_one(&[
            0x0D, 0x24, 0x05, 0x02, 0x01, 0x00, 0x00, 0x03, 0x00, 0x08, 0x04, 0x00, 0x03,
        ])
        .unwrap();
        let pu = match entity {
            VideoControlEntity::ProcessingUnit(pu) => pu,
            e => panic!("unexpected entity {:?}", e),
        };
        assert!(pu.controls().contains(ProcessingUnitControls::HUE_AUTO));
        assert!(pu.controls().contains(ProcessingUnitControls::CONTRAST_AUTO));
        assert_eq!(
            pu.standards(),
            Some(VideoStandards::NONE | VideoStandards::NTSC_525_60)
        );
    }

    #[test]
    fn extension_unit() {
        let mut raw = vec![0x00, 0x24, 0x06, 0x04];
        raw.extend_from_slice(&[
            0x59, 0x55, 0x59, 0x32, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38,
            0x9B, 0x71,
        ]);
        raw.extend_from_slice(&[0x08, 0x01, 0x02, 0x02, 0xFF, 0x00, 0x00]);
        raw[0] = raw.len() as u8;
        let xu = match parse_one(&raw).unwrap() {
            VideoControlEntity::ExtensionUnit(xu) => xu,
            e => panic!("unexpected entity {:?}", e),
        };
        assert_eq!(
            xu.extension_code(),
            Uuid::parse_str("32595559-0000-0010-8000-00aa00389b71").unwrap()
        );
        assert_eq!(xu.num_controls(), 8);
        assert_eq!(xu.inputs().len(), 1);
        assert_eq!(xu.controls_bitmap(), &[0xFF, 0x00]);
    }

    #[test]
    fn encoding_unit() {
        let entity = parse_one(&[
            0x0D, 0x24, 0x07, 0x05, 0x02, 0x00, 0x03, 0x05, 0x00, 0x00, 0x01, 0x00, 0x00,
        ])
        .unwrap();
        let eu = match entity {
            VideoControlEntity::EncodingUnit(eu) => eu,
            e => panic!("unexpected entity {:?}", e),
        };
        assert!(eu.controls().contains(EncodingUnitControls::SELECT_LAYER));
        assert!(eu.controls().contains(EncodingUnitControls::VIDEO_RESOLUTION));
        assert_eq!(eu.controls_runtime(), EncodingUnitControls::SELECT_LAYER);
    }

    #[test]
    fn unknown_subtype_is_preserved() {
        let entity = parse_one(&[0x05, 0x24, 0x42, 0xAB, 0xCD]).unwrap();
        match entity {
            VideoControlEntity::Unknown { subtype, payload } => {
                assert_eq!(subtype, 0x42);
                assert_eq!(payload, vec![0xAB, 0xCD]);
            }
            e => panic!("unexpected entity {:?}", e),
        }
    }

    #[test]
    fn zero_terminal_id_is_invalid() {
        let err = parse_one(&[0x08, 0x24, 0x02, 0x00, 0x01, 0x01, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDescriptor(_)));
    }

    #[test]
    fn interrupt_endpoint() {
        let entity = parse_one(&[0x05, 0x25, 0x03, 0x40, 0x00]).unwrap();
        match entity {
            VideoControlEntity::InterruptEndpoint(ep) => assert_eq!(ep.max_transfer_size, 64),
            e => panic!("unexpected entity {:?}", e),
        }
    }
}

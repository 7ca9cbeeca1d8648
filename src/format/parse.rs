use std::io;

use byteorder::{ReadBytesExt, LE};

use crate::{
    config::AltSetting,
    descriptor::{parse_interface_extras, ClassSpecificRecord},
    error::*,
    util::{io_err_res, BytesExt},
    Result,
};

use super::*;

const STREAM_DESC_SUBTYPE_INPUT_HEADER: u8 = 0x01;
const STREAM_DESC_SUBTYPE_OUTPUT_HEADER: u8 = 0x02;
const STREAM_DESC_SUBTYPE_STILL_IMAGE_FRAME: u8 = 0x03;
const STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED: u8 = 0x04;
const STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED: u8 = 0x05;
const STREAM_DESC_SUBTYPE_FORMAT_MJPEG: u8 = 0x06;
const STREAM_DESC_SUBTYPE_FRAME_MJPEG: u8 = 0x07;
const STREAM_DESC_SUBTYPE_FORMAT_MPEG2TS: u8 = 0x0A;
const STREAM_DESC_SUBTYPE_FORMAT_DV: u8 = 0x0C;
const STREAM_DESC_SUBTYPE_COLORFORMAT: u8 = 0x0D;
const STREAM_DESC_SUBTYPE_FORMAT_FRAME_BASED: u8 = 0x10;
const STREAM_DESC_SUBTYPE_FRAME_FRAME_BASED: u8 = 0x11;
const STREAM_DESC_SUBTYPE_FORMAT_STREAM_BASED: u8 = 0x12;
const STREAM_DESC_SUBTYPE_FORMAT_H264: u8 = 0x13;
const STREAM_DESC_SUBTYPE_FRAME_H264: u8 = 0x14;
const STREAM_DESC_SUBTYPE_FORMAT_H264_SIMULCAST: u8 = 0x15;
const STREAM_DESC_SUBTYPE_FORMAT_VP8: u8 = 0x16;
const STREAM_DESC_SUBTYPE_FRAME_VP8: u8 = 0x17;
const STREAM_DESC_SUBTYPE_FORMAT_VP8_SIMULCAST: u8 = 0x18;

/// Decodes one class-specific record of a Video Streaming interface.
pub fn parse_video_streaming(record: &ClassSpecificRecord) -> Result<VideoStreamingEntity> {
    if !record.is_interface() {
        return Ok(VideoStreamingEntity::Unknown {
            subtype: record.subtype(),
            payload: record.payload().to_vec(),
        });
    }
    parse_streaming_record(record.subtype(), record.payload()).during(Action::ParsingDescriptors)
}

/// Parses the class-specific descriptors of a Video Streaming interface (found on its first
/// alternate setting).
pub(crate) fn parse_streaming_interface(alt: &AltSetting) -> Result<StreamingInterfaceDesc> {
    let mut entities = Vec::new();
    for record in parse_interface_extras(alt.extra())? {
        let entity = parse_video_streaming(&record)?;
        log::debug!("VS entity: {:?}", entity);
        entities.push(entity);
    }

    StreamingInterfaceDesc::from_entities(StreamingInterfaceId(alt.interface_number()), entities)
        .map_err(|msg| {
            Error::with_action(ErrorKind::InvalidDescriptor(msg), Action::ParsingDescriptors)
        })
}

fn parse_streaming_record(subtype: u8, mut raw: &[u8]) -> io::Result<VideoStreamingEntity> {
    let entity = match subtype {
        STREAM_DESC_SUBTYPE_INPUT_HEADER => {
            let num_formats = raw.read_u8()?;
            VideoStreamingEntity::InputHeader(InputHeader {
                num_formats,
                total_length: raw.read_u16::<LE>()?,
                endpoint_address: raw.read_u8()?,
                info: InputInterfaceInfo::from_bits_truncate(raw.read_u8()?),
                terminal_link: raw.read_nonzero_term_id()?,
                still_capture_method: {
                    let raw = raw.read_u8()?;
                    StillCaptureMethod::from_raw(raw).unwrap_or_else(|| {
                        log::warn!("invalid value {} for `bStillCaptureMethod`", raw);
                        StillCaptureMethod::None
                    })
                },
                trigger_support: {
                    let raw = raw.read_u8()?;
                    TriggerSupport::from_raw(raw).unwrap_or_else(|| {
                        log::warn!("invalid value {} for `bTriggerSupport`", raw);
                        TriggerSupport::NotSupported
                    })
                },
                trigger_usage: {
                    let raw = raw.read_u8()?;
                    TriggerUsage::from_raw(raw).unwrap_or_else(|| {
                        log::warn!("invalid value {} for `bTriggerUsage`", raw);
                        TriggerUsage::InitiateStillImageCapture
                    })
                },
                format_controls: read_format_controls(&mut raw, num_formats)?,
            })
        }
        STREAM_DESC_SUBTYPE_OUTPUT_HEADER => {
            let num_formats = raw.read_u8()?;
            VideoStreamingEntity::OutputHeader(OutputHeader {
                num_formats,
                total_length: raw.read_u16::<LE>()?,
                endpoint_address: raw.read_u8()?,
                terminal_link: raw.read_nonzero_term_id()?,
                format_controls: read_format_controls(&mut raw, num_formats)?,
            })
        }
        STREAM_DESC_SUBTYPE_STILL_IMAGE_FRAME => {
            VideoStreamingEntity::StillImageFrame(StillImageFrame {
                endpoint_address: raw.read_u8()?,
                image_sizes: {
                    let count = raw.read_u8()?;
                    (0..count)
                        .map(|_| -> io::Result<_> {
                            Ok((raw.read_u16::<LE>()?, raw.read_u16::<LE>()?))
                        })
                        .collect::<io::Result<Vec<_>>>()?
                },
                compression: {
                    let count = raw.read_u8()?;
                    raw.read_bytes(count.into())?
                },
            })
        }
        STREAM_DESC_SUBTYPE_COLORFORMAT => VideoStreamingEntity::ColorMatching(ColorMatching {
            color_primaries: raw.read_u8()?,
            transfer_characteristics: raw.read_u8()?,
            matrix_coefficients: raw.read_u8()?,
        }),
        STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED => {
            let index = FormatIndex(raw.read_u8()?);
            let num_frame_descriptors = raw.read_u8()?;
            format(
                index,
                num_frame_descriptors,
                FormatKind::Uncompressed(FormatUncompressed {
                    guid: raw.read_guid()?,
                    bits_per_pixel: raw.read_u8()?,
                    default_frame_index: FrameIndex(raw.read_u8()?),
                    aspect_ratio_x: raw.read_u8()?,
                    aspect_ratio_y: raw.read_u8()?,
                    interlace_flags: InterlaceFlags::from_bits_truncate(raw.read_u8()?),
                    copy_protect: raw.read_u8()?,
                }),
            )
        }
        STREAM_DESC_SUBTYPE_FORMAT_MJPEG => {
            let index = FormatIndex(raw.read_u8()?);
            let num_frame_descriptors = raw.read_u8()?;
            format(
                index,
                num_frame_descriptors,
                FormatKind::Mjpeg(FormatMjpeg {
                    flags: raw.read_u8()?,
                    default_frame_index: FrameIndex(raw.read_u8()?),
                    aspect_ratio_x: raw.read_u8()?,
                    aspect_ratio_y: raw.read_u8()?,
                    interlace_flags: InterlaceFlags::from_bits_truncate(raw.read_u8()?),
                    copy_protect: raw.read_u8()?,
                }),
            )
        }
        STREAM_DESC_SUBTYPE_FORMAT_MPEG2TS => {
            let index = FormatIndex(raw.read_u8()?);
            format(
                index,
                0,
                FormatKind::Mpeg2Ts(FormatMpeg2Ts {
                    data_offset: raw.read_u8()?,
                    packet_length: raw.read_u8()?,
                    stride_length: raw.read_u8()?,
                    stride_format: if raw.is_empty() {
                        None
                    } else {
                        Some(raw.read_guid()?)
                    },
                }),
            )
        }
        STREAM_DESC_SUBTYPE_FORMAT_DV => {
            let index = FormatIndex(raw.read_u8()?);
            format(
                index,
                0,
                FormatKind::Dv(FormatDv {
                    max_video_frame_buffer_size: raw.read_u32::<LE>()?,
                    format_type: raw.read_u8()?,
                }),
            )
        }
        STREAM_DESC_SUBTYPE_FORMAT_FRAME_BASED => {
            let index = FormatIndex(raw.read_u8()?);
            let num_frame_descriptors = raw.read_u8()?;
            format(
                index,
                num_frame_descriptors,
                FormatKind::FrameBased(FormatFrameBased {
                    guid: raw.read_guid()?,
                    bits_per_pixel: raw.read_u8()?,
                    default_frame_index: FrameIndex(raw.read_u8()?),
                    aspect_ratio_x: raw.read_u8()?,
                    aspect_ratio_y: raw.read_u8()?,
                    interlace_flags: InterlaceFlags::from_bits_truncate(raw.read_u8()?),
                    copy_protect: raw.read_u8()?,
                    variable_size: raw.read_u8()? != 0,
                }),
            )
        }
        STREAM_DESC_SUBTYPE_FORMAT_STREAM_BASED => {
            let index = FormatIndex(raw.read_u8()?);
            format(
                index,
                0,
                FormatKind::StreamBased(FormatStreamBased {
                    guid: raw.read_guid()?,
                    packet_length: raw.read_u32::<LE>()?,
                }),
            )
        }
        STREAM_DESC_SUBTYPE_FORMAT_H264 | STREAM_DESC_SUBTYPE_FORMAT_H264_SIMULCAST => {
            let index = FormatIndex(raw.read_u8()?);
            let num_frame_descriptors = raw.read_u8()?;
            let default_frame_index = FrameIndex(raw.read_u8()?);
            let max_codec_config_delay = raw.read_u8()?;
            let supported_slice_modes = raw.read_u8()?;
            let supported_sync_frame_types = raw.read_u8()?;
            let resolution_scaling = raw.read_u8()?;
            let _reserved = raw.read_u8()?;
            let supported_rate_control_modes = raw.read_u8()?;
            let mut max_mb_per_sec = Vec::with_capacity(raw.len() / 2);
            while raw.len() >= 2 {
                max_mb_per_sec.push(raw.read_u16::<LE>()?);
            }
            format(
                index,
                num_frame_descriptors,
                FormatKind::H264(FormatH264 {
                    default_frame_index,
                    max_codec_config_delay,
                    supported_slice_modes,
                    supported_sync_frame_types,
                    resolution_scaling,
                    supported_rate_control_modes,
                    max_mb_per_sec,
                    simulcast: subtype == STREAM_DESC_SUBTYPE_FORMAT_H264_SIMULCAST,
                }),
            )
        }
        STREAM_DESC_SUBTYPE_FORMAT_VP8 | STREAM_DESC_SUBTYPE_FORMAT_VP8_SIMULCAST => {
            let index = FormatIndex(raw.read_u8()?);
            let num_frame_descriptors = raw.read_u8()?;
            format(
                index,
                num_frame_descriptors,
                FormatKind::Vp8(FormatVp8 {
                    default_frame_index: FrameIndex(raw.read_u8()?),
                    max_codec_config_delay: raw.read_u8()?,
                    supported_partition_count: raw.read_u8()?,
                    supported_sync_frame_types: raw.read_u8()?,
                    resolution_scaling: raw.read_u8()?,
                    supported_rate_control_modes: raw.read_u8()?,
                    max_mb_per_sec: raw.read_u16::<LE>()?,
                    simulcast: subtype == STREAM_DESC_SUBTYPE_FORMAT_VP8_SIMULCAST,
                }),
            )
        }
        STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED | STREAM_DESC_SUBTYPE_FRAME_MJPEG => {
            let index = FrameIndex(raw.read_u8()?);
            let capabilities = FrameCapabilities::from_bits_truncate(raw.read_u8()?);
            let width = raw.read_u16::<LE>()?;
            let height = raw.read_u16::<LE>()?;
            let min_bit_rate = raw.read_u32::<LE>()?;
            let max_bit_rate = raw.read_u32::<LE>()?;
            let max_video_frame_buffer_size = Some(raw.read_u32::<LE>()?);
            let default_frame_interval = raw.read_time_100ns()?;
            let interval_type = raw.read_u8()?;
            VideoStreamingEntity::Frame(FrameDesc {
                index,
                capabilities,
                width,
                height,
                min_bit_rate,
                max_bit_rate,
                max_video_frame_buffer_size,
                default_frame_interval,
                frame_intervals: read_frame_intervals(&mut raw, interval_type)?,
                kind: if subtype == STREAM_DESC_SUBTYPE_FRAME_MJPEG {
                    FrameKind::Mjpeg
                } else {
                    FrameKind::Uncompressed
                },
            })
        }
        STREAM_DESC_SUBTYPE_FRAME_FRAME_BASED => {
            let index = FrameIndex(raw.read_u8()?);
            let capabilities = FrameCapabilities::from_bits_truncate(raw.read_u8()?);
            let width = raw.read_u16::<LE>()?;
            let height = raw.read_u16::<LE>()?;
            let min_bit_rate = raw.read_u32::<LE>()?;
            let max_bit_rate = raw.read_u32::<LE>()?;
            let default_frame_interval = raw.read_time_100ns()?;
            let interval_type = raw.read_u8()?;
            let bytes_per_line = raw.read_u32::<LE>()?;
            VideoStreamingEntity::Frame(FrameDesc {
                index,
                capabilities,
                width,
                height,
                min_bit_rate,
                max_bit_rate,
                max_video_frame_buffer_size: None,
                default_frame_interval,
                frame_intervals: read_frame_intervals(&mut raw, interval_type)?,
                kind: FrameKind::FrameBased { bytes_per_line },
            })
        }
        STREAM_DESC_SUBTYPE_FRAME_H264 => {
            let index = FrameIndex(raw.read_u8()?);
            let width = raw.read_u16::<LE>()?;
            let height = raw.read_u16::<LE>()?;
            let info = H264FrameInfo {
                sar_width: raw.read_u16::<LE>()?,
                sar_height: raw.read_u16::<LE>()?,
                profile: raw.read_u16::<LE>()?,
                level_idc: raw.read_u8()?,
                constrained_toolset: raw.read_u16::<LE>()?,
                supported_usages: raw.read_u32::<LE>()?,
                capabilities: raw.read_u16::<LE>()?,
                svc_capabilities: raw.read_u32::<LE>()?,
                mvc_capabilities: raw.read_u32::<LE>()?,
            };
            let min_bit_rate = raw.read_u32::<LE>()?;
            let max_bit_rate = raw.read_u32::<LE>()?;
            let default_frame_interval = raw.read_time_100ns()?;
            let count = raw.read_u8()?;
            VideoStreamingEntity::Frame(FrameDesc {
                index,
                capabilities: FrameCapabilities::empty(),
                width,
                height,
                min_bit_rate,
                max_bit_rate,
                max_video_frame_buffer_size: None,
                default_frame_interval,
                frame_intervals: read_discrete_intervals(&mut raw, count)?,
                kind: FrameKind::H264(info),
            })
        }
        STREAM_DESC_SUBTYPE_FRAME_VP8 => {
            let index = FrameIndex(raw.read_u8()?);
            let width = raw.read_u16::<LE>()?;
            let height = raw.read_u16::<LE>()?;
            let info = Vp8FrameInfo {
                supported_usages: raw.read_u32::<LE>()?,
                capabilities: raw.read_u16::<LE>()?,
                scalability_capabilities: raw.read_u32::<LE>()?,
            };
            let min_bit_rate = raw.read_u32::<LE>()?;
            let max_bit_rate = raw.read_u32::<LE>()?;
            let default_frame_interval = raw.read_time_100ns()?;
            let count = raw.read_u8()?;
            VideoStreamingEntity::Frame(FrameDesc {
                index,
                capabilities: FrameCapabilities::empty(),
                width,
                height,
                min_bit_rate,
                max_bit_rate,
                max_video_frame_buffer_size: None,
                default_frame_interval,
                frame_intervals: read_discrete_intervals(&mut raw, count)?,
                kind: FrameKind::Vp8(info),
            })
        }
        _ => {
            log::warn!("unknown VS descriptor subtype {:#04x}", subtype);
            VideoStreamingEntity::Unknown {
                subtype,
                payload: raw.to_vec(),
            }
        }
    };

    if !raw.is_empty() {
        log::trace!(
            "{} trailing bytes after VS descriptor subtype {:#04x}",
            raw.len(),
            subtype
        );
    }

    Ok(entity)
}

fn format(index: FormatIndex, num_frame_descriptors: u8, kind: FormatKind) -> VideoStreamingEntity {
    VideoStreamingEntity::Format(FormatDesc {
        index,
        num_frame_descriptors,
        kind,
        frames: Vec::new(),
        color_matching: None,
    })
}

/// `bControlSize` followed by `num_formats` bitmaps of that size.
fn read_format_controls(raw: &mut &[u8], num_formats: u8) -> io::Result<Vec<PerFormatControls>> {
    let control_size = raw.read_u8()?;
    (0..num_formats)
        .map(|_| {
            raw.read_bitmask(control_size)
                .map(PerFormatControls::from_bits_truncate)
        })
        .collect()
}

fn read_frame_intervals(raw: &mut &[u8], interval_type: u8) -> io::Result<SupportedFrameIntervals> {
    match interval_type {
        0 => Ok(SupportedFrameIntervals::Continuous {
            min_frame_interval: raw.read_time_100ns()?,
            max_frame_interval: raw.read_time_100ns()?,
            frame_interval_step: raw.read_time_100ns()?,
        }),
        n => read_discrete_intervals(raw, n),
    }
}

fn read_discrete_intervals(raw: &mut &[u8], count: u8) -> io::Result<SupportedFrameIntervals> {
    if count == 0 {
        return io_err_res("frame descriptor lists no frame intervals");
    }
    let mut supported_frame_intervals = Vec::with_capacity(count.into());
    for _ in 0..count {
        supported_frame_intervals.push(raw.read_time_100ns()?);
    }
    Ok(SupportedFrameIntervals::Discrete {
        supported_frame_intervals,
    })
}

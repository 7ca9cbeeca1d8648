//! Video Streaming interface descriptors: headers, formats and their frames.

pub(crate) mod parse;

use std::{fmt, time::Duration};

use bitflags::bitflags;
use uuid::Uuid;

use crate::{
    error::{Error, ErrorKind},
    topo::TermId,
    util::duration_to_100ns,
    Result,
};

/// Interface number of a Video Streaming interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingInterfaceId(pub(crate) u8);

impl StreamingInterfaceId {
    pub fn as_raw(self) -> u8 {
        self.0
    }
}

/// `bFormatIndex` of a format descriptor (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatIndex(pub(crate) u8);

impl FormatIndex {
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u8 {
        self.0
    }
}

/// `bFrameIndex` of a frame descriptor, relative to its format (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameIndex(pub(crate) u8);

impl FrameIndex {
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u8 {
        self.0
    }
}

/// A decoded Video Streaming interface descriptor.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum VideoStreamingEntity {
    InputHeader(InputHeader),
    OutputHeader(OutputHeader),
    StillImageFrame(StillImageFrame),
    ColorMatching(ColorMatching),
    /// A format descriptor. Its frame list is empty until it is grouped into a
    /// [`StreamingInterfaceDesc`].
    Format(FormatDesc),
    Frame(FrameDesc),
    Unknown { subtype: u8, payload: Vec<u8> },
}

/// A Video Streaming interface with its formats, each owning the frames that follow it.
#[derive(Debug, Clone)]
pub struct StreamingInterfaceDesc {
    id: StreamingInterfaceId,
    kind: StreamingInterfaceKind,
    formats: Vec<FormatDesc>,
    still_image_frames: Vec<StillImageFrame>,
}

impl StreamingInterfaceDesc {
    pub(crate) fn from_entities(
        id: StreamingInterfaceId,
        entities: impl IntoIterator<Item = VideoStreamingEntity>,
    ) -> std::result::Result<Self, String> {
        let mut in_header = None;
        let mut out_header = None;
        let mut formats: Vec<FormatDesc> = Vec::new();
        let mut still_image_frames = Vec::new();

        for entity in entities {
            match entity {
                VideoStreamingEntity::InputHeader(h) => {
                    if in_header.replace(h).is_some() {
                        return Err("duplicate input header descriptor".into());
                    }
                }
                VideoStreamingEntity::OutputHeader(h) => {
                    if out_header.replace(h).is_some() {
                        return Err("duplicate output header descriptor".into());
                    }
                }
                VideoStreamingEntity::Format(format) => {
                    if let Some(prev) = formats.last() {
                        prev.check_frame_count()?;
                    }
                    formats.push(format);
                }
                VideoStreamingEntity::Frame(frame) => {
                    let format = formats.last_mut().ok_or_else(|| {
                        format!("frame descriptor {} precedes any format", frame.index.0)
                    })?;
                    if !format.kind.accepts(&frame.kind) {
                        log::warn!(
                            "frame {} does not match the kind of format {}",
                            frame.index.0,
                            format.index.0
                        );
                    }
                    format.frames.push(frame);
                }
                VideoStreamingEntity::ColorMatching(cm) => match formats.last_mut() {
                    Some(format) => format.color_matching = Some(cm),
                    None => log::warn!("color matching descriptor precedes any format"),
                },
                VideoStreamingEntity::StillImageFrame(still) => still_image_frames.push(still),
                VideoStreamingEntity::Unknown { subtype, .. } => {
                    log::warn!("ignoring unknown VS descriptor subtype {:#04x}", subtype);
                }
            }
        }

        if let Some(last) = formats.last() {
            last.check_frame_count()?;
        }

        let kind = match (in_header, out_header) {
            (Some(input), None) => {
                if usize::from(input.num_formats) != formats.len() {
                    log::warn!(
                        "input header announces {} formats, found {}",
                        input.num_formats,
                        formats.len()
                    );
                }
                StreamingInterfaceKind::Input(input)
            }
            (None, Some(output)) => StreamingInterfaceKind::Output(output),
            (None, None) => return Err("missing header in Video Streaming interface".into()),
            (Some(_), Some(_)) => {
                return Err("Video Streaming interface has both input and output header".into())
            }
        };

        Ok(Self {
            id,
            kind,
            formats,
            still_image_frames,
        })
    }

    pub fn id(&self) -> StreamingInterfaceId {
        self.id
    }

    pub fn kind(&self) -> &StreamingInterfaceKind {
        &self.kind
    }

    pub fn formats(&self) -> &[FormatDesc] {
        &self.formats
    }

    pub fn still_image_frames(&self) -> &[StillImageFrame] {
        &self.still_image_frames
    }

    pub fn format_by_index(&self, index: FormatIndex) -> Result<&FormatDesc> {
        self.formats
            .iter()
            .find(|f| f.index == index)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("format {}", index.0))))
    }

    /// Looks up a frame descriptor of a format.
    pub fn frame(&self, format: FormatIndex, frame: FrameIndex) -> Result<&FrameDesc> {
        self.format_by_index(format)?
            .frame_by_index(frame)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound(format!(
                    "frame {} of format {}",
                    frame.0, format.0
                )))
            })
    }

    /// The isochronous or bulk endpoint carrying the video data.
    pub fn endpoint_address(&self) -> u8 {
        match &self.kind {
            StreamingInterfaceKind::Input(h) => h.endpoint_address,
            StreamingInterfaceKind::Output(h) => h.endpoint_address,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamingInterfaceKind {
    /// Device-to-host video (a camera).
    Input(InputHeader),
    /// Host-to-device video (a display).
    Output(OutputHeader),
}

#[derive(Debug, Clone)]
pub struct InputHeader {
    num_formats: u8,
    total_length: u16,
    endpoint_address: u8,
    info: InputInterfaceInfo,
    terminal_link: TermId,
    still_capture_method: StillCaptureMethod,
    trigger_support: TriggerSupport,
    trigger_usage: TriggerUsage,
    format_controls: Vec<PerFormatControls>,
}

impl InputHeader {
    pub fn num_formats(&self) -> u8 {
        self.num_formats
    }

    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    pub fn endpoint_address(&self) -> u8 {
        self.endpoint_address
    }

    pub fn info(&self) -> InputInterfaceInfo {
        self.info
    }

    /// The output terminal this interface is connected to.
    pub fn terminal_link(&self) -> TermId {
        self.terminal_link
    }

    pub fn still_capture_method(&self) -> StillCaptureMethod {
        self.still_capture_method
    }

    pub fn trigger_support(&self) -> TriggerSupport {
        self.trigger_support
    }

    pub fn trigger_usage(&self) -> TriggerUsage {
        self.trigger_usage
    }

    /// `bmaControls`, one entry per format.
    pub fn format_controls(&self) -> &[PerFormatControls] {
        &self.format_controls
    }
}

#[derive(Debug, Clone)]
pub struct OutputHeader {
    num_formats: u8,
    total_length: u16,
    endpoint_address: u8,
    terminal_link: TermId,
    format_controls: Vec<PerFormatControls>,
}

impl OutputHeader {
    pub fn num_formats(&self) -> u8 {
        self.num_formats
    }

    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    pub fn endpoint_address(&self) -> u8 {
        self.endpoint_address
    }

    pub fn terminal_link(&self) -> TermId {
        self.terminal_link
    }

    pub fn format_controls(&self) -> &[PerFormatControls] {
        &self.format_controls
    }
}

bitflags! {
    pub struct InputInterfaceInfo: u8 {
        const DYNAMIC_FORMAT_CHANGE_SUPPORTED = 1 << 0;
    }
}

primitive_enum! {
    pub enum StillCaptureMethod: u8 {
        None = 0,
        Method1 = 1,
        Method2 = 2,
        Method3 = 3,
    }
}

primitive_enum! {
    pub enum TriggerSupport: u8 {
        NotSupported = 0,
        Supported = 1,
    }
}

primitive_enum! {
    pub enum TriggerUsage: u8 {
        InitiateStillImageCapture = 0,
        GeneralPurposeButtonEvent = 1,
    }
}

bitflags! {
    pub struct PerFormatControls: u32 {
        const KEY_FRAME_RATE = 1 << 0;
        const P_FRAME_RATE = 1 << 1;
        const COMP_QUALITY = 1 << 2;
        const COMP_WINDOW_SIZE = 1 << 3;

        const GENERATE_KEY_FRAME = 1 << 4;
        const UPDATE_FRAME_SEGMENT = 1 << 5;
    }
}

/// `VS_STILL_IMAGE_FRAME`: still image sizes for capture methods 2 and 3.
#[derive(Debug, Clone)]
pub struct StillImageFrame {
    endpoint_address: u8,
    image_sizes: Vec<(u16, u16)>,
    compression: Vec<u8>,
}

impl StillImageFrame {
    /// Bulk endpoint for method 3, 0 otherwise.
    pub fn endpoint_address(&self) -> u8 {
        self.endpoint_address
    }

    /// Supported `(width, height)` pairs.
    pub fn image_sizes(&self) -> &[(u16, u16)] {
        &self.image_sizes
    }

    pub fn compression(&self) -> &[u8] {
        &self.compression
    }
}

/// `VS_COLORFORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMatching {
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

/// A four-character pixel format code, as used by the uncompressed and frame-based formats.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// Extracts the FourCC of a format GUID (its first field, in little-endian byte order).
    pub fn from_guid(guid: &Uuid) -> Self {
        Self(guid.as_fields().0.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc(\"{}\")", self)
    }
}

#[derive(Debug, Clone)]
pub struct FormatDesc {
    index: FormatIndex,
    num_frame_descriptors: u8,
    kind: FormatKind,
    frames: Vec<FrameDesc>,
    color_matching: Option<ColorMatching>,
}

impl FormatDesc {
    pub fn index(&self) -> FormatIndex {
        self.index
    }

    pub fn kind(&self) -> &FormatKind {
        &self.kind
    }

    pub fn frames(&self) -> &[FrameDesc] {
        &self.frames
    }

    pub fn frame_by_index(&self, index: FrameIndex) -> Option<&FrameDesc> {
        self.frames.iter().find(|f| f.index == index)
    }

    pub fn color_matching(&self) -> Option<&ColorMatching> {
        self.color_matching.as_ref()
    }

    /// `guidFormat`, for the formats that carry one.
    pub fn guid(&self) -> Option<Uuid> {
        match &self.kind {
            FormatKind::Uncompressed(f) => Some(f.guid),
            FormatKind::FrameBased(f) => Some(f.guid),
            FormatKind::StreamBased(f) => Some(f.guid),
            _ => None,
        }
    }

    pub fn fourcc(&self) -> Option<FourCc> {
        self.guid().map(|guid| FourCc::from_guid(&guid))
    }

    pub fn default_frame_index(&self) -> Option<FrameIndex> {
        match &self.kind {
            FormatKind::Uncompressed(f) => Some(f.default_frame_index),
            FormatKind::Mjpeg(f) => Some(f.default_frame_index),
            FormatKind::FrameBased(f) => Some(f.default_frame_index),
            FormatKind::H264(f) => Some(f.default_frame_index),
            FormatKind::Vp8(f) => Some(f.default_frame_index),
            _ => None,
        }
    }

    fn check_frame_count(&self) -> std::result::Result<(), String> {
        if self.frames.len() != usize::from(self.num_frame_descriptors) {
            return Err(format!(
                "format {} declares {} frame descriptors, but {} follow it",
                self.index.0,
                self.num_frame_descriptors,
                self.frames.len()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum FormatKind {
    Uncompressed(FormatUncompressed),
    Mjpeg(FormatMjpeg),
    Mpeg2Ts(FormatMpeg2Ts),
    Dv(FormatDv),
    FrameBased(FormatFrameBased),
    StreamBased(FormatStreamBased),
    H264(FormatH264),
    Vp8(FormatVp8),
}

impl FormatKind {
    fn accepts(&self, frame: &FrameKind) -> bool {
        matches!(
            (self, frame),
            (FormatKind::Uncompressed(_), FrameKind::Uncompressed)
                | (FormatKind::Mjpeg(_), FrameKind::Mjpeg)
                | (FormatKind::FrameBased(_), FrameKind::FrameBased { .. })
                | (FormatKind::H264(_), FrameKind::H264(_))
                | (FormatKind::Vp8(_), FrameKind::Vp8(_))
        )
    }
}

#[derive(Debug, Clone)]
pub struct FormatUncompressed {
    pub guid: Uuid,
    pub bits_per_pixel: u8,
    pub default_frame_index: FrameIndex,
    pub aspect_ratio_x: u8,
    pub aspect_ratio_y: u8,
    pub interlace_flags: InterlaceFlags,
    pub copy_protect: u8,
}

#[derive(Debug, Clone)]
pub struct FormatMjpeg {
    /// `bmFlags`; bit 0 is "fixed size samples".
    pub flags: u8,
    pub default_frame_index: FrameIndex,
    pub aspect_ratio_x: u8,
    pub aspect_ratio_y: u8,
    pub interlace_flags: InterlaceFlags,
    pub copy_protect: u8,
}

#[derive(Debug, Clone)]
pub struct FormatMpeg2Ts {
    pub data_offset: u8,
    pub packet_length: u8,
    pub stride_length: u8,
    /// `guidStrideFormat`, added in UVC 1.1.
    pub stride_format: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct FormatDv {
    pub max_video_frame_buffer_size: u32,
    /// `bFormatType`: 0 = SD-DV, 1 = SDL-DV, 2 = HD-DV; bit 7 set for 60 Hz.
    pub format_type: u8,
}

#[derive(Debug, Clone)]
pub struct FormatFrameBased {
    pub guid: Uuid,
    pub bits_per_pixel: u8,
    pub default_frame_index: FrameIndex,
    pub aspect_ratio_x: u8,
    pub aspect_ratio_y: u8,
    pub interlace_flags: InterlaceFlags,
    pub copy_protect: u8,
    pub variable_size: bool,
}

#[derive(Debug, Clone)]
pub struct FormatStreamBased {
    pub guid: Uuid,
    pub packet_length: u32,
}

#[derive(Debug, Clone)]
pub struct FormatH264 {
    pub default_frame_index: FrameIndex,
    pub max_codec_config_delay: u8,
    pub supported_slice_modes: u8,
    pub supported_sync_frame_types: u8,
    pub resolution_scaling: u8,
    pub supported_rate_control_modes: u8,
    /// The `wMaxMBperSec*` fields, in descriptor order.
    pub max_mb_per_sec: Vec<u16>,
    pub simulcast: bool,
}

#[derive(Debug, Clone)]
pub struct FormatVp8 {
    pub default_frame_index: FrameIndex,
    pub max_codec_config_delay: u8,
    pub supported_partition_count: u8,
    pub supported_sync_frame_types: u8,
    pub resolution_scaling: u8,
    pub supported_rate_control_modes: u8,
    pub max_mb_per_sec: u16,
    pub simulcast: bool,
}

bitflags! {
    pub struct InterlaceFlags: u8 {
        const INTERLACED = 1 << 0;
        const SINGLE_FIELD_PER_FRAME = 1 << 1;
        const FIELD_1_FIRST = 1 << 2;
        const FIELD_PATTERN_MASK = 0b110000;
    }
}

#[derive(Debug, Clone)]
pub struct FrameDesc {
    index: FrameIndex,
    capabilities: FrameCapabilities,
    width: u16,
    height: u16,
    min_bit_rate: u32,
    max_bit_rate: u32,
    max_video_frame_buffer_size: Option<u32>,
    default_frame_interval: Duration,
    frame_intervals: SupportedFrameIntervals,
    kind: FrameKind,
}

impl FrameDesc {
    pub fn index(&self) -> FrameIndex {
        self.index
    }

    pub fn capabilities(&self) -> FrameCapabilities {
        self.capabilities
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn bit_rate(&self) -> (u32, u32) {
        (self.min_bit_rate, self.max_bit_rate)
    }

    /// `dwMaxVideoFrameBufferSize` (deprecated; absent in frame-based, H.264 and VP8 frames).
    pub fn max_video_frame_buffer_size(&self) -> Option<u32> {
        self.max_video_frame_buffer_size
    }

    pub fn default_frame_interval(&self) -> Duration {
        self.default_frame_interval
    }

    pub fn frame_intervals(&self) -> &SupportedFrameIntervals {
        &self.frame_intervals
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }
}

bitflags! {
    pub struct FrameCapabilities: u8 {
        const STILL_IMAGE_SUPPORTED = 1 << 0;
        const FIXED_FRAME_RATE = 1 << 1;
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum FrameKind {
    Uncompressed,
    Mjpeg,
    FrameBased { bytes_per_line: u32 },
    H264(H264FrameInfo),
    Vp8(Vp8FrameInfo),
}

#[derive(Debug, Clone)]
pub struct H264FrameInfo {
    pub sar_width: u16,
    pub sar_height: u16,
    pub profile: u16,
    pub level_idc: u8,
    pub constrained_toolset: u16,
    pub supported_usages: u32,
    pub capabilities: u16,
    pub svc_capabilities: u32,
    pub mvc_capabilities: u32,
}

#[derive(Debug, Clone)]
pub struct Vp8FrameInfo {
    pub supported_usages: u32,
    pub capabilities: u16,
    pub scalability_capabilities: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportedFrameIntervals {
    Continuous {
        min_frame_interval: Duration,
        max_frame_interval: Duration,
        frame_interval_step: Duration,
    },

    Discrete {
        supported_frame_intervals: Vec<Duration>,
    },
}

impl SupportedFrameIntervals {
    /// Whether the device accepts `interval` for this frame.
    ///
    /// Intervals are compared in the 100 ns units of the descriptor, so `1s / 30` matches an
    /// entry of 333333.
    pub fn contains(&self, interval: Duration) -> bool {
        let units = duration_to_100ns(interval);
        match self {
            SupportedFrameIntervals::Continuous {
                min_frame_interval,
                max_frame_interval,
                frame_interval_step,
            } => {
                let min = duration_to_100ns(*min_frame_interval);
                let max = duration_to_100ns(*max_frame_interval);
                let step = duration_to_100ns(*frame_interval_step);
                if units < min || units > max {
                    return false;
                }
                step == 0 || (units - min) % step == 0
            }
            SupportedFrameIntervals::Discrete {
                supported_frame_intervals,
            } => supported_frame_intervals
                .iter()
                .any(|&supported| duration_to_100ns(supported) == units),
        }
    }
}

//! UVC device topology.
//!
//! UVC devices consist of:
//! - *Input Terminals*, which provide video data to the UVC device.
//! - *Output Terminals*, which transfer video data away from the UVC device.
//! - *Units*, which connect between other units or terminals, and process or reroute video data.

pub(crate) mod parse;

use std::num::NonZeroU8;

use bitflags::bitflags;
use uuid::Uuid;

use crate::{
    error::{Error, ErrorKind},
    util::{feature_bit_set, BcdVersion},
    Result,
};

/// Identifies a video data source (either a [`UnitDesc`], or an [`InputTerminalDesc`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(NonZeroU8);

impl SourceId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u8 {
        self.0.get()
    }
}

/// Identifies an [`InputTerminalDesc`] or an [`OutputTerminalDesc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(NonZeroU8);

impl TermId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u8 {
        self.0.get()
    }
}

/// Identifies an [`InputTerminalDesc`] that is a camera terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(TermId);

impl CameraId {
    pub fn as_raw(self) -> u8 {
        self.0.as_raw()
    }
}

impl From<CameraId> for TermId {
    fn from(id: CameraId) -> Self {
        id.0
    }
}

/// Identifies a [`UnitDesc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(NonZeroU8);

impl UnitId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u8 {
        self.0.get()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessingUnitId(UnitId);

impl ProcessingUnitId {
    pub fn as_raw(self) -> u8 {
        self.0.as_raw()
    }
}

impl From<ProcessingUnitId> for UnitId {
    fn from(id: ProcessingUnitId) -> Self {
        id.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SelectorUnitId(UnitId);

impl From<SelectorUnitId> for UnitId {
    fn from(id: SelectorUnitId) -> Self {
        id.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodingUnitId(UnitId);

impl From<EncodingUnitId> for UnitId {
    fn from(id: EncodingUnitId) -> Self {
        id.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionUnitId(UnitId);

impl ExtensionUnitId {
    pub fn as_raw(self) -> u8 {
        self.0.as_raw()
    }
}

impl From<ExtensionUnitId> for UnitId {
    fn from(id: ExtensionUnitId) -> Self {
        id.0
    }
}

/// A decoded Video Control interface descriptor.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum VideoControlEntity {
    Header(ControlHeader),
    /// Input terminals, including camera terminals (`wTerminalType == 0x0201`).
    InputTerminal(InputTerminalDesc),
    OutputTerminal(OutputTerminalDesc),
    SelectorUnit(SelectorUnitDesc),
    ProcessingUnit(ProcessingUnitDesc),
    EncodingUnit(EncodingUnitDesc),
    ExtensionUnit(ExtensionUnitDesc),
    /// The `CS_ENDPOINT` record of the interrupt endpoint.
    InterruptEndpoint(InterruptEndpointDesc),
    /// A record with a subtype this library doesn't interpret.
    Unknown { subtype: u8, payload: Vec<u8> },
}

/// The device topology as reported by the Video Control interface descriptors.
#[derive(Debug, Clone)]
pub struct Topology {
    header: ControlHeader,
    units: Vec<UnitDesc>,
    inputs: Vec<InputTerminalDesc>,
    outputs: Vec<OutputTerminalDesc>,
}

impl Topology {
    pub(crate) fn from_entities(
        entities: impl IntoIterator<Item = VideoControlEntity>,
    ) -> std::result::Result<Self, String> {
        let mut header = None;
        let mut units = Vec::new();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        for entity in entities {
            match entity {
                VideoControlEntity::Header(h) => {
                    if header.is_some() {
                        return Err("duplicate VC_HEADER descriptor".into());
                    }
                    header = Some(h);
                }
                VideoControlEntity::InputTerminal(t) => inputs.push(t),
                VideoControlEntity::OutputTerminal(t) => outputs.push(t),
                VideoControlEntity::SelectorUnit(u) => units.push(UnitDesc {
                    kind: UnitKind::Selector(u),
                }),
                VideoControlEntity::ProcessingUnit(u) => units.push(UnitDesc {
                    kind: UnitKind::Processing(u),
                }),
                VideoControlEntity::EncodingUnit(u) => units.push(UnitDesc {
                    kind: UnitKind::Encoding(u),
                }),
                VideoControlEntity::ExtensionUnit(u) => units.push(UnitDesc {
                    kind: UnitKind::Extension(u),
                }),
                VideoControlEntity::InterruptEndpoint(_) => {}
                VideoControlEntity::Unknown { subtype, .. } => {
                    log::warn!("ignoring unknown VC descriptor subtype {:#04x}", subtype);
                }
            }
        }

        let header = header.ok_or("missing VC_HEADER descriptor")?;
        Ok(Topology {
            header,
            units,
            inputs,
            outputs,
        })
    }

    pub fn header(&self) -> &ControlHeader {
        &self.header
    }

    pub fn camera_terminal_by_id(&self, id: CameraId) -> Result<&CameraTerminalDesc> {
        self.inputs
            .iter()
            .filter(|inp| inp.term_id == id.0)
            .find_map(|inp| inp.as_camera_desc())
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("camera terminal {:?}", id))))
    }

    pub fn processing_unit_by_id(&self, id: ProcessingUnitId) -> Result<&ProcessingUnitDesc> {
        self.units
            .iter()
            .filter_map(|unit| unit.as_processing_unit())
            .find(|unit| unit.id == id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("processing unit {:?}", id))))
    }

    pub fn extension_unit_by_id(&self, id: ExtensionUnitId) -> Result<&ExtensionUnitDesc> {
        self.units
            .iter()
            .filter_map(|unit| unit.as_extension_unit())
            .find(|unit| unit.id == id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("extension unit {:?}", id))))
    }

    pub fn units(&self) -> &[UnitDesc] {
        &self.units
    }

    pub fn inputs(&self) -> &[InputTerminalDesc] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputTerminalDesc] {
        &self.outputs
    }
}

#[derive(Debug, Clone)]
pub struct ControlHeader {
    uvc_version: BcdVersion,
    total_len: u16,
    clock_freq_hz: u32,
    streaming_interfaces: Vec<u8>,
}

impl ControlHeader {
    /// `bcdUVC`: the UVC revision the device implements.
    pub fn uvc_version(&self) -> BcdVersion {
        self.uvc_version
    }

    pub fn total_len(&self) -> u16 {
        self.total_len
    }

    /// `dwClockFrequency` (deprecated in UVC 1.5, where it may be 0).
    pub fn clock_freq_hz(&self) -> u32 {
        self.clock_freq_hz
    }

    /// Interface numbers of the Video Streaming interfaces belonging to this function.
    pub fn streaming_interfaces(&self) -> &[u8] {
        &self.streaming_interfaces
    }
}

/// A unit declared by the Video Control Interface Descriptors.
#[derive(Debug, Clone)]
pub struct UnitDesc {
    kind: UnitKind,
}

impl UnitDesc {
    pub fn unit_kind(&self) -> &UnitKind {
        &self.kind
    }

    pub fn as_processing_unit(&self) -> Option<&ProcessingUnitDesc> {
        match &self.kind {
            UnitKind::Processing(unit) => Some(unit),
            _ => None,
        }
    }

    pub fn as_extension_unit(&self) -> Option<&ExtensionUnitDesc> {
        match &self.kind {
            UnitKind::Extension(unit) => Some(unit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum UnitKind {
    Selector(SelectorUnitDesc),
    Processing(ProcessingUnitDesc),
    Encoding(EncodingUnitDesc),
    Extension(ExtensionUnitDesc),
}

#[derive(Debug, Clone)]
pub struct SelectorUnitDesc {
    id: SelectorUnitId,
    inputs: Vec<SourceId>,
}

impl SelectorUnitDesc {
    pub fn id(&self) -> SelectorUnitId {
        self.id
    }

    pub fn inputs(&self) -> &[SourceId] {
        &self.inputs
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingUnitDesc {
    id: ProcessingUnitId,
    source: SourceId,
    max_multiplier: u16,
    controls: ProcessingUnitControls,
    controls_raw: Vec<u8>,
    string: u8,
    standards: Option<VideoStandards>,
}

impl ProcessingUnitDesc {
    pub fn id(&self) -> ProcessingUnitId {
        self.id
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn max_multiplier(&self) -> u16 {
        self.max_multiplier
    }

    pub fn controls(&self) -> ProcessingUnitControls {
        self.controls
    }

    /// Tests bit `bit` of `bmControls`. Bits past the end of the device's bitmask read as `false`.
    pub fn supports_bit(&self, bit: u8) -> bool {
        feature_bit_set(&self.controls_raw, bit)
    }

    /// `bmVideoStandards`; absent on UVC 1.0 devices.
    pub fn standards(&self) -> Option<VideoStandards> {
        self.standards
    }

    pub fn string_index(&self) -> Option<u8> {
        Some(self.string).filter(|&i| i != 0)
    }
}

bitflags! {
    /// `bmControls` of a processing unit (UVC 1.5, 3.7.2.5).
    pub struct ProcessingUnitControls: u32 {
        const BRIGHTNESS                     = 1 << 0;
        const CONTRAST                       = 1 << 1;
        const HUE                            = 1 << 2;
        const SATURATION                     = 1 << 3;
        const SHARPNESS                      = 1 << 4;
        const GAMMA                          = 1 << 5;
        const WHITE_BALANCE_TEMPERATURE      = 1 << 6;
        const WHITE_BALANCE_COMPONENT        = 1 << 7;
        const BACKLIGHT_COMPENSATION         = 1 << 8;
        const GAIN                           = 1 << 9;
        const POWER_LINE_FREQUENCY           = 1 << 10;
        const HUE_AUTO                       = 1 << 11;
        const WHITE_BALANCE_TEMPERATURE_AUTO = 1 << 12;
        const WHITE_BALANCE_COMPONENT_AUTO   = 1 << 13;
        const DIGITAL_MULTIPLIER             = 1 << 14;
        const DIGITAL_MULTIPLIER_LIMIT       = 1 << 15;
        const ANALOG_VIDEO_STANDARD          = 1 << 16;
        const ANALOG_VIDEO_LOCK_STATUS       = 1 << 17;
        const CONTRAST_AUTO                  = 1 << 18;
    }
}

bitflags! {
    pub struct VideoStandards: u8 {
        const NONE         = 1 << 0;
        const NTSC_525_60  = 1 << 1;
        const PAL_625_50   = 1 << 2;
        const SECAM_625_50 = 1 << 3;
        const NTSC_625_50  = 1 << 4;
        const PAL_525_60   = 1 << 5;
    }
}

/// Encoding unit (UVC 1.5).
#[derive(Debug, Clone)]
pub struct EncodingUnitDesc {
    id: EncodingUnitId,
    source: SourceId,
    string: u8,
    controls: EncodingUnitControls,
    controls_runtime: EncodingUnitControls,
}

impl EncodingUnitDesc {
    pub fn id(&self) -> EncodingUnitId {
        self.id
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Controls supported while the stream is being set up.
    pub fn controls(&self) -> EncodingUnitControls {
        self.controls
    }

    /// Controls that can be changed while streaming.
    pub fn controls_runtime(&self) -> EncodingUnitControls {
        self.controls_runtime
    }

    pub fn string_index(&self) -> Option<u8> {
        Some(self.string).filter(|&i| i != 0)
    }
}

bitflags! {
    pub struct EncodingUnitControls: u32 {
        const SELECT_LAYER        = 1 << 0;
        const PROFILE_AND_TOOLSET = 1 << 1;
        const VIDEO_RESOLUTION    = 1 << 2;
        const MIN_FRAME_INTERVAL  = 1 << 3;
        const SLICE_MODE          = 1 << 4;
        const RATE_CONTROL_MODE   = 1 << 5;
        const AVERAGE_BIT_RATE    = 1 << 6;
        const CPB_SIZE            = 1 << 7;
        const PEAK_BIT_RATE       = 1 << 8;
        const QUANTIZATION_PARAMS = 1 << 9;
        const SYNC_AND_LT_REF     = 1 << 10;
        const LT_BUFFER           = 1 << 11;
        const LT_PICTURE          = 1 << 12;
        const LT_VALIDATION       = 1 << 13;
        const LEVEL_IDC           = 1 << 14;
        const SEI_MESSAGE         = 1 << 15;
        const QP_RANGE            = 1 << 16;
        const PRIORITY_ID         = 1 << 17;
        const START_OR_STOP_LAYER = 1 << 18;
        const ERROR_RESILIENCY    = 1 << 19;
    }
}

#[derive(Debug, Clone)]
pub struct ExtensionUnitDesc {
    id: ExtensionUnitId,
    extension_code: Uuid,
    num_controls: u8,
    inputs: Vec<SourceId>,
    controls_bitmap: Vec<u8>,
}

impl ExtensionUnitDesc {
    pub fn id(&self) -> ExtensionUnitId {
        self.id
    }

    /// `guidExtensionCode`, identifying the vendor-specific control set.
    pub fn extension_code(&self) -> Uuid {
        self.extension_code
    }

    pub fn num_controls(&self) -> u8 {
        self.num_controls
    }

    pub fn inputs(&self) -> &[SourceId] {
        &self.inputs
    }

    pub fn controls_bitmap(&self) -> &[u8] {
        &self.controls_bitmap
    }
}

#[derive(Debug, Clone)]
pub struct OutputTerminalDesc {
    term_id: TermId,
    term_type: u16,
    assoc: Option<TermId>,
    source: SourceId,
    string: u8,
}

impl OutputTerminalDesc {
    pub fn id(&self) -> TermId {
        self.term_id
    }

    pub fn terminal_type(&self) -> Option<OutputTerminalType> {
        OutputTerminalType::from_raw(self.term_type)
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn associated_terminal(&self) -> Option<TermId> {
        self.assoc
    }

    pub fn string_index(&self) -> Option<u8> {
        Some(self.string).filter(|&i| i != 0)
    }
}

#[derive(Debug, Clone)]
pub struct InputTerminalDesc {
    term_id: TermId,
    term_type: u16,
    assoc: Option<TermId>,
    string: u8,
    kind: InputTerminalKind,
}

impl InputTerminalDesc {
    pub fn id(&self) -> TermId {
        self.term_id
    }

    pub fn terminal_type(&self) -> Option<InputTerminalType> {
        InputTerminalType::from_raw(self.term_type)
    }

    pub fn terminal_kind(&self) -> &InputTerminalKind {
        &self.kind
    }

    pub fn associated_terminal(&self) -> Option<TermId> {
        self.assoc
    }

    pub fn string_index(&self) -> Option<u8> {
        Some(self.string).filter(|&i| i != 0)
    }

    pub fn as_camera_id(&self) -> Option<CameraId> {
        match &self.kind {
            InputTerminalKind::Camera(_) => Some(CameraId(self.term_id)),
            _ => None,
        }
    }

    pub fn as_camera_desc(&self) -> Option<&CameraTerminalDesc> {
        match &self.kind {
            InputTerminalKind::Camera(cam) => Some(cam),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum InputTerminalKind {
    Camera(CameraTerminalDesc),
    /// Misc. terminal without extra functionality (or with unimplemented functionality).
    Other,
}

#[derive(Debug, Clone)]
pub struct CameraTerminalDesc {
    id: CameraId,
    objective_focal_length_min: u16,
    objective_focal_length_max: u16,
    ocular_focal_length: u16,
    controls: CameraControls,
    controls_raw: Vec<u8>,
}

impl CameraTerminalDesc {
    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn controls(&self) -> CameraControls {
        self.controls
    }

    /// Tests bit `bit` of `bmControls`. Bits past the end of the device's bitmask read as `false`.
    pub fn supports_bit(&self, bit: u8) -> bool {
        feature_bit_set(&self.controls_raw, bit)
    }

    /// `(wObjectiveFocalLengthMin, wObjectiveFocalLengthMax, wOcularFocalLength)`
    pub fn focal_lengths(&self) -> (u16, u16, u16) {
        (
            self.objective_focal_length_min,
            self.objective_focal_length_max,
            self.ocular_focal_length,
        )
    }
}

bitflags! {
    /// `bmControls` of a camera terminal (UVC 1.5, 3.7.2.3).
    pub struct CameraControls: u32 {
        const SCANNING_MODE = 1 << 0;
        const AUTO_EXPOSURE_MODE = 1 << 1;
        const AUTO_EXPOSURE_PRIORITY = 1 << 2;
        const EXPOSURE_TIME_ABS = 1 << 3;
        const EXPOSURE_TIME_REL = 1 << 4;
        const FOCUS_ABS = 1 << 5;
        const FOCUS_REL = 1 << 6;
        const IRIS_ABS = 1 << 7;
        const IRIS_REL = 1 << 8;
        const ZOOM_ABS = 1 << 9;
        const ZOOM_REL = 1 << 10;
        const PAN_TILT_ABS = 1 << 11;
        const PAN_TILT_REL = 1 << 12;
        const ROLL_ABS = 1 << 13;
        const ROLL_REL = 1 << 14;

        const FOCUS_AUTO = 1 << 17;
        const PRIVACY = 1 << 18;
        const FOCUS_SIMPLE = 1 << 19;
        const WINDOW = 1 << 20;
        const REGION_OF_INTEREST = 1 << 21;
    }
}

/// Class-specific descriptor of the Video Control interrupt endpoint.
#[derive(Debug, Clone, Copy)]
pub struct InterruptEndpointDesc {
    /// `wMaxTransferSize` of status packets.
    pub max_transfer_size: u16,
}

primitive_enum! {
    pub enum InputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        InVendorSpecific = 0x0200,
        InCamera = 0x0201,
        InMediaTransport = 0x0202,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

primitive_enum! {
    pub enum OutputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        OutVendorSpecific = 0x0300,
        OutDisplay = 0x0301,
        OutMediaTransport = 0x0302,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

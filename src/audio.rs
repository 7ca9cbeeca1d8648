//! USB Audio Class (UAC 1.0) functions, plus the UAC 2.0 clock entities.
//!
//! The audio control interface describes a graph of terminals and units much like the video
//! control interface does; audio streaming interfaces carry one format per alternate setting.

pub mod clock;
pub mod feature_unit;
mod parse;
pub mod stream;

pub use parse::{parse_audio_control, parse_audio_streaming};
pub(crate) use parse::{parse_control_interface, parse_streaming_interface};

use std::num::NonZeroU8;

use crate::{
    error::{Error, ErrorKind},
    topo::{SourceId, TermId, UnitId},
    util::{feature_bit_set, BcdVersion},
    Result,
};

/// Identifies a [`FeatureUnitDesc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureUnitId(UnitId);

impl FeatureUnitId {
    pub fn as_raw(self) -> u8 {
        self.0.as_raw()
    }
}

/// Identifies a UAC 2.0 clock entity (source, selector or multiplier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockId(NonZeroU8);

impl ClockId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u8 {
        self.0.get()
    }
}

/// A decoded Audio Control interface descriptor.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AudioControlEntity {
    Header(AudioControlHeader),
    InputTerminal(AudioInputTerminalDesc),
    OutputTerminal(AudioOutputTerminalDesc),
    MixerUnit(MixerUnitDesc),
    SelectorUnit(AudioSelectorUnitDesc),
    FeatureUnit(FeatureUnitDesc),
    ProcessingUnit(AudioProcessingUnitDesc),
    ExtensionUnit(AudioExtensionUnitDesc),
    ClockSource(ClockSourceDesc),
    ClockSelector(ClockSelectorDesc),
    ClockMultiplier(ClockMultiplierDesc),
    Unknown { subtype: u8, payload: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct AudioControlHeader {
    pub(crate) adc_version: BcdVersion,
    pub(crate) total_len: u16,
    pub(crate) category: Option<u8>,
    pub(crate) streaming_interfaces: Vec<u8>,
}

impl AudioControlHeader {
    /// `bcdADC`
    pub fn adc_version(&self) -> BcdVersion {
        self.adc_version
    }

    pub fn total_len(&self) -> u16 {
        self.total_len
    }

    /// `bCategory` of UAC 2.0 headers.
    pub fn category(&self) -> Option<u8> {
        self.category
    }

    /// Interface numbers of the audio streaming interfaces (`baInterfaceNr`). UAC 2.0 headers
    /// don't list them.
    pub fn streaming_interfaces(&self) -> &[u8] {
        &self.streaming_interfaces
    }
}

#[derive(Debug, Clone)]
pub struct AudioInputTerminalDesc {
    pub(crate) id: TermId,
    pub(crate) terminal_type: u16,
    pub(crate) assoc: Option<TermId>,
    pub(crate) channels: u8,
    pub(crate) channel_config: u16,
    pub(crate) string: u8,
}

impl AudioInputTerminalDesc {
    pub fn id(&self) -> TermId {
        self.id
    }

    /// `wTerminalType`, eg. 0x0201 for a microphone or 0x0101 for USB streaming.
    pub fn terminal_type(&self) -> u16 {
        self.terminal_type
    }

    pub fn associated_terminal(&self) -> Option<TermId> {
        self.assoc
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// `wChannelConfig`: spatial locations of the logical channels.
    pub fn channel_config(&self) -> u16 {
        self.channel_config
    }

    pub fn string_index(&self) -> Option<u8> {
        Some(self.string).filter(|&i| i != 0)
    }
}

#[derive(Debug, Clone)]
pub struct AudioOutputTerminalDesc {
    pub(crate) id: TermId,
    pub(crate) terminal_type: u16,
    pub(crate) assoc: Option<TermId>,
    pub(crate) source: SourceId,
    pub(crate) string: u8,
}

impl AudioOutputTerminalDesc {
    pub fn id(&self) -> TermId {
        self.id
    }

    pub fn terminal_type(&self) -> u16 {
        self.terminal_type
    }

    pub fn associated_terminal(&self) -> Option<TermId> {
        self.assoc
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn string_index(&self) -> Option<u8> {
        Some(self.string).filter(|&i| i != 0)
    }
}

#[derive(Debug, Clone)]
pub struct MixerUnitDesc {
    pub(crate) id: UnitId,
    pub(crate) sources: Vec<SourceId>,
    pub(crate) channels: u8,
    pub(crate) channel_config: u16,
    /// `bmControls`: which input/output channel pairs are programmable.
    pub(crate) controls: Vec<u8>,
}

impl MixerUnitDesc {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn channel_config(&self) -> u16 {
        self.channel_config
    }

    pub fn controls(&self) -> &[u8] {
        &self.controls
    }
}

#[derive(Debug, Clone)]
pub struct AudioSelectorUnitDesc {
    pub(crate) id: UnitId,
    pub(crate) sources: Vec<SourceId>,
}

impl AudioSelectorUnitDesc {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }
}

/// A feature unit: per-channel volume, mute, tone and similar controls.
#[derive(Debug, Clone)]
pub struct FeatureUnitDesc {
    pub(crate) id: FeatureUnitId,
    pub(crate) source: SourceId,
    /// `bmaControls`, one bitmask per channel; index 0 is the master channel.
    pub(crate) controls: Vec<Vec<u8>>,
}

impl FeatureUnitDesc {
    pub fn id(&self) -> FeatureUnitId {
        self.id
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Number of logical channels, not counting the master channel.
    pub fn num_channels(&self) -> u8 {
        (self.controls.len().saturating_sub(1)) as u8
    }

    /// Tests bit `bit` of the control bitmask of `channel` (0 is the master channel).
    pub fn supports_bit(&self, channel: u8, bit: u8) -> bool {
        self.controls
            .get(usize::from(channel))
            .map_or(false, |mask| feature_bit_set(mask, bit))
    }
}

#[derive(Debug, Clone)]
pub struct AudioProcessingUnitDesc {
    pub(crate) id: UnitId,
    pub(crate) process_type: u16,
    pub(crate) sources: Vec<SourceId>,
    pub(crate) channels: u8,
    pub(crate) channel_config: u16,
    pub(crate) controls: Vec<u8>,
    pub(crate) specific: Vec<u8>,
}

impl AudioProcessingUnitDesc {
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// `wProcessType`: up/down-mix, Dolby Prologic, 3D stereo extender, reverb, chorus, or
    /// dynamic range compressor.
    pub fn process_type(&self) -> u16 {
        self.process_type
    }

    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn channel_config(&self) -> u16 {
        self.channel_config
    }

    pub fn controls(&self) -> &[u8] {
        &self.controls
    }

    /// Process-specific trailing bytes.
    pub fn specific(&self) -> &[u8] {
        &self.specific
    }
}

#[derive(Debug, Clone)]
pub struct AudioExtensionUnitDesc {
    pub(crate) id: UnitId,
    pub(crate) extension_code: u16,
    pub(crate) sources: Vec<SourceId>,
    pub(crate) channels: u8,
    pub(crate) channel_config: u16,
    pub(crate) controls: Vec<u8>,
}

impl AudioExtensionUnitDesc {
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Vendor-specific `wExtensionCode`.
    pub fn extension_code(&self) -> u16 {
        self.extension_code
    }

    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn channel_config(&self) -> u16 {
        self.channel_config
    }

    pub fn controls(&self) -> &[u8] {
        &self.controls
    }
}

/// Read/write access advertised by a 2-bit UAC 2.0 control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAccess {
    None,
    ReadOnly,
    ReadWrite,
}

impl ControlAccess {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => ControlAccess::ReadOnly,
            0b11 => ControlAccess::ReadWrite,
            _ => ControlAccess::None,
        }
    }
}

primitive_enum! {
    pub enum ClockType: u8 {
        External = 0,
        InternalFixed = 1,
        InternalVariable = 2,
        InternalProgrammable = 3,
    }
}

#[derive(Debug, Clone)]
pub struct ClockSourceDesc {
    pub(crate) id: ClockId,
    pub(crate) attributes: u8,
    pub(crate) controls: u8,
    pub(crate) assoc: Option<TermId>,
}

impl ClockSourceDesc {
    pub fn id(&self) -> ClockId {
        self.id
    }

    pub fn clock_type(&self) -> ClockType {
        // 2-bit field, every value is defined
        ClockType::from_raw(self.attributes & 0b11).unwrap_or(ClockType::External)
    }

    /// Whether the clock is synchronized to the start-of-frame signal.
    pub fn synced_to_sof(&self) -> bool {
        self.attributes & 0b100 != 0
    }

    pub fn frequency_control(&self) -> ControlAccess {
        ControlAccess::from_bits(self.controls)
    }

    pub fn validity_control(&self) -> ControlAccess {
        ControlAccess::from_bits(self.controls >> 2)
    }

    pub fn associated_terminal(&self) -> Option<TermId> {
        self.assoc
    }
}

#[derive(Debug, Clone)]
pub struct ClockSelectorDesc {
    pub(crate) id: ClockId,
    pub(crate) sources: Vec<ClockId>,
    pub(crate) controls: u8,
}

impl ClockSelectorDesc {
    pub fn id(&self) -> ClockId {
        self.id
    }

    pub fn sources(&self) -> &[ClockId] {
        &self.sources
    }

    pub fn selector_control(&self) -> ControlAccess {
        ControlAccess::from_bits(self.controls)
    }
}

#[derive(Debug, Clone)]
pub struct ClockMultiplierDesc {
    pub(crate) id: ClockId,
    pub(crate) source: ClockId,
    pub(crate) controls: u8,
}

impl ClockMultiplierDesc {
    pub fn id(&self) -> ClockId {
        self.id
    }

    pub fn source(&self) -> ClockId {
        self.source
    }

    pub fn numerator_control(&self) -> ControlAccess {
        ControlAccess::from_bits(self.controls)
    }

    pub fn denominator_control(&self) -> ControlAccess {
        ControlAccess::from_bits(self.controls >> 2)
    }
}

/// The entity graph of an Audio Control interface.
#[derive(Debug, Clone)]
pub struct AudioTopology {
    header: AudioControlHeader,
    entities: Vec<AudioControlEntity>,
}

impl AudioTopology {
    pub(crate) fn from_entities(
        entities: impl IntoIterator<Item = AudioControlEntity>,
    ) -> std::result::Result<Self, String> {
        let mut header = None;
        let mut rest = Vec::new();
        for entity in entities {
            match entity {
                AudioControlEntity::Header(h) => {
                    if header.is_some() {
                        return Err("duplicate AC header descriptor".into());
                    }
                    header = Some(h);
                }
                AudioControlEntity::Unknown { subtype, .. } => {
                    log::warn!("ignoring unknown AC descriptor subtype {:#04x}", subtype);
                }
                entity => rest.push(entity),
            }
        }

        let header = header.ok_or("missing AC header descriptor")?;
        Ok(Self {
            header,
            entities: rest,
        })
    }

    pub fn header(&self) -> &AudioControlHeader {
        &self.header
    }

    /// All entities except the header, in descriptor order.
    pub fn entities(&self) -> &[AudioControlEntity] {
        &self.entities
    }

    pub fn input_terminals(&self) -> impl Iterator<Item = &AudioInputTerminalDesc> + '_ {
        self.entities.iter().filter_map(|e| match e {
            AudioControlEntity::InputTerminal(t) => Some(t),
            _ => None,
        })
    }

    pub fn output_terminals(&self) -> impl Iterator<Item = &AudioOutputTerminalDesc> + '_ {
        self.entities.iter().filter_map(|e| match e {
            AudioControlEntity::OutputTerminal(t) => Some(t),
            _ => None,
        })
    }

    pub fn feature_units(&self) -> impl Iterator<Item = &FeatureUnitDesc> + '_ {
        self.entities.iter().filter_map(|e| match e {
            AudioControlEntity::FeatureUnit(u) => Some(u),
            _ => None,
        })
    }

    pub fn clock_sources(&self) -> impl Iterator<Item = &ClockSourceDesc> + '_ {
        self.entities.iter().filter_map(|e| match e {
            AudioControlEntity::ClockSource(c) => Some(c),
            _ => None,
        })
    }

    pub fn feature_unit_by_id(&self, id: FeatureUnitId) -> Result<&FeatureUnitDesc> {
        self.feature_units()
            .find(|u| u.id == id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("feature unit {:?}", id))))
    }

    pub fn clock_source_by_id(&self, id: ClockId) -> Result<&ClockSourceDesc> {
        self.clock_sources()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("clock source {:?}", id))))
    }
}

// `wFormatTag` of an audio streaming interface
primitive_enum! {
    pub enum FormatTag: u16 {
        Pcm = 0x0001,
        Pcm8 = 0x0002,
        IeeeFloat = 0x0003,
        Alaw = 0x0004,
        Mulaw = 0x0005,
        Mpeg = 0x1001,
        Ac3 = 0x1002,
    }
}

primitive_enum! {
    pub enum FormatType: u8 {
        TypeI = 1,
        TypeII = 2,
        TypeIII = 3,
    }
}

/// A decoded Audio Streaming interface or endpoint descriptor.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AudioStreamingEntity {
    General(AsGeneralDesc),
    FormatType(FormatTypeDesc),
    /// The class-specific `EP_GENERAL` record of the isochronous data endpoint.
    EndpointGeneral(AsEndpointDesc),
    Unknown { subtype: u8, payload: Vec<u8> },
}

/// `AS_GENERAL`
#[derive(Debug, Clone)]
pub struct AsGeneralDesc {
    pub(crate) terminal_link: TermId,
    pub(crate) delay: u8,
    pub(crate) format_tag: u16,
}

impl AsGeneralDesc {
    pub fn terminal_link(&self) -> TermId {
        self.terminal_link
    }

    /// Delay introduced by the data path, in frames.
    pub fn delay(&self) -> u8 {
        self.delay
    }

    pub fn format_tag_raw(&self) -> u16 {
        self.format_tag
    }

    pub fn format_tag(&self) -> Option<FormatTag> {
        FormatTag::from_raw(self.format_tag)
    }
}

/// Supported sampling frequencies of a format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleRates {
    Continuous { min: u32, max: u32 },
    Discrete(Vec<u32>),
}

impl SampleRates {
    pub fn contains(&self, hz: u32) -> bool {
        match self {
            SampleRates::Continuous { min, max } => (*min..=*max).contains(&hz),
            SampleRates::Discrete(rates) => rates.contains(&hz),
        }
    }

    /// The highest supported rate.
    pub fn max(&self) -> Option<u32> {
        match self {
            SampleRates::Continuous { max, .. } => Some(*max),
            SampleRates::Discrete(rates) => rates.iter().copied().max(),
        }
    }
}

/// `FORMAT_TYPE`
#[derive(Debug, Clone)]
pub struct FormatTypeDesc {
    pub(crate) format_type: u8,
    pub(crate) channels: u8,
    pub(crate) subframe_size: u8,
    pub(crate) bit_resolution: u8,
    /// Type II only: `wMaxBitRate` in kbit/s and `wSamplesPerFrame`.
    pub(crate) max_bit_rate: u16,
    pub(crate) samples_per_frame: u16,
    pub(crate) sample_rates: SampleRates,
}

impl FormatTypeDesc {
    pub fn format_type(&self) -> Option<FormatType> {
        FormatType::from_raw(self.format_type)
    }

    pub fn format_type_raw(&self) -> u8 {
        self.format_type
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Bytes per sample in one audio subframe.
    pub fn subframe_size(&self) -> u8 {
        self.subframe_size
    }

    /// Significant bits per sample.
    pub fn bit_resolution(&self) -> u8 {
        self.bit_resolution
    }

    pub fn max_bit_rate(&self) -> u16 {
        self.max_bit_rate
    }

    pub fn samples_per_frame(&self) -> u16 {
        self.samples_per_frame
    }

    pub fn sample_rates(&self) -> &SampleRates {
        &self.sample_rates
    }
}

/// Class-specific `EP_GENERAL` of an isochronous audio endpoint.
#[derive(Debug, Clone, Copy)]
pub struct AsEndpointDesc {
    pub(crate) attributes: u8,
    pub(crate) lock_delay_units: u8,
    pub(crate) lock_delay: u16,
}

impl AsEndpointDesc {
    /// Whether the endpoint accepts the sampling frequency control.
    pub fn sampling_frequency_control(&self) -> bool {
        self.attributes & 0x01 != 0
    }

    pub fn pitch_control(&self) -> bool {
        self.attributes & 0x02 != 0
    }

    /// Whether only packets of `wMaxPacketSize` are allowed.
    pub fn max_packets_only(&self) -> bool {
        self.attributes & 0x80 != 0
    }

    /// `(bLockDelayUnits, wLockDelay)`
    pub fn lock_delay(&self) -> (u8, u16) {
        (self.lock_delay_units, self.lock_delay)
    }
}

/// Description of the PCM (or compressed) data delivered by an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u8,
    pub sample_rate_hz: u32,
    pub bits_per_sample: u8,
    pub format_type: u8,
    pub format_tag: u16,
}

/// One streaming alternate setting of an audio streaming interface.
#[derive(Debug, Clone)]
pub struct AudioAltSettingDesc {
    pub(crate) alt_setting: u8,
    pub(crate) general: AsGeneralDesc,
    pub(crate) format: FormatTypeDesc,
    pub(crate) endpoint_address: u8,
    pub(crate) max_packet_size: usize,
    pub(crate) endpoint_general: Option<AsEndpointDesc>,
}

impl AudioAltSettingDesc {
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    pub fn general(&self) -> &AsGeneralDesc {
        &self.general
    }

    pub fn format_type(&self) -> &FormatTypeDesc {
        &self.format
    }

    pub fn endpoint_address(&self) -> u8 {
        self.endpoint_address
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn endpoint_general(&self) -> Option<&AsEndpointDesc> {
        self.endpoint_general.as_ref()
    }

    /// The format this alternate setting delivers at `sample_rate_hz`.
    pub fn audio_format(&self, sample_rate_hz: u32) -> AudioFormat {
        AudioFormat {
            channels: self.format.channels,
            sample_rate_hz,
            bits_per_sample: self.format.bit_resolution,
            format_type: self.format.format_type,
            format_tag: self.general.format_tag,
        }
    }
}

/// An audio streaming interface and its streaming alternate settings.
#[derive(Debug, Clone)]
pub struct AudioStreamingInterfaceDesc {
    pub(crate) interface: u8,
    pub(crate) alt_settings: Vec<AudioAltSettingDesc>,
}

impl AudioStreamingInterfaceDesc {
    pub fn interface_number(&self) -> u8 {
        self.interface
    }

    /// Alternate settings carrying a format, in descriptor order. The zero-bandwidth setting is
    /// not included.
    pub fn alt_settings(&self) -> &[AudioAltSettingDesc] {
        &self.alt_settings
    }

    pub fn alt_setting(&self, alt: u8) -> Result<&AudioAltSettingDesc> {
        self.alt_settings
            .iter()
            .find(|a| a.alt_setting == alt)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound(format!(
                    "alternate setting {} of audio streaming interface {}",
                    alt, self.interface
                )))
            })
    }
}

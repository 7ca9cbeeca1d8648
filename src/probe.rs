//! The Video Probe and Commit control record.
//!
//! The record grew with every UVC revision: 26 bytes in UVC 1.0, 34 bytes in UVC 1.1 and 48
//! bytes in UVC 1.5. Devices expect exactly the length of the revision they implement, so the
//! wire length is chosen from `bcdUVC` of the Video Control header.

use std::time::Duration;

use bitflags::bitflags;
use zerocopy::{
    byteorder::{LittleEndian, U16, U32, U64},
    AsBytes, FromBytes, Unaligned,
};

use crate::{
    error::{Error, ErrorKind},
    format::{FormatIndex, FrameIndex},
    util::{duration_to_100ns, BcdVersion},
    Result,
};

pub const PROBE_COMMIT_LEN_1_0: usize = 26;
pub const PROBE_COMMIT_LEN_1_1: usize = 34;
pub const PROBE_COMMIT_LEN_1_5: usize = 48;

/// The UVC 1.5 record as it appears on the wire. Shorter revisions are prefixes of it.
#[derive(AsBytes, FromBytes, Unaligned)]
#[repr(C)]
#[allow(non_snake_case)]
struct WireProbeCommit {
    bmHint: U16<LittleEndian>,
    bFormatIndex: u8,
    bFrameIndex: u8,
    dwFrameInterval: U32<LittleEndian>,
    wKeyFrameRate: U16<LittleEndian>,
    wPFrameRate: U16<LittleEndian>,
    wCompQuality: U16<LittleEndian>,
    wCompWindowSize: U16<LittleEndian>,
    wDelay: U16<LittleEndian>,
    dwMaxVideoFrameSize: U32<LittleEndian>,
    dwMaxPayloadTransferSize: U32<LittleEndian>,
    // UVC 1.1
    dwClockFrequency: U32<LittleEndian>,
    bmFramingInfo: u8,
    bPreferedVersion: u8, // (sic)
    bMinVersion: u8,
    bMaxVersion: u8,
    // UVC 1.5
    bUsage: u8,
    bBitDepthLuma: u8,
    bmSettings: u8,
    bMaxNumberOfRefFramesPlus1: u8,
    bmRateControlModes: U16<LittleEndian>,
    bmLayoutPerStream: U64<LittleEndian>,
}

bitflags! {
    /// `bmHint`: which fields the device must keep fixed while negotiating.
    #[derive(Default)]
    pub struct ProbeHint: u16 {
        const FIX_FRAME_INTERVAL = 1 << 0;
        const FIX_KEY_FRAME_RATE = 1 << 1;
        const FIX_P_FRAME_RATE = 1 << 2;
        const FIX_COMP_QUALITY = 1 << 3;
        const FIX_COMP_WINDOW_SIZE = 1 << 4;
    }
}

bitflags! {
    /// `bmFramingInfo` (UVC 1.1+).
    #[derive(Default)]
    pub struct FramingInfo: u8 {
        /// Payload headers must toggle the FID bit.
        const FID_REQUIRED = 1 << 0;
        /// Payload headers may set the EOF bit.
        const EOF_PRESENT = 1 << 1;
        /// Payload headers may set the EOS bit (UVC 1.5).
        const EOS_PRESENT = 1 << 2;
    }
}

/// Stream parameters exchanged through the `VS_PROBE_CONTROL` and `VS_COMMIT_CONTROL` controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeCommit {
    pub hint: ProbeHint,
    pub format_index: FormatIndex,
    pub frame_index: FrameIndex,
    /// Frame interval in 100 ns units.
    pub frame_interval: u32,
    pub key_frame_rate: u16,
    pub p_frame_rate: u16,
    pub comp_quality: u16,
    pub comp_window_size: u16,
    pub delay: u16,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
    pub clock_frequency: u32,
    pub framing_info: FramingInfo,
    pub preferred_version: u8,
    pub min_version: u8,
    pub max_version: u8,
    pub usage: u8,
    pub bit_depth_luma: u8,
    pub settings: u8,
    pub max_number_of_ref_frames_plus_1: u8,
    pub rate_control_modes: u16,
    pub layout_per_stream: u64,
}

impl ProbeCommit {
    /// Length of the record for a device implementing UVC `version`.
    pub fn wire_len(version: BcdVersion) -> usize {
        if version < BcdVersion::UVC_1_1 {
            PROBE_COMMIT_LEN_1_0
        } else if version < BcdVersion::UVC_1_5 {
            PROBE_COMMIT_LEN_1_1
        } else {
            PROBE_COMMIT_LEN_1_5
        }
    }

    pub fn frame_interval_duration(&self) -> Duration {
        Duration::from_nanos(u64::from(self.frame_interval) * 100)
    }

    pub fn set_frame_interval(&mut self, interval: Duration) {
        self.frame_interval = duration_to_100ns(interval);
    }

    /// Encodes the record with the length mandated by `version`. Fields that don't exist in that
    /// revision are dropped.
    pub fn encode(&self, version: BcdVersion) -> Vec<u8> {
        let wire = WireProbeCommit {
            bmHint: U16::new(self.hint.bits()),
            bFormatIndex: self.format_index.0,
            bFrameIndex: self.frame_index.0,
            dwFrameInterval: U32::new(self.frame_interval),
            wKeyFrameRate: U16::new(self.key_frame_rate),
            wPFrameRate: U16::new(self.p_frame_rate),
            wCompQuality: U16::new(self.comp_quality),
            wCompWindowSize: U16::new(self.comp_window_size),
            wDelay: U16::new(self.delay),
            dwMaxVideoFrameSize: U32::new(self.max_video_frame_size),
            dwMaxPayloadTransferSize: U32::new(self.max_payload_transfer_size),
            dwClockFrequency: U32::new(self.clock_frequency),
            bmFramingInfo: self.framing_info.bits(),
            bPreferedVersion: self.preferred_version,
            bMinVersion: self.min_version,
            bMaxVersion: self.max_version,
            bUsage: self.usage,
            bBitDepthLuma: self.bit_depth_luma,
            bmSettings: self.settings,
            bMaxNumberOfRefFramesPlus1: self.max_number_of_ref_frames_plus_1,
            bmRateControlModes: U16::new(self.rate_control_modes),
            bmLayoutPerStream: U64::new(self.layout_per_stream),
        };
        wire.as_bytes()[..Self::wire_len(version)].to_vec()
    }

    /// Decodes a record of any revision. Fields missing from a shorter record are zero.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PROBE_COMMIT_LEN_1_0 {
            return Err(Error::new(ErrorKind::ShortBuffer));
        }
        if buf.len() != PROBE_COMMIT_LEN_1_0
            && buf.len() != PROBE_COMMIT_LEN_1_1
            && buf.len() != PROBE_COMMIT_LEN_1_5
        {
            log::warn!("unusual probe/commit record length {}", buf.len());
        }

        let mut padded = [0; PROBE_COMMIT_LEN_1_5];
        let len = buf.len().min(PROBE_COMMIT_LEN_1_5);
        padded[..len].copy_from_slice(&buf[..len]);
        let wire = WireProbeCommit::read_from(&padded[..])
            .ok_or_else(|| Error::new(ErrorKind::ShortBuffer))?;

        Ok(Self {
            hint: ProbeHint::from_bits_truncate(wire.bmHint.get()),
            format_index: FormatIndex(wire.bFormatIndex),
            frame_index: FrameIndex(wire.bFrameIndex),
            frame_interval: wire.dwFrameInterval.get(),
            key_frame_rate: wire.wKeyFrameRate.get(),
            p_frame_rate: wire.wPFrameRate.get(),
            comp_quality: wire.wCompQuality.get(),
            comp_window_size: wire.wCompWindowSize.get(),
            delay: wire.wDelay.get(),
            max_video_frame_size: wire.dwMaxVideoFrameSize.get(),
            max_payload_transfer_size: wire.dwMaxPayloadTransferSize.get(),
            clock_frequency: wire.dwClockFrequency.get(),
            framing_info: FramingInfo::from_bits_truncate(wire.bmFramingInfo),
            preferred_version: wire.bPreferedVersion,
            min_version: wire.bMinVersion,
            max_version: wire.bMaxVersion,
            usage: wire.bUsage,
            bit_depth_luma: wire.bBitDepthLuma,
            settings: wire.bmSettings,
            max_number_of_ref_frames_plus_1: wire.bMaxNumberOfRefFramesPlus1,
            rate_control_modes: wire.bmRateControlModes.get(),
            layout_per_stream: wire.bmLayoutPerStream.get(),
        })
    }

    /// Names of the size and rate fields of `self` that exceed the ones in `max`.
    pub(crate) fn fields_exceeding(&self, max: &ProbeCommit) -> Vec<&'static str> {
        let checks: [(&'static str, u64, u64); 7] = [
            (
                "dwFrameInterval",
                self.frame_interval.into(),
                max.frame_interval.into(),
            ),
            (
                "wKeyFrameRate",
                self.key_frame_rate.into(),
                max.key_frame_rate.into(),
            ),
            ("wPFrameRate", self.p_frame_rate.into(), max.p_frame_rate.into()),
            ("wCompQuality", self.comp_quality.into(), max.comp_quality.into()),
            ("wDelay", self.delay.into(), max.delay.into()),
            (
                "dwMaxVideoFrameSize",
                self.max_video_frame_size.into(),
                max.max_video_frame_size.into(),
            ),
            (
                "dwMaxPayloadTransferSize",
                self.max_payload_transfer_size.into(),
                max.max_payload_transfer_size.into(),
            ),
        ];
        checks
            .iter()
            .filter(|(_, value, max)| value > max)
            .map(|(name, _, _)| *name)
            .collect()
    }
}

//! Typed values of class-specific controls.

use std::{fmt, time::Duration};

use bitflags::bitflags;

use crate::{
    request::{Gateway, Request, Target},
    Result,
};

/// Raw value of entity controls.
pub trait ControlValue {
    type Buf: Default + AsMut<[u8]>;

    fn decode(buf: &[u8]) -> Self;
    fn encode(&self, buf: &mut [u8]);
}

impl ControlValue for bool {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => false,
            1 => true,
            n => {
                log::warn!("invalid bool value (should be 0 or 1 only): {}", n);
                true
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

impl ControlValue for u8 {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        buf[0]
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }
}

impl ControlValue for i8 {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        buf[0] as i8
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

impl ControlValue for u16 {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 2];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

impl ControlValue for i16 {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 2];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

impl ControlValue for u32 {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerLineFrequency {
    Disabled = 0,
    Freq50Hz = 1,
    Freq60Hz = 2,
    Auto = 3,
}

impl ControlValue for PowerLineFrequency {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => Self::Disabled,
            1 => Self::Freq50Hz,
            2 => Self::Freq60Hz,
            3 => Self::Auto,
            n => {
                log::warn!("invalid power line frequency value {}", n);
                Self::Disabled
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = (*self) as u8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhiteBalanceComponents {
    blue: u16,
    red: u16,
}

impl WhiteBalanceComponents {
    pub fn new(blue: u16, red: u16) -> Self {
        Self { blue, red }
    }

    pub fn blue(&self) -> u16 {
        self.blue
    }

    pub fn red(&self) -> u16 {
        self.red
    }
}

impl ControlValue for WhiteBalanceComponents {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut blue = [0; 2];
        let mut red = [0; 2];
        blue.copy_from_slice(&buf[0..2]);
        red.copy_from_slice(&buf[2..4]);
        Self {
            blue: u16::from_le_bytes(blue),
            red: u16::from_le_bytes(red),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.blue.to_le_bytes());
        buf[2..4].copy_from_slice(&self.red.to_le_bytes());
    }
}

bitflags! {
    pub struct AutoExposureMode: u8 {
        const MANUAL = 1 << 0;
        const AUTO = 1 << 1;
        const SHUTTER_PRIORITY = 1 << 2;
        const APERTURE_PRIORITY = 1 << 3;
    }
}

impl ControlValue for AutoExposureMode {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        Self::from_bits_truncate(buf[0])
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.bits();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExposureTimeAbs(u32);

impl ExposureTimeAbs {
    /// Rounds and clamps a duration to fit the available range.
    pub fn from_duration(dur: Duration) -> Self {
        // Exposure time is in units of 0.0001 seconds, or 100Âµs.
        let units = dur.as_micros() / 100;
        let clamped = units.clamp(1, u32::MAX.into());
        Self(clamped as u32)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.0) * 100)
    }

    /// The raw value, in units of 100 µs.
    pub fn as_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ExposureTimeAbs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_duration().fmt(f)
    }
}

impl ControlValue for ExposureTimeAbs {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(buf);
        Self(u32::from_le_bytes(bytes))
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.0.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusRel {
    focus_rel: i8,
    speed: u8,
}

impl FocusRel {
    pub fn new(focus_rel: i8, speed: u8) -> Self {
        Self { focus_rel, speed }
    }
}

impl ControlValue for FocusRel {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        Self {
            focus_rel: buf[0] as i8,
            speed: buf[1],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.focus_rel as u8;
        buf[1] = self.speed;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum FocusSimple {
    FullRange = 0x00,
    Macro = 0x01,
    People = 0x02,
    Scene = 0x03,
}

impl ControlValue for FocusSimple {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0x00 => Self::FullRange,
            0x01 => Self::Macro,
            0x02 => Self::People,
            0x03 => Self::Scene,
            n => {
                log::warn!("invalid simple focus value {}", n);
                Self::FullRange
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}


/// Relative zoom: direction (-1, 0, 1), digital zoom enable, and speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomRel {
    pub zoom: i8,
    pub digital_zoom: bool,
    pub speed: u8,
}

impl ControlValue for ZoomRel {
    type Buf = [u8; 3];

    fn decode(buf: &[u8]) -> Self {
        Self {
            zoom: buf[0] as i8,
            digital_zoom: buf[1] != 0,
            speed: buf[2],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.zoom as u8;
        buf[1] = self.digital_zoom as u8;
        buf[2] = self.speed;
    }
}

/// Absolute pan and tilt, in arc seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanTiltAbs {
    pub pan: i32,
    pub tilt: i32,
}

impl ControlValue for PanTiltAbs {
    type Buf = [u8; 8];

    fn decode(buf: &[u8]) -> Self {
        let mut pan = [0; 4];
        let mut tilt = [0; 4];
        pan.copy_from_slice(&buf[0..4]);
        tilt.copy_from_slice(&buf[4..8]);
        Self {
            pan: i32::from_le_bytes(pan),
            tilt: i32::from_le_bytes(tilt),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.pan.to_le_bytes());
        buf[4..8].copy_from_slice(&self.tilt.to_le_bytes());
    }
}

/// Relative pan and tilt: direction and speed of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanTiltRel {
    pub pan: i8,
    pub pan_speed: u8,
    pub tilt: i8,
    pub tilt_speed: u8,
}

impl ControlValue for PanTiltRel {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        Self {
            pan: buf[0] as i8,
            pan_speed: buf[1],
            tilt: buf[2] as i8,
            tilt_speed: buf[3],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.pan as u8;
        buf[1] = self.pan_speed;
        buf[2] = self.tilt as u8;
        buf[3] = self.tilt_speed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollRel {
    pub roll: i8,
    pub speed: u8,
}

impl ControlValue for RollRel {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        Self {
            roll: buf[0] as i8,
            speed: buf[1],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.roll as u8;
        buf[1] = self.speed;
    }
}

/// Digital window (UVC 1.5): the region of the sensor to stream, in pixels, and the number of
/// steps the device takes to get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalWindow {
    pub top: u16,
    pub left: u16,
    pub bottom: u16,
    pub right: u16,
    pub num_steps: u16,
    pub num_steps_units: u16,
}

impl ControlValue for DigitalWindow {
    type Buf = [u8; 12];

    fn decode(buf: &[u8]) -> Self {
        let field = |i: usize| u16::decode(&buf[i * 2..i * 2 + 2]);
        Self {
            top: field(0),
            left: field(1),
            bottom: field(2),
            right: field(3),
            num_steps: field(4),
            num_steps_units: field(5),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let fields = [
            self.top,
            self.left,
            self.bottom,
            self.right,
            self.num_steps,
            self.num_steps_units,
        ];
        for (chunk, field) in buf.chunks_exact_mut(2).zip(fields.iter()) {
            field.encode(chunk);
        }
    }
}

bitflags! {
    /// Automatic functions driven by the region of interest.
    pub struct RoiAutoControls: u16 {
        const AUTO_EXPOSURE = 1 << 0;
        const AUTO_IRIS = 1 << 1;
        const AUTO_WHITE_BALANCE = 1 << 2;
        const AUTO_FOCUS = 1 << 3;
        const AUTO_FACE_DETECT = 1 << 4;
        const AUTO_DETECT_AND_TRACK = 1 << 5;
        const IMAGE_STABILIZATION = 1 << 6;
        const HIGHER_QUALITY = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionOfInterest {
    pub top: u16,
    pub left: u16,
    pub bottom: u16,
    pub right: u16,
    pub auto_controls: RoiAutoControls,
}

impl ControlValue for RegionOfInterest {
    type Buf = [u8; 10];

    fn decode(buf: &[u8]) -> Self {
        let field = |i: usize| u16::decode(&buf[i * 2..i * 2 + 2]);
        Self {
            top: field(0),
            left: field(1),
            bottom: field(2),
            right: field(3),
            auto_controls: RoiAutoControls::from_bits_truncate(field(4)),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let fields = [
            self.top,
            self.left,
            self.bottom,
            self.right,
            self.auto_controls.bits(),
        ];
        for (chunk, field) in buf.chunks_exact_mut(2).zip(fields.iter()) {
            field.encode(chunk);
        }
    }
}

/// Current analog video standard reported by a processing unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnalogVideoStandard {
    None = 0,
    Ntsc525_60 = 1,
    Pal625_50 = 2,
    Secam625_50 = 3,
    Ntsc625_50 = 4,
    Pal525_60 = 5,
}

impl ControlValue for AnalogVideoStandard {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => Self::None,
            1 => Self::Ntsc525_60,
            2 => Self::Pal625_50,
            3 => Self::Secam625_50,
            4 => Self::Ntsc625_50,
            5 => Self::Pal525_60,
            n => {
                log::warn!("invalid analog video standard {}", n);
                Self::None
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

/// Audio volume in steps of 1/256 dB. `i16::MIN` is silence.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Volume(pub i16);

impl Volume {
    pub const SILENCE: Self = Self(i16::MIN);

    pub fn from_db(db: f32) -> Self {
        let raw = (db * 256.0).round().clamp(f32::from(i16::MIN + 1), f32::from(i16::MAX));
        Self(raw as i16)
    }

    pub fn as_db(&self) -> f32 {
        f32::from(self.0) / 256.0
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::SILENCE {
            f.write_str("-inf dB")
        } else {
            write!(f, "{:.2} dB", self.as_db())
        }
    }
}

impl ControlValue for Volume {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        Self(i16::decode(buf))
    }

    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(buf)
    }
}

bitflags! {
    /// Capabilities reported by `GET_INFO`.
    pub struct ControlInfo: u8 {
        const GET = 1 << 0;
        const SET = 1 << 1;
        const DISABLED_BY_AUTO = 1 << 2;
        const AUTOUPDATE = 1 << 3;
        const ASYNCHRONOUS = 1 << 4;
        const DISABLED_BY_STATE = 1 << 5;
    }
}

impl ControlValue for ControlInfo {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        Self::from_bits_truncate(buf[0])
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.bits();
    }
}

/// Encodes a value into its fixed-size wire buffer.
pub(crate) fn encode_value<V: ControlValue>(value: &V) -> V::Buf {
    let mut buf = V::Buf::default();
    value.encode(buf.as_mut());
    buf
}

/// Reads a control value with a request that returns exactly `V::Buf` bytes.
pub(crate) fn read_value<V: ControlValue>(
    gateway: &Gateway,
    target: Target,
    request: Request,
    selector: u8,
    channel: u8,
) -> Result<V> {
    let mut buf = V::Buf::default();
    gateway.get(target, request.code(), selector, channel, buf.as_mut())?;
    Ok(V::decode(buf.as_mut()))
}

/// Writes a control value with `SET_CUR`.
pub(crate) fn write_value<V: ControlValue>(
    gateway: &Gateway,
    target: Target,
    selector: u8,
    channel: u8,
    value: &V,
) -> Result<()> {
    let mut buf = encode_value(value);
    gateway.set(
        target,
        Request::SetCur.code(),
        selector,
        channel,
        buf.as_mut(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_time_units() {
        let exp = ExposureTimeAbs::from_duration(Duration::from_millis(10));
        assert_eq!(exp.as_raw(), 100);
        assert_eq!(exp.as_duration(), Duration::from_millis(10));
        assert_eq!(ExposureTimeAbs::from_duration(Duration::ZERO).as_raw(), 1);
    }

    #[test]
    fn pan_tilt_layout() {
        let value = PanTiltAbs {
            pan: -3600,
            tilt: 7200,
        };
        let buf = encode_value(&value);
        assert_eq!(buf, [0xF0, 0xF1, 0xFF, 0xFF, 0x20, 0x1C, 0x00, 0x00]);
        assert_eq!(PanTiltAbs::decode(&buf), value);
    }

    #[test]
    fn white_balance_components_order() {
        let value = WhiteBalanceComponents::decode(&[0x10, 0x00, 0x20, 0x00]);
        assert_eq!(value.blue(), 0x10);
        assert_eq!(value.red(), 0x20);
    }

    #[test]
    fn volume_db() {
        assert_eq!(Volume::from_db(-6.0), Volume(-1536));
        assert_eq!(Volume(0x0100).as_db(), 1.0);
        assert_eq!(format!("{:?}", Volume::SILENCE), "-inf dB");
        assert_eq!(Volume::decode(&[0x00, 0x80]), Volume::SILENCE);
    }

    #[test]
    fn region_of_interest_layout() {
        let roi = RegionOfInterest {
            top: 1,
            left: 2,
            bottom: 480,
            right: 640,
            auto_controls: RoiAutoControls::AUTO_EXPOSURE | RoiAutoControls::AUTO_FOCUS,
        };
        let buf = encode_value(&roi);
        assert_eq!(buf, [1, 0, 2, 0, 0xE0, 0x01, 0x80, 0x02, 0x09, 0x00]);
        assert_eq!(RegionOfInterest::decode(&buf), roi);
    }

    #[test]
    fn invalid_enum_values_fall_back() {
        assert_eq!(PowerLineFrequency::decode(&[7]), PowerLineFrequency::Disabled);
        assert_eq!(AnalogVideoStandard::decode(&[9]), AnalogVideoStandard::None);
        assert!(bool::decode(&[2]));
    }
}

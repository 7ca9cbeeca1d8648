//! Audio feature unit controls.
//!
//! Every feature unit control is addressed per logical channel: channel 0 is the master channel
//! and affects all channels, 1.. address individual channels. Each channel advertises its own
//! set of controls in `bmaControls`.

use crate::{
    audio::{FeatureUnitDesc, FeatureUnitId},
    control::{self, ControlValue},
    error::{Action, Error, ErrorKind},
    request::{Request, Target},
    Device, Result,
};

/// Grants access to the controls of an audio feature unit.
pub struct FeatureUnit<'a> {
    device: &'a Device,
    interface: u8,
    desc: &'a FeatureUnitDesc,
}

impl<'a> FeatureUnit<'a> {
    pub(crate) fn new(device: &'a Device, interface: u8, desc: &'a FeatureUnitDesc) -> Self {
        Self {
            device,
            interface,
            desc,
        }
    }

    pub fn id(&self) -> FeatureUnitId {
        self.desc.id()
    }

    pub fn desc(&self) -> &FeatureUnitDesc {
        self.desc
    }

    /// Number of logical channels, not counting the master channel.
    pub fn num_channels(&self) -> u8 {
        self.desc.num_channels()
    }

    /// Whether `channel` advertises control `C`.
    pub fn supports<C: FeatureControl>(&self, channel: u8) -> bool {
        self.desc.supports_bit(channel, C::ID.bit())
    }

    pub fn read_control<C: FeatureControl>(&self, channel: u8) -> Result<C::Value> {
        self.read::<C>(Request::GetCur, channel)
    }

    pub fn read_control_min<C: FeatureControl>(&self, channel: u8) -> Result<C::Value> {
        self.read::<C>(Request::GetMin, channel)
    }

    pub fn read_control_max<C: FeatureControl>(&self, channel: u8) -> Result<C::Value> {
        self.read::<C>(Request::GetMax, channel)
    }

    pub fn read_control_res<C: FeatureControl>(&self, channel: u8) -> Result<C::Value> {
        self.read::<C>(Request::GetRes, channel)
    }

    pub fn set_control<C: FeatureControl>(&mut self, channel: u8, value: C::Value) -> Result<()> {
        self.check::<C>(channel, Action::WritingControl)?;
        control::write_value(
            self.device.gateway(),
            self.target(),
            C::ID as u8,
            channel,
            &value,
        )
    }

    fn read<C: FeatureControl>(&self, request: Request, channel: u8) -> Result<C::Value> {
        self.check::<C>(channel, Action::ReadingControl)?;
        control::read_value(
            self.device.gateway(),
            self.target(),
            request,
            C::ID as u8,
            channel,
        )
    }

    fn check<C: FeatureControl>(&self, channel: u8, action: Action) -> Result<()> {
        if self.supports::<C>(channel) {
            Ok(())
        } else {
            Err(Error::with_action(
                ErrorKind::NotSupported(format!(
                    "feature unit {} channel {} does not support {:?}",
                    self.id().as_raw(),
                    channel,
                    C::ID
                )),
                action,
            ))
        }
    }

    fn target(&self) -> Target {
        Target::Interface {
            interface: self.interface,
            entity: self.id().as_raw(),
        }
    }
}

/// Feature unit control selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ControlId {
    Mute = 0x01,
    Volume = 0x02,
    Bass = 0x03,
    Mid = 0x04,
    Treble = 0x05,
    AutomaticGain = 0x07,
    Delay = 0x08,
    BassBoost = 0x09,
    Loudness = 0x0A,
}

impl ControlId {
    /// Position of the control in a channel's `bmaControls` bitmask.
    fn bit(self) -> u8 {
        self as u8 - 1
    }
}

/// A feature unit control: its value type and selector.
pub trait FeatureControl {
    type Value: ControlValue;
    const ID: ControlId;
}

macro_rules! feature_controls {
    ( $( $(#[$attr:meta])* $name:ident: $value:ty; )* ) => {
        $(
            $(#[$attr])*
            pub struct $name;
            impl FeatureControl for $name {
                type Value = $value;
                const ID: ControlId = ControlId::$name;
            }
        )*
    };
}

feature_controls! {
    Mute: bool;
    Volume: control::Volume;
    /// Bass gain in 0.25 dB steps.
    Bass: i8;
    Mid: i8;
    Treble: i8;
    AutomaticGain: bool;
    /// Delay in 1/64 ms steps.
    Delay: u16;
    BassBoost: bool;
    Loudness: bool;
}

use crate::{
    control::{self, ControlInfo, ControlValue},
    error::{Action, Error, ErrorKind},
    request::{Request, Target},
    topo::{ProcessingUnitDesc, ProcessingUnitId},
    Device, Result,
};

/// Grants access to a processing unit.
pub struct ProcessingUnit<'a> {
    device: &'a Device,
    interface: u8,
    desc: &'a ProcessingUnitDesc,
}

impl<'a> ProcessingUnit<'a> {
    pub(crate) fn new(device: &'a Device, interface: u8, desc: &'a ProcessingUnitDesc) -> Self {
        Self {
            device,
            interface,
            desc,
        }
    }

    pub fn id(&self) -> ProcessingUnitId {
        self.desc.id()
    }

    pub fn desc(&self) -> &ProcessingUnitDesc {
        self.desc
    }

    pub fn supports<C: ProcessingUnitControl>(&self) -> bool {
        self.desc.supports_bit(C::BIT)
    }

    pub fn read_control<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetCur)
    }

    pub fn read_control_min<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetMin)
    }

    pub fn read_control_max<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetMax)
    }

    pub fn read_control_res<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetRes)
    }

    pub fn read_control_default<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetDef)
    }

    pub fn read_control_info<C: ProcessingUnitControl>(&self) -> Result<ControlInfo> {
        self.read::<C, ControlInfo>(Request::GetInfo)
    }

    pub fn set_control<C: ProcessingUnitControl>(&mut self, value: C::Value) -> Result<()> {
        self.check::<C>(Action::WritingControl)?;
        control::write_value(
            self.device.gateway(),
            self.target(),
            C::ID as u8,
            0,
            &value,
        )
    }

    fn read<C: ProcessingUnitControl, V: ControlValue>(&self, request: Request) -> Result<V> {
        self.check::<C>(Action::ReadingControl)?;
        control::read_value(self.device.gateway(), self.target(), request, C::ID as u8, 0)
    }

    fn check<C: ProcessingUnitControl>(&self, action: Action) -> Result<()> {
        if self.supports::<C>() {
            Ok(())
        } else {
            Err(Error::with_action(
                ErrorKind::NotSupported(format!(
                    "processing unit {} does not support {:?}",
                    self.id().as_raw(),
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

/// Processing unit control selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ControlId {
    BacklightCompensation = 0x01,
    Brightness = 0x02,
    Contrast = 0x03,
    Gain = 0x04,
    PowerLineFrequency = 0x05,
    Hue = 0x06,
    Saturation = 0x07,
    Sharpness = 0x08,
    Gamma = 0x09,
    WhiteBalanceTemperature = 0x0A,
    WhiteBalanceTemperatureAuto = 0x0B,
    WhiteBalanceComponent = 0x0C,
    WhiteBalanceComponentAuto = 0x0D,
    DigitalMultiplier = 0x0E,
    DigitalMultiplierLimit = 0x0F,
    HueAuto = 0x10,
    AnalogVideoStandard = 0x11,
    AnalogVideoLockStatus = 0x12,
    ContrastAuto = 0x13,
}

/// A processing unit control: its value type, selector, and `bmControls` bit.
pub trait ProcessingUnitControl {
    type Value: ControlValue;
    const ID: ControlId;
    const BIT: u8;
}

macro_rules! processing_unit_controls {
    ( $( $(#[$attr:meta])* $name:ident: $value:ty = bit $bit:literal; )* ) => {
        $(
            $(#[$attr])*
            pub struct $name;
            impl ProcessingUnitControl for $name {
                type Value = $value;
                const ID: ControlId = ControlId::$name;
                const BIT: u8 = $bit;
            }
        )*
    };
}

processing_unit_controls! {
    Brightness: i16 = bit 0;
    Contrast: u16 = bit 1;
    Hue: i16 = bit 2;
    Saturation: u16 = bit 3;
    Sharpness: u16 = bit 4;
    Gamma: u16 = bit 5;
    /// Color temperature in Kelvin.
    WhiteBalanceTemperature: u16 = bit 6;
    WhiteBalanceComponent: control::WhiteBalanceComponents = bit 7;
    BacklightCompensation: u16 = bit 8;
    Gain: u16 = bit 9;
    PowerLineFrequency: control::PowerLineFrequency = bit 10;
    HueAuto: bool = bit 11;
    WhiteBalanceTemperatureAuto: bool = bit 12;
    WhiteBalanceComponentAuto: bool = bit 13;
    DigitalMultiplier: u16 = bit 14;
    DigitalMultiplierLimit: u16 = bit 15;
    AnalogVideoStandard: control::AnalogVideoStandard = bit 16;
    /// 0 if the video decoder is locked to the input signal.
    AnalogVideoLockStatus: u8 = bit 17;
    ContrastAuto: bool = bit 18;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testutil, transport::mock::MockTransport};
    use std::sync::Arc;

    fn processing_unit_test(f: impl FnOnce(&MockTransport, ProcessingUnit<'_>)) {
        testutil::init_logger();
        let mock = MockTransport::new((0x046D, 0x0825), testutil::webcam_config());
        let device = Device::with_transport(Arc::new(mock.clone())).unwrap();
        let id = device.processing_unit_ids()[0];
        f(&mock, device.processing_unit_by_id(id).unwrap());
    }

    #[test]
    fn advertised_controls() {
        processing_unit_test(|_, pu| {
            assert!(pu.supports::<Brightness>());
            assert!(pu.supports::<Contrast>());
            assert!(pu.supports::<PowerLineFrequency>());
            assert!(pu.supports::<WhiteBalanceTemperatureAuto>());
            assert!(!pu.supports::<HueAuto>());
            assert!(!pu.supports::<Gain>());
            assert!(!pu.supports::<ContrastAuto>());
        });
    }

    #[test]
    fn brightness_is_signed() {
        processing_unit_test(|mock, pu| {
            mock.respond(0x82, 0x0200, 0x0200, Ok(vec![0xC0, 0xFF]));
            assert_eq!(pu.read_control_min::<Brightness>().unwrap(), -64);
        });
    }

    #[test]
    fn set_power_line_frequency() {
        processing_unit_test(|mock, mut pu| {
            pu.set_control::<PowerLineFrequency>(control::PowerLineFrequency::Freq50Hz)
                .unwrap();
            let call = mock.calls().pop().unwrap();
            assert_eq!(call.value, 0x0500);
            assert_eq!(call.index, 0x0200);
            assert_eq!(call.data, vec![1]);
        });
    }

    #[test]
    fn unsupported_control() {
        processing_unit_test(|mock, pu| {
            let err = pu.read_control::<Gamma>().unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::NotSupported(_)));
            assert!(mock.calls().is_empty());
        });
    }
}

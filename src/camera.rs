use crate::{
    control::{self, ControlInfo, ControlValue},
    error::{Action, Error, ErrorKind},
    request::{Request, Target},
    topo::{CameraId, CameraTerminalDesc},
    Device, Result,
};

/// Grants access to a camera input terminal.
pub struct CameraTerminal<'a> {
    device: &'a Device,
    interface: u8,
    desc: &'a CameraTerminalDesc,
}

impl<'a> CameraTerminal<'a> {
    pub(crate) fn new(device: &'a Device, interface: u8, desc: &'a CameraTerminalDesc) -> Self {
        Self {
            device,
            interface,
            desc,
        }
    }

    pub fn id(&self) -> CameraId {
        self.desc.id()
    }

    pub fn desc(&self) -> &CameraTerminalDesc {
        self.desc
    }

    /// Whether the terminal's `bmControls` advertises control `C`.
    pub fn supports<C: CameraControl>(&self) -> bool {
        self.desc.supports_bit(C::BIT)
    }

    pub fn read_control<C: CameraControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetCur)
    }

    pub fn read_control_min<C: CameraControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetMin)
    }

    pub fn read_control_max<C: CameraControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetMax)
    }

    pub fn read_control_res<C: CameraControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetRes)
    }

    pub fn read_control_default<C: CameraControl>(&self) -> Result<C::Value> {
        self.read::<C, _>(Request::GetDef)
    }

    pub fn read_control_info<C: CameraControl>(&self) -> Result<ControlInfo> {
        self.read::<C, ControlInfo>(Request::GetInfo)
    }

    pub fn set_control<C: CameraControl>(&mut self, value: C::Value) -> Result<()> {
        self.check::<C>(Action::WritingControl)?;
        control::write_value(
            self.device.gateway(),
            self.target(),
            C::ID as u8,
            0,
            &value,
        )
    }

    fn read<C: CameraControl, V: ControlValue>(&self, request: Request) -> Result<V> {
        self.check::<C>(Action::ReadingControl)?;
        control::read_value(self.device.gateway(), self.target(), request, C::ID as u8, 0)
    }

    fn check<C: CameraControl>(&self, action: Action) -> Result<()> {
        if self.supports::<C>() {
            Ok(())
        } else {
            Err(Error::with_action(
                ErrorKind::NotSupported(format!(
                    "camera terminal {} does not support {:?}",
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

/// Camera terminal control selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ControlId {
    ScanningMode = 0x01,
    AutoExposureMode = 0x02,
    AutoExposurePriority = 0x03,
    ExposureTimeAbs = 0x04,
    ExposureTimeRel = 0x05,
    FocusAbs = 0x06,
    FocusRel = 0x07,
    FocusAuto = 0x08,
    IrisAbs = 0x09,
    IrisRel = 0x0A,
    ZoomAbs = 0x0B,
    ZoomRel = 0x0C,
    PanTiltAbs = 0x0D,
    PanTiltRel = 0x0E,
    RollAbs = 0x0F,
    RollRel = 0x10,
    Privacy = 0x11,
    FocusSimple = 0x12,
    Window = 0x13,
    RegionOfInterest = 0x14,
}

/// A camera terminal control: its value type, selector, and `bmControls` bit.
pub trait CameraControl {
    type Value: ControlValue;
    const ID: ControlId;
    const BIT: u8;
}

macro_rules! camera_controls {
    ( $( $(#[$attr:meta])* $name:ident: $value:ty = bit $bit:literal; )* ) => {
        $(
            $(#[$attr])*
            pub struct $name;
            impl CameraControl for $name {
                type Value = $value;
                const ID: ControlId = ControlId::$name;
                const BIT: u8 = $bit;
            }
        )*
    };
}

camera_controls! {
    /// Interlaced (`false`) or progressive (`true`) scanning.
    ScanningMode: bool = bit 0;
    AutoExposureMode: control::AutoExposureMode = bit 1;
    /// 0: constant frame rate, 1: frame rate may vary with exposure.
    AutoExposurePriority: u8 = bit 2;
    ExposureTimeAbs: control::ExposureTimeAbs = bit 3;
    /// Step exposure time up (1), down (-1) or keep it (0).
    ExposureTimeRel: i8 = bit 4;
    /// Focus distance in millimeters.
    FocusAbs: u16 = bit 5;
    FocusRel: control::FocusRel = bit 6;
    /// Aperture setting, in f-stops times 100.
    IrisAbs: u16 = bit 7;
    IrisRel: i8 = bit 8;
    ZoomAbs: u16 = bit 9;
    ZoomRel: control::ZoomRel = bit 10;
    PanTiltAbs: control::PanTiltAbs = bit 11;
    PanTiltRel: control::PanTiltRel = bit 12;
    /// Roll in degrees.
    RollAbs: i16 = bit 13;
    RollRel: control::RollRel = bit 14;
    FocusAuto: bool = bit 17;
    /// Privacy shutter.
    Privacy: bool = bit 18;
    FocusSimple: control::FocusSimple = bit 19;
    Window: control::DigitalWindow = bit 20;
    RegionOfInterest: control::RegionOfInterest = bit 21;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testutil, transport::mock::MockTransport};
    use std::sync::Arc;

    fn webcam() -> (MockTransport, Device) {
        testutil::init_logger();
        let mock = MockTransport::new((0x046D, 0x0825), testutil::webcam_config());
        let device = Device::with_transport(Arc::new(mock.clone())).unwrap();
        (mock, device)
    }

    #[test]
    fn advertised_controls() {
        let (_, device) = webcam();
        let camera = device.camera_terminal_by_id(device.camera_ids()[0]).unwrap();
        assert!(camera.supports::<AutoExposureMode>());
        assert!(camera.supports::<ExposureTimeAbs>());
        assert!(camera.supports::<FocusAbs>());
        assert!(camera.supports::<ZoomAbs>());
        assert!(camera.supports::<FocusAuto>());
        assert!(!camera.supports::<ScanningMode>());
        assert!(!camera.supports::<Privacy>());
        assert!(!camera.supports::<RegionOfInterest>());
    }

    #[test]
    fn read_and_set_exposure() {
        let (mock, device) = webcam();
        let mut camera = device.camera_terminal_by_id(device.camera_ids()[0]).unwrap();

        // wValue = CT_EXPOSURE_TIME_ABSOLUTE << 8, wIndex = terminal 1 on interface 0
        mock.respond(0x81, 0x0400, 0x0100, Ok(vec![0x9C, 0x00, 0x00, 0x00]));
        let exposure = camera.read_control::<ExposureTimeAbs>().unwrap();
        assert_eq!(exposure.as_raw(), 156);

        camera
            .set_control::<AutoExposureMode>(control::AutoExposureMode::MANUAL)
            .unwrap();
        let call = mock.calls().pop().unwrap();
        assert_eq!(call.request_type, 0x21);
        assert_eq!(call.request, 0x01);
        assert_eq!(call.value, 0x0200);
        assert_eq!(call.index, 0x0100);
        assert_eq!(call.data, vec![0x01]);
    }

    #[test]
    fn unsupported_control_is_rejected_without_io() {
        let (mock, device) = webcam();
        let mut camera = device.camera_terminal_by_id(device.camera_ids()[0]).unwrap();
        let err = camera.read_control::<Privacy>().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotSupported(_)));
        let err = camera.set_control::<IrisRel>(1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotSupported(_)));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn short_response_is_an_error() {
        let (mock, device) = webcam();
        let camera = device.camera_terminal_by_id(device.camera_ids()[0]).unwrap();
        mock.respond(0x83, 0x0B00, 0x0100, Ok(vec![0x10]));
        let err = camera.read_control_max::<ZoomAbs>().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ShortBuffer));
    }
}

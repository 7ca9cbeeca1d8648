//! Lists the current values of the camera, processing unit and feature unit controls.

use std::{any::type_name, fmt::Debug};

use avusb::{
    audio::feature_unit::{self, FeatureControl, FeatureUnit},
    camera::*,
    processing_unit::*,
    Device,
};
use rusb::UsbContext;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let ctx = rusb::Context::new()?;
    for usb in ctx.devices()?.iter() {
        let handle = match usb.open() {
            Ok(handle) => handle,
            Err(_) => continue,
        };
        let dev = match Device::from_handle(handle) {
            Ok(dev) => dev,
            Err(e) => {
                log::debug!("{:?}: {}", usb, e);
                continue;
            }
        };

        println!("{:04x}:{:04x}", dev.vendor_id(), dev.product_id());
        if let Err(e) = list_controls(&dev) {
            eprintln!("error: {}", e);
            eprintln!("(skipping device)");
        }
    }

    Ok(())
}

fn list_controls(dev: &Device) -> avusb::Result<()> {
    for id in dev.camera_ids() {
        println!("Camera Terminal controls ({:?}):", id);
        let cam = dev.camera_terminal_by_id(id)?;
        print_cam_control::<ScanningMode>(&cam)?;
        print_cam_control::<AutoExposureMode>(&cam)?;
        print_cam_control::<AutoExposurePriority>(&cam)?;
        print_cam_control::<ExposureTimeAbs>(&cam)?;
        print_cam_control::<FocusAbs>(&cam)?;
        print_cam_control::<FocusAuto>(&cam)?;
        print_cam_control::<IrisAbs>(&cam)?;
        print_cam_control::<ZoomAbs>(&cam)?;
        print_cam_control::<PanTiltAbs>(&cam)?;
        print_cam_control::<RollAbs>(&cam)?;
        print_cam_control::<Privacy>(&cam)?;
    }

    for id in dev.processing_unit_ids() {
        println!("Processing Unit controls ({:?}):", id);
        let pu = dev.processing_unit_by_id(id)?;
        print_pu_control::<Brightness>(&pu)?;
        print_pu_control::<Contrast>(&pu)?;
        print_pu_control::<Hue>(&pu)?;
        print_pu_control::<Saturation>(&pu)?;
        print_pu_control::<Sharpness>(&pu)?;
        print_pu_control::<Gamma>(&pu)?;
        print_pu_control::<WhiteBalanceTemperature>(&pu)?;
        print_pu_control::<WhiteBalanceTemperatureAuto>(&pu)?;
        print_pu_control::<BacklightCompensation>(&pu)?;
        print_pu_control::<Gain>(&pu)?;
        print_pu_control::<PowerLineFrequency>(&pu)?;
    }

    for id in dev.feature_unit_ids() {
        println!("Feature Unit controls ({:?}):", id);
        let fu = dev.feature_unit_by_id(id)?;
        for channel in 0..=fu.num_channels() {
            print_fu_control::<feature_unit::Mute>(&fu, channel)?;
            print_fu_control::<feature_unit::Volume>(&fu, channel)?;
            print_fu_control::<feature_unit::AutomaticGain>(&fu, channel)?;
        }
    }

    Ok(())
}

fn short_name<C>() -> &'static str {
    let name = type_name::<C>();
    name.rsplit("::").next().unwrap_or(name)
}

fn print_cam_control<C: CameraControl>(cam: &CameraTerminal<'_>) -> avusb::Result<()>
where
    C::Value: Debug,
{
    if !cam.supports::<C>() {
        return Ok(());
    }
    println!(
        "- {}: {:?} ({:?}-{:?}, step {:?}, default {:?})",
        short_name::<C>(),
        cam.read_control::<C>()?,
        cam.read_control_min::<C>()?,
        cam.read_control_max::<C>()?,
        cam.read_control_res::<C>()?,
        cam.read_control_default::<C>()?,
    );
    Ok(())
}

fn print_pu_control<C: ProcessingUnitControl>(pu: &ProcessingUnit<'_>) -> avusb::Result<()>
where
    C::Value: Debug,
{
    if !pu.supports::<C>() {
        return Ok(());
    }
    println!(
        "- {}: {:?} ({:?}-{:?}, step {:?}, default {:?})",
        short_name::<C>(),
        pu.read_control::<C>()?,
        pu.read_control_min::<C>()?,
        pu.read_control_max::<C>()?,
        pu.read_control_res::<C>()?,
        pu.read_control_default::<C>()?,
    );
    Ok(())
}

fn print_fu_control<C: FeatureControl>(fu: &FeatureUnit<'_>, channel: u8) -> avusb::Result<()>
where
    C::Value: Debug,
{
    if !fu.supports::<C>(channel) {
        return Ok(());
    }
    println!(
        "- channel {} {}: {:?}",
        channel,
        short_name::<C>(),
        fu.read_control::<C>(channel)?,
    );
    Ok(())
}

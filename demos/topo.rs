//! Prints the video and audio functions of every supported device.

use avusb::Device;
use rusb::UsbContext;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let ctx = rusb::Context::new()?;
    for usb in ctx.devices()?.iter() {
        let desc = usb.device_descriptor()?;
        let handle = match usb.open() {
            Ok(handle) => handle,
            Err(e) => {
                log::debug!("{:?}: {}", usb, e);
                continue;
            }
        };
        let dev = match Device::from_handle(handle) {
            Ok(dev) => dev,
            Err(e) => {
                log::debug!("{:04x}:{:04x}: {}", desc.vendor_id(), desc.product_id(), e);
                continue;
            }
        };

        println!("{:04x}:{:04x}", dev.vendor_id(), dev.product_id());
        if let Some(topo) = dev.topology() {
            println!("{:#?}", topo);
        }
        for vs in dev.streaming_interfaces() {
            println!("video streaming interface {}:", vs.id().as_raw());
            for format in vs.formats() {
                let fourcc = format.fourcc().map(|f| f.to_string());
                println!(
                    "  format {} {}",
                    format.index().as_raw(),
                    fourcc.as_deref().unwrap_or("(no GUID)")
                );
                for frame in format.frames() {
                    println!(
                        "    frame {}: {}x{} @ {:?}",
                        frame.index().as_raw(),
                        frame.width(),
                        frame.height(),
                        frame.default_frame_interval()
                    );
                }
            }
        }
        if let Some(topo) = dev.audio_topology() {
            println!("{:#?}", topo);
        }
        for as_desc in dev.audio_streaming_interfaces() {
            println!("{:#?}", as_desc);
        }
    }

    Ok(())
}

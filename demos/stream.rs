//! Streams from the first supported device: video frames if it has a video function, audio
//! buffers otherwise.
//!
//! Usage: `stream [VID:PID] [COUNT]`

use std::env;

use avusb::Device;
use rusb::UsbContext;

fn parse_ids(arg: &str) -> Option<(u16, u16)> {
    let (vid, pid) = arg.split_once(':')?;
    Some((
        u16::from_str_radix(vid, 16).ok()?,
        u16::from_str_radix(pid, 16).ok()?,
    ))
}

fn open(filter: Option<(u16, u16)>) -> Result<Option<Device>, Box<dyn std::error::Error>> {
    let ctx = rusb::Context::new()?;
    for usb in ctx.devices()?.iter() {
        let desc = usb.device_descriptor()?;
        if let Some(ids) = filter {
            if ids != (desc.vendor_id(), desc.product_id()) {
                continue;
            }
        }
        let handle = match usb.open() {
            Ok(handle) => handle,
            Err(_) => continue,
        };
        match Device::from_handle(handle) {
            Ok(dev) => return Ok(Some(dev)),
            Err(e) => log::debug!("{:?}: {}", usb, e),
        }
    }
    Ok(None)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let filter = args.next().as_deref().and_then(parse_ids);
    let count: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 30,
    };

    let dev = match open(filter)? {
        Some(dev) => dev,
        None => {
            eprintln!("no supported devices found");
            return Ok(());
        }
    };

    if let Some(desc) = dev.streaming_interfaces().first() {
        let format = match desc.formats().first() {
            Some(format) => format,
            None => {
                eprintln!("streaming interface has no formats");
                return Ok(());
            }
        };
        let frame = match format
            .default_frame_index()
            .or_else(|| format.frames().first().map(|f| f.index()))
        {
            Some(frame) => frame,
            None => {
                eprintln!("format has no frames");
                return Ok(());
            }
        };
        let mut interface = dev.streaming_interface_by_id(desc.id())?;
        let mut stream = interface.start_stream(format.index(), frame, &dev.stream_options())?;
        println!("stream started: {:?}", stream.probe_commit());

        for _ in 0..count {
            let frame = stream.read_frame()?;
            println!(
                "frame: {} bytes in {} payloads, pts={:?}, error={}",
                frame.data().len(),
                frame.num_payloads(),
                frame.pts(),
                frame.has_error()
            );
        }
        stream.close()?;
        println!("{} malformed payloads dropped", stream.dropped_payloads());
    } else if let Some(desc) = dev.audio_streaming_interfaces().first() {
        let alt = match desc.alt_settings().first() {
            Some(alt) => alt,
            None => {
                eprintln!("audio streaming interface has no usable alternate settings");
                return Ok(());
            }
        };
        let rate = match alt.format_type().sample_rates().max() {
            Some(rate) => rate,
            None => {
                eprintln!("alternate setting lists no sampling frequencies");
                return Ok(());
            }
        };
        let mut interface = dev.audio_streaming_interface_by_id(desc.interface_number())?;
        let mut stream =
            interface.start_stream(alt.alt_setting(), rate, &dev.stream_options())?;
        println!("audio stream started: {:?}", stream.format());

        for _ in 0..count {
            let buffer = stream.read_buffer()?;
            println!("buffer: {} bytes", buffer.data.len());
        }
        stream.close()?;
    } else {
        eprintln!("device has no streaming interfaces");
    }

    Ok(())
}

//! Descriptor builders and device fixtures shared by the unit tests.

use crate::config::{
    DESC_TYPE_CONFIGURATION, DESC_TYPE_ENDPOINT, DESC_TYPE_INTERFACE,
    DESC_TYPE_SS_ENDPOINT_COMPANION,
};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Assembles a configuration descriptor blob with correct `bLength` and `wTotalLength` fields.
pub(crate) struct ConfigBuilder {
    body: Vec<u8>,
    num_interfaces: u8,
}

impl ConfigBuilder {
    pub(crate) fn new() -> Self {
        Self {
            body: Vec::new(),
            num_interfaces: 0,
        }
    }

    pub(crate) fn interface(mut self, num: u8, alt: u8, class: u8, subclass: u8, proto: u8) -> Self {
        if alt == 0 {
            self.num_interfaces += 1;
        }
        // `bNumEndpoints` is informational only; the parser counts the endpoint records.
        self.body.extend_from_slice(&[
            9,
            DESC_TYPE_INTERFACE,
            num,
            alt,
            0,
            class,
            subclass,
            proto,
            0,
        ]);
        self
    }

    pub(crate) fn endpoint(mut self, addr: u8, attrs: u8, max_packet_raw: u16, interval: u8) -> Self {
        let [lo, hi] = max_packet_raw.to_le_bytes();
        self.body
            .extend_from_slice(&[7, DESC_TYPE_ENDPOINT, addr, attrs, lo, hi, interval]);
        self
    }

    pub(crate) fn ss_companion(mut self, max_burst: u8, attrs: u8, bytes_per_interval: u16) -> Self {
        let [lo, hi] = bytes_per_interval.to_le_bytes();
        self.body.extend_from_slice(&[
            6,
            DESC_TYPE_SS_ENDPOINT_COMPANION,
            max_burst,
            attrs,
            lo,
            hi,
        ]);
        self
    }

    /// Appends a record given everything but its length byte.
    pub(crate) fn raw(mut self, body: &[u8]) -> Self {
        self.body.push(body.len() as u8 + 1);
        self.body.extend_from_slice(body);
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let total = (self.body.len() + 9) as u16;
        let [lo, hi] = total.to_le_bytes();
        let mut out = vec![
            9,
            DESC_TYPE_CONFIGURATION,
            lo,
            hi,
            self.num_interfaces,
            1,
            0,
            0x80,
            250,
        ];
        out.extend_from_slice(&self.body);
        out
    }
}

/// Wire layout of the YUY2 format GUID.
pub(crate) const YUY2_GUID: [u8; 16] = [
    0x59, 0x55, 0x59, 0x32, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

/// `VS_FRAME_UNCOMPRESSED` with two discrete intervals (30 and 15 fps).
pub(crate) fn uncompressed_frame(index: u8, width: u16, height: u16) -> Vec<u8> {
    let size = u32::from(width) * u32::from(height) * 2;
    let mut rec = vec![0x24, 0x05, index, 0x00];
    rec.extend_from_slice(&width.to_le_bytes());
    rec.extend_from_slice(&height.to_le_bytes());
    rec.extend_from_slice(&(size * 8 * 15).to_le_bytes());
    rec.extend_from_slice(&(size * 8 * 30).to_le_bytes());
    rec.extend_from_slice(&size.to_le_bytes());
    rec.extend_from_slice(&333_333u32.to_le_bytes());
    rec.push(2);
    rec.extend_from_slice(&333_333u32.to_le_bytes());
    rec.extend_from_slice(&666_666u32.to_le_bytes());
    rec
}

/// A UVC 1.1 webcam: a VC interface with a camera terminal and a processing unit, and a VS
/// interface (number 1) with one YUY2 format of two frames.
///
/// The VS interface has a zero-bandwidth alt 0 and isochronous alts of 1024 and 3072 bytes.
pub(crate) fn webcam_config() -> Vec<u8> {
    let mut format = vec![0x24, 0x04, 0x01, 0x02];
    format.extend_from_slice(&YUY2_GUID);
    format.extend_from_slice(&[16, 1, 0, 0, 0, 0]);

    ConfigBuilder::new()
        .interface(0, 0, 0x0E, 0x01, 0)
        // VC_HEADER, UVC 1.10, one streaming interface (1)
        .raw(&[0x24, 0x01, 0x10, 0x01, 0x33, 0x00, 0x80, 0x8D, 0x5B, 0x00, 0x01, 0x01])
        // camera terminal 1: AE mode, exposure abs, focus abs, zoom abs, focus auto
        .raw(&[
            0x24, 0x02, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03,
            0x2A, 0x02, 0x02,
        ])
        // processing unit 2: brightness, contrast, power line freq, WB temp auto
        .raw(&[0x24, 0x05, 0x02, 0x01, 0x00, 0x00, 0x02, 0x03, 0x14, 0x00, 0x00])
        // output terminal 3 (USB streaming), source 2
        .raw(&[0x24, 0x03, 0x03, 0x01, 0x01, 0x00, 0x02, 0x00])
        .endpoint(0x83, 0x03, 16, 6)
        .raw(&[0x25, 0x03, 0x10, 0x00])
        .interface(1, 0, 0x0E, 0x02, 0)
        // VS_INPUT_HEADER: 1 format, endpoint 0x81, terminal link 3
        .raw(&[0x24, 0x01, 0x01, 0x00, 0x00, 0x81, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00])
        .raw(&format)
        .raw(&uncompressed_frame(1, 640, 480))
        .raw(&uncompressed_frame(2, 1280, 720))
        .raw(&[0x24, 0x0D, 0x01, 0x01, 0x04])
        .interface(1, 1, 0x0E, 0x02, 0)
        .endpoint(0x81, 0x05, 0x0400, 1)
        .interface(1, 2, 0x0E, 0x02, 0)
        .endpoint(0x81, 0x05, 0x1400, 1)
        .build()
}

/// A bulk-streaming UVC 1.5 camera with an MJPEG format on interface 1.
pub(crate) fn bulk_camera_config() -> Vec<u8> {
    let mut frame = vec![0x24, 0x07, 0x01, 0x00];
    frame.extend_from_slice(&1920u16.to_le_bytes());
    frame.extend_from_slice(&1080u16.to_le_bytes());
    frame.extend_from_slice(&1_000_000u32.to_le_bytes());
    frame.extend_from_slice(&100_000_000u32.to_le_bytes());
    frame.extend_from_slice(&(1920u32 * 1080 * 2).to_le_bytes());
    frame.extend_from_slice(&333_333u32.to_le_bytes());
    frame.push(1);
    frame.extend_from_slice(&333_333u32.to_le_bytes());

    ConfigBuilder::new()
        .interface(0, 0, 0x0E, 0x01, 0)
        .raw(&[0x24, 0x01, 0x50, 0x01, 0x1E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01])
        .raw(&[0x24, 0x03, 0x02, 0x01, 0x01, 0x00, 0x01, 0x00])
        .raw(&[
            0x24, 0x02, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03,
            0x00, 0x00, 0x00,
        ])
        .interface(1, 0, 0x0E, 0x02, 0)
        .raw(&[0x24, 0x01, 0x01, 0x00, 0x00, 0x82, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00])
        .raw(&[0x24, 0x06, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00])
        .raw(&frame)
        .endpoint(0x82, 0x02, 512, 0)
        .build()
}

/// A UAC1 microphone: AC interface 0 (input terminal 1, feature unit 2, output terminal 3) and
/// an AS interface 1 with a zero-bandwidth alt 0 and a 16-bit stereo PCM alt 1.
pub(crate) fn microphone_config() -> Vec<u8> {
    ConfigBuilder::new()
        .interface(0, 0, 0x01, 0x01, 0)
        // AC header, UAC 1.00, one streaming interface (1)
        .raw(&[0x24, 0x01, 0x00, 0x01, 0x28, 0x00, 0x01, 0x01])
        // input terminal 1: microphone, 2 channels
        .raw(&[0x24, 0x02, 0x01, 0x01, 0x02, 0x00, 0x02, 0x03, 0x00, 0x00, 0x00])
        // feature unit 2, source 1, 1-byte controls: master mute+volume, ch1/ch2 volume
        .raw(&[0x24, 0x06, 0x02, 0x01, 0x01, 0x03, 0x02, 0x02, 0x00])
        // output terminal 3: USB streaming, source 2
        .raw(&[0x24, 0x03, 0x03, 0x01, 0x01, 0x00, 0x02, 0x00])
        .interface(1, 0, 0x01, 0x02, 0)
        .interface(1, 1, 0x01, 0x02, 0)
        // AS_GENERAL: terminal link 3, delay 1, PCM
        .raw(&[0x24, 0x01, 0x03, 0x01, 0x01, 0x00])
        // FORMAT_TYPE I: 2 channels, 2 bytes, 16 bits, 44.1 kHz and 48 kHz
        .raw(&[0x24, 0x02, 0x01, 0x02, 0x02, 0x10, 0x02, 0x44, 0xAC, 0x00, 0x80, 0xBB, 0x00])
        .endpoint(0x84, 0x05, 192, 1)
        // EP_GENERAL: sampling frequency control
        .raw(&[0x25, 0x01, 0x01, 0x00, 0x00, 0x00])
        .build()
}

//! UVC payload headers.
//!
//! Every payload (one bulk transfer, or one isochronous packet) starts with a header holding its
//! own length, a bitmap of flags, and optional presentation and source clock timestamps.

use std::fmt;

use bitflags::bitflags;
use byteorder::{ByteOrder, LE};

use crate::{
    error::{Error, ErrorKind},
    Result,
};

/// Longest header defined by UVC 1.5 (flags, PTS and SCR).
pub const MAX_HEADER_LEN: usize = 12;

const PTS_LEN: usize = 4;
const SCR_LEN: usize = 6;

bitflags! {
    /// `bmHeaderInfo`.
    pub struct HeaderFlags: u8 {
        /// Frame ID, toggles at every frame boundary.
        const FID = 0x01;
        /// End of frame.
        const EOF = 0x02;
        const PTS = 0x04;
        const SCR = 0x08;
        /// Reserved in UVC 1.1; end of slice in UVC 1.5 payloads that use it.
        const RES = 0x10;
        const STILL = 0x20;
        const ERR = 0x40;
        /// End of header; always set by conforming devices.
        const EOH = 0x80;
    }
}

/// Source clock reference: the device's source time clock and the USB SOF token counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scr {
    pub stc: u32,
    pub token: u16,
}

/// A decoded payload header.
#[derive(Clone, PartialEq, Eq)]
pub struct PayloadHeader {
    len: u8,
    flags: HeaderFlags,
    pts: Option<u32>,
    scr: Option<Scr>,
    extra: Vec<u8>,
}

impl PayloadHeader {
    /// Builds a header; its length is derived from the optional fields present.
    pub fn new(flags: HeaderFlags, pts: Option<u32>, scr: Option<Scr>) -> Self {
        let mut flags = flags - (HeaderFlags::PTS | HeaderFlags::SCR);
        let mut len = 2;
        if pts.is_some() {
            flags |= HeaderFlags::PTS;
            len += PTS_LEN;
        }
        if scr.is_some() {
            flags |= HeaderFlags::SCR;
            len += SCR_LEN;
        }
        Self {
            len: len as u8,
            flags,
            pts,
            scr,
            extra: Vec::new(),
        }
    }

    /// Decodes the header at the start of `payload`.
    ///
    /// Fails with `ShortBuffer` if `payload` is shorter than the header's declared length, and
    /// with `InvalidDescriptor` if the declared length can't hold the fields its flags announce.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let len = match payload.first() {
            Some(&len) => len,
            None => return Err(Error::new(ErrorKind::ShortBuffer)),
        };
        let header_len = usize::from(len);
        if header_len < 2 {
            return Err(Error::new(ErrorKind::InvalidDescriptor(format!(
                "payload header length {} is too short",
                len
            ))));
        }
        if payload.len() < header_len {
            return Err(Error::new(ErrorKind::ShortBuffer));
        }

        let flags = HeaderFlags::from_bits_truncate(payload[1]);
        let mut needed = 2;
        if flags.contains(HeaderFlags::PTS) {
            needed += PTS_LEN;
        }
        if flags.contains(HeaderFlags::SCR) {
            needed += SCR_LEN;
        }
        if header_len < needed {
            return Err(Error::new(ErrorKind::InvalidDescriptor(format!(
                "payload header of length {} cannot hold the fields of flags {:?}",
                len, flags
            ))));
        }

        let mut rest = &payload[2..header_len];
        let pts = if flags.contains(HeaderFlags::PTS) {
            let pts = LE::read_u32(rest);
            rest = &rest[PTS_LEN..];
            Some(pts)
        } else {
            None
        };
        let scr = if flags.contains(HeaderFlags::SCR) {
            let scr = Scr {
                stc: LE::read_u32(rest),
                token: LE::read_u16(&rest[4..]),
            };
            rest = &rest[SCR_LEN..];
            Some(scr)
        } else {
            None
        };

        Ok(Self {
            len,
            flags,
            pts,
            scr,
            extra: rest.to_vec(),
        })
    }

    /// Appends the encoded header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.len);
        out.push(self.flags.bits());
        if let Some(pts) = self.pts {
            out.extend_from_slice(&pts.to_le_bytes());
        }
        if let Some(scr) = self.scr {
            out.extend_from_slice(&scr.stc.to_le_bytes());
            out.extend_from_slice(&scr.token.to_le_bytes());
        }
        out.extend_from_slice(&self.extra);
    }

    /// `bHeaderLength`, the number of bytes preceding the payload data.
    pub fn header_len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn flags(&self) -> HeaderFlags {
        self.flags
    }

    pub fn fid(&self) -> bool {
        self.flags.contains(HeaderFlags::FID)
    }

    pub fn eof(&self) -> bool {
        self.flags.contains(HeaderFlags::EOF)
    }

    pub fn error(&self) -> bool {
        self.flags.contains(HeaderFlags::ERR)
    }

    pub fn still(&self) -> bool {
        self.flags.contains(HeaderFlags::STILL)
    }

    /// Presentation time stamp, in device clock units.
    pub fn pts(&self) -> Option<u32> {
        self.pts
    }

    pub fn scr(&self) -> Option<Scr> {
        self.scr
    }

    /// Format-specific header bytes following the timestamps (eg. the H.264 SLI).
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }
}

impl fmt::Debug for PayloadHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PayloadHeader");
        s.field("len", &self.len).field("flags", &self.flags);
        if let Some(pts) = self.pts {
            s.field("pts", &pts);
        }
        if let Some(scr) = &self.scr {
            s.field("scr", scr);
        }
        if !self.extra.is_empty() {
            s.field("extra", &format_args!("{:02x?}", self.extra));
        }
        s.finish()
    }
}

/// Splits a payload into its header and data.
pub fn split_payload(payload: &[u8]) -> Result<(PayloadHeader, &[u8])> {
    let header = PayloadHeader::decode(payload)?;
    let data = &payload[header.header_len()..];
    Ok((header, data))
}

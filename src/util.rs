use std::{
    fmt,
    io::{self, Read},
    time::Duration,
};

use byteorder::{ReadBytesExt, LE};
use uuid::Uuid;

use crate::topo::{SourceId, TermId, UnitId};

/// primitive_enum! {}
macro_rules! primitive_enum {
    (
        $v:vis enum $name:ident: $native:ty {
            $(
                $( #[$variant_attrs:meta] )*
                $variant:ident = $value:expr
            ),+
            $(,)?
        }
    ) => {
        #[derive(Clone, Copy, PartialEq, Eq)]
        $v enum $name {
            $(
                $( #[$variant_attrs] )*
                $variant = $value,
            )+
        }

        impl $name {
            #[allow(dead_code)]
            pub(crate) fn from_raw(raw: $native) -> Option<Self> {
                match raw {
                    $(
                        $value => Some(Self::$variant),
                    )+
                    _ => None,
                }
            }
        }

        #[allow(unreachable_patterns)]
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match *self {
                    $(
                        Self::$variant => f.write_str(stringify!($variant)),
                    )+
                }
            }
        }
    };
}

/// Splits a buffer of concatenated, length-prefixed USB descriptors.
///
/// Yields `(bDescriptorType, whole record)`. A record whose `bLength` is smaller than 2 or runs
/// past the end of the buffer is an error, as is a single dangling byte at the end.
pub(crate) fn split_descriptors(mut raw: &[u8]) -> impl Iterator<Item = io::Result<(u8, &[u8])>> {
    std::iter::from_fn(move || match raw {
        [length, descriptor_type, ..] => {
            let length = *length as usize;
            if length < 2 {
                raw = &[];
                return Some(io_err_res(format!("descriptor length {} is invalid", length)));
            }
            if length > raw.len() {
                let msg = format!(
                    "descriptor length {} exceeds available data ({} bytes)",
                    length,
                    raw.len()
                );
                raw = &[];
                return Some(io_err_res(msg));
            }
            let descriptor_type = *descriptor_type;
            let (desc_data, next) = raw.split_at(length);

            raw = next;

            Some(Ok((descriptor_type, desc_data)))
        }
        [] => None,
        _ => {
            log::warn!("invalid trailing descriptor bytes: {:x?}", raw);
            raw = &[];
            Some(Err(io::ErrorKind::UnexpectedEof.into()))
        }
    })
}

pub(crate) trait BytesExt {
    fn read_bitmask(&mut self, len: u8) -> io::Result<u32>;
    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>>;
    fn read_nonzero_source_id(&mut self) -> io::Result<SourceId>;
    fn read_nonzero_term_id(&mut self) -> io::Result<TermId>;
    fn read_nonzero_unit_id(&mut self) -> io::Result<UnitId>;
    fn read_guid(&mut self) -> io::Result<Uuid>;
    fn read_time_100ns(&mut self) -> io::Result<Duration>;
    fn read_u24_le(&mut self) -> io::Result<u32>;
}

impl BytesExt for &'_ [u8] {
    fn read_bitmask(&mut self, len: u8) -> io::Result<u32> {
        let len = usize::from(len);
        if len > self.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if len > 4 {
            log::warn!("bitmask length {}, discarding data past 32 bits", len);
        }

        let (bytes, rest) = self.split_at(len);
        *self = rest;

        let mut buf = [0u8; 4];
        buf.iter_mut()
            .zip(bytes)
            .for_each(|(dest, src)| *dest = *src);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        if len > self.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let (bytes, rest) = self.split_at(len);
        *self = rest;
        Ok(bytes.to_vec())
    }

    fn read_nonzero_source_id(&mut self) -> io::Result<SourceId> {
        SourceId::new(self.read_u8()?)
            .ok_or_else(|| io_err("bSourceID is 0, only non-zero numbers are allowed"))
    }

    fn read_nonzero_term_id(&mut self) -> io::Result<TermId> {
        TermId::new(self.read_u8()?)
            .ok_or_else(|| io_err("bTerminalID is 0, only non-zero numbers are allowed"))
    }

    fn read_nonzero_unit_id(&mut self) -> io::Result<UnitId> {
        UnitId::new(self.read_u8()?)
            .ok_or_else(|| io_err("bUnitID is 0, only non-zero numbers are allowed"))
    }

    fn read_guid(&mut self) -> io::Result<Uuid> {
        let mut wire = [0; 16];
        self.read_exact(&mut wire)?;
        Ok(guid_from_wire(wire))
    }

    fn read_time_100ns(&mut self) -> io::Result<Duration> {
        let units = self.read_u32::<LE>()?;
        Ok(Duration::from_nanos(u64::from(units) * 100))
    }

    fn read_u24_le(&mut self) -> io::Result<u32> {
        self.read_u24::<LE>()
    }
}

/// Converts a GUID from its USB wire layout to a canonical [`Uuid`].
///
/// USB-IF encodes the first three GUID groups as little-endian integers and the last two groups
/// as plain bytes, so only the first 8 bytes get swapped.
pub(crate) fn guid_from_wire(wire: [u8; 16]) -> Uuid {
    let mut bytes = wire;
    bytes[0..4].reverse();
    bytes[4..6].reverse();
    bytes[6..8].reverse();
    Uuid::from_bytes(bytes)
}

/// Inverse of [`guid_from_wire`].
#[cfg(test)]
pub(crate) fn guid_to_wire(guid: &Uuid) -> [u8; 16] {
    let mut bytes = *guid.as_bytes();
    bytes[0..4].reverse();
    bytes[4..6].reverse();
    bytes[6..8].reverse();
    bytes
}

/// Tests a bit in a little-endian `bmControls` bitmask of arbitrary length.
///
/// Bitmasks from older devices can be shorter than current UVC revisions define; missing bits
/// are `false`.
pub(crate) fn feature_bit_set(bitmask: &[u8], bit: u8) -> bool {
    let byte = usize::from(bit / 8);
    bitmask
        .get(byte)
        .map_or(false, |b| b & (1 << (bit % 8)) != 0)
}

pub(crate) fn duration_to_100ns(dur: Duration) -> u32 {
    let units = dur.as_nanos() / 100;
    units.min(u128::from(u32::MAX)) as u32
}

pub(crate) fn io_err_res<T, M>(msg: M) -> io::Result<T>
where
    M: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Err(io_err(msg))
}

pub(crate) fn io_err<M>(msg: M) -> io::Error
where
    M: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::Other, msg)
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BcdVersion(pub(crate) u16);

impl BcdVersion {
    pub const UVC_1_0: Self = Self(0x0100);
    pub const UVC_1_1: Self = Self(0x0110);
    pub const UVC_1_5: Self = Self(0x0150);

    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for BcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let maj = self.0 >> 8;
        let min = self.0 & 0xff;
        write!(f, "{:x}.{:02x}", maj, min)
    }
}

impl fmt::Debug for BcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuy2_guid() {
        let wire = [
            0x59, 0x55, 0x59, 0x32, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38,
            0x9B, 0x71,
        ];
        let guid = (&wire[..]).read_guid().unwrap();
        assert_eq!(
            guid,
            Uuid::parse_str("32595559-0000-0010-8000-00AA00389B71").unwrap()
        );
        assert_eq!(guid_to_wire(&guid), wire);
    }

    #[test]
    fn split_rejects_overlong_record() {
        let raw = [0x03, 0x24, 0x01, 0x09, 0x24];
        let mut it = split_descriptors(&raw);
        assert_eq!(it.next().unwrap().unwrap(), (0x24, &raw[..3]));
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn split_rejects_zero_length() {
        let raw = [0x00, 0x24, 0x01];
        let mut it = split_descriptors(&raw);
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn split_dangling_byte_is_eof() {
        let raw = [0x02, 0x24, 0x07];
        let res = split_descriptors(&raw).collect::<Vec<_>>();
        assert_eq!(res.len(), 2);
        assert_eq!(
            res[1].as_ref().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn short_bitmask_is_zero_extended() {
        let mut raw: &[u8] = &[0x0F, 0x01, 0xAA];
        assert_eq!(raw.read_bitmask(2).unwrap(), 0x010F);
        assert_eq!(raw, &[0xAA]);
    }

    #[test]
    fn feature_bits_past_the_end_are_clear() {
        let mask = [0b0000_0001, 0b1000_0000];
        assert!(feature_bit_set(&mask, 0));
        assert!(!feature_bit_set(&mask, 1));
        assert!(feature_bit_set(&mask, 15));
        assert!(!feature_bit_set(&mask, 16));
        assert!(!feature_bit_set(&[], 0));
    }

    #[test]
    fn bcd_display() {
        assert_eq!(BcdVersion::UVC_1_5.to_string(), "1.50");
        assert_eq!(BcdVersion(0x0100).to_string(), "1.00");
        assert!(BcdVersion::UVC_1_1 < BcdVersion::UVC_1_5);
    }
}

//! Class-specific descriptor records.
//!
//! UVC and UAC hang their class-specific descriptors off the standard interface and endpoint
//! descriptors. Each record starts with `bLength`, `bDescriptorType` (`CS_INTERFACE` or
//! `CS_ENDPOINT`) and `bDescriptorSubtype`; the meaning of everything after that depends on the
//! interface class and the subtype.

use crate::{
    error::{Action, ResultExt},
    util::split_descriptors,
    Result,
};

pub const CS_INTERFACE: u8 = 0x24;
pub const CS_ENDPOINT: u8 = 0x25;

/// Smallest valid class-specific record: `bLength`, `bDescriptorType`, `bDescriptorSubtype`.
const RECORD_HEADER_LEN: usize = 3;

/// One class-specific descriptor, not yet interpreted.
#[derive(Clone, PartialEq, Eq)]
pub struct ClassSpecificRecord {
    descriptor_type: u8,
    subtype: u8,
    payload: Vec<u8>,
}

impl ClassSpecificRecord {
    pub fn new(descriptor_type: u8, subtype: u8, payload: Vec<u8>) -> Self {
        Self {
            descriptor_type,
            subtype,
            payload,
        }
    }

    /// `CS_INTERFACE` or `CS_ENDPOINT`.
    pub fn descriptor_type(&self) -> u8 {
        self.descriptor_type
    }

    pub fn is_interface(&self) -> bool {
        self.descriptor_type == CS_INTERFACE
    }

    pub fn is_endpoint(&self) -> bool {
        self.descriptor_type == CS_ENDPOINT
    }

    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    /// The bytes following the subtype, up to the record's declared length.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total record length (`bLength`).
    pub fn length(&self) -> usize {
        self.payload.len() + RECORD_HEADER_LEN
    }

    /// Appends the record in its wire form.
    pub fn encode(&self, out: &mut Vec<u8>) {
        // Records are at most 255 bytes, as their length is a single byte.
        out.push(self.length() as u8);
        out.push(self.descriptor_type);
        out.push(self.subtype);
        out.extend_from_slice(&self.payload);
    }
}

impl std::fmt::Debug for ClassSpecificRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassSpecificRecord")
            .field("descriptor_type", &format_args!("{:#04x}", self.descriptor_type))
            .field("subtype", &format_args!("{:#04x}", self.subtype))
            .field("payload", &format_args!("{:02x?}", self.payload))
            .finish()
    }
}

/// Scans an interface's or endpoint's "extra" block and returns its class-specific records.
///
/// Standard descriptors that may be interleaved (eg. vendor records) are skipped.
pub fn parse_interface_extras(bytes: &[u8]) -> Result<Vec<ClassSpecificRecord>> {
    let mut records = Vec::new();
    for res in split_descriptors(bytes) {
        let (ty, data) = res.during(Action::ParsingDescriptors)?;
        if ty != CS_INTERFACE && ty != CS_ENDPOINT {
            log::debug!("skipping descriptor of type {:#04x}", ty);
            continue;
        }

        if data.len() < RECORD_HEADER_LEN {
            return Err(crate::Error::with_action(
                crate::ErrorKind::InvalidDescriptor(format!(
                    "class-specific record of length {} has no subtype",
                    data.len()
                )),
                Action::ParsingDescriptors,
            ));
        }

        records.push(ClassSpecificRecord {
            descriptor_type: ty,
            subtype: data[2],
            payload: data[RECORD_HEADER_LEN..].to_vec(),
        });
    }

    Ok(records)
}

/// Re-encodes a list of records into a contiguous byte block.
pub fn encode_records(records: &[ClassSpecificRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.iter().map(|r| r.length()).sum());
    for record in records {
        record.encode(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn scans_and_reencodes() {
        let raw = [
            0x07, 0x24, 0x01, 0x00, 0x01, 0x0D, 0x00, // VC header
            0x05, 0x25, 0x03, 0x10, 0x00, // EP_INTERRUPT
            0x04, 0x24, 0x7F, 0xAA, // unknown subtype, kept
        ];
        let records = parse_interface_extras(&raw).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].is_interface());
        assert_eq!(records[0].subtype(), 0x01);
        assert_eq!(records[0].payload(), &[0x00, 0x01, 0x0D, 0x00]);
        assert!(records[1].is_endpoint());
        assert_eq!(records[2].subtype(), 0x7F);

        assert_eq!(encode_records(&records), raw.to_vec());
    }

    #[test]
    fn skips_standard_records() {
        let raw = [0x04, 0x0B, 0x00, 0x00, 0x03, 0x24, 0x02];
        let records = parse_interface_extras(&raw).unwrap();
        assert_eq!(records, vec![ClassSpecificRecord::new(0x24, 0x02, vec![])]);
    }

    #[test]
    fn record_without_subtype_is_invalid() {
        let err = parse_interface_extras(&[0x02, 0x24]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDescriptor(_)));
    }

    #[test]
    fn overlong_record_is_invalid() {
        let err = parse_interface_extras(&[0x09, 0x24, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDescriptor(_)));
    }
}

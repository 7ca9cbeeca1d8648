//! Standard USB configuration descriptor.
//!
//! The configuration descriptor returned by `GET_DESCRIPTOR(CONFIGURATION)` is a concatenation of
//! the configuration descriptor itself, interface descriptors (one per alternate setting),
//! endpoint descriptors, and any number of class-specific descriptors. Like libusb, we attach every
//! descriptor we don't understand to the "extra" block of the last standard descriptor preceding
//! it, which is where the UVC and UAC class-specific records end up.

use std::io;

use byteorder::{ReadBytesExt, LE};
use zerocopy::FromBytes;

use crate::{
    error::{Action, ResultExt},
    util::{io_err_res, split_descriptors},
    Result,
};

pub(crate) const DESC_TYPE_CONFIGURATION: u8 = 0x02;
pub(crate) const DESC_TYPE_INTERFACE: u8 = 0x04;
pub(crate) const DESC_TYPE_ENDPOINT: u8 = 0x05;
pub(crate) const DESC_TYPE_IAD: u8 = 0x0B;
pub(crate) const DESC_TYPE_SS_ENDPOINT_COMPANION: u8 = 0x30;

const CONFIG_DESC_LEN: usize = 9;
const INTERFACE_DESC_LEN: usize = 9;
const ENDPOINT_DESC_LEN: usize = 7;
const SS_COMPANION_DESC_LEN: usize = 6;

/// A parsed configuration descriptor.
#[derive(Debug, Clone)]
pub struct ConfigurationView {
    configuration_value: u8,
    attributes: u8,
    max_power: u8,
    interfaces: Vec<Interface>,
    associations: Vec<InterfaceAssociation>,
    extra: Vec<u8>,
}

impl ConfigurationView {
    /// Parses a complete configuration descriptor blob.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        parse_config(raw).during(Action::AccessingDeviceDescriptor)
    }

    pub fn configuration_value(&self) -> u8 {
        self.configuration_value
    }

    pub fn attributes(&self) -> u8 {
        self.attributes
    }

    /// `bMaxPower`, in units of 2 mA.
    pub fn max_power(&self) -> u8 {
        self.max_power
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn interface(&self, number: u8) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.number == number)
    }

    pub fn associations(&self) -> &[InterfaceAssociation] {
        &self.associations
    }

    /// Unrecognized descriptors between the configuration descriptor and the first interface.
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }
}

/// All alternate settings sharing one `bInterfaceNumber`.
#[derive(Debug, Clone)]
pub struct Interface {
    number: u8,
    alt_settings: Vec<AltSetting>,
}

impl Interface {
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Alternate settings, in the order the device listed them.
    pub fn alt_settings(&self) -> &[AltSetting] {
        &self.alt_settings
    }

    pub fn alt_setting(&self, alt: u8) -> Option<&AltSetting> {
        self.alt_settings.iter().find(|a| a.alt_setting == alt)
    }

    /// The default alternate setting (the first one listed, normally `0`).
    pub fn first_alt_setting(&self) -> &AltSetting {
        // Interfaces are only created when an interface descriptor is found.
        &self.alt_settings[0]
    }
}

#[derive(Debug, Clone)]
pub struct AltSetting {
    interface_number: u8,
    alt_setting: u8,
    class: u8,
    subclass: u8,
    protocol: u8,
    string: u8,
    endpoints: Vec<Endpoint>,
    extra: Vec<u8>,
}

impl AltSetting {
    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    pub fn class(&self) -> u8 {
        self.class
    }

    pub fn subclass(&self) -> u8 {
        self.subclass
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn string_index(&self) -> Option<u8> {
        Some(self.string).filter(|&i| i != 0)
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, address: u8) -> Option<&Endpoint> {
        self.endpoints.iter().find(|ep| ep.address == address)
    }

    /// Class-specific descriptors following the interface descriptor.
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    address: u8,
    attributes: u8,
    max_packet_size_raw: u16,
    interval: u8,
    companion: Option<SsEndpointCompanion>,
    extra: Vec<u8>,
}

impl Endpoint {
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn direction(&self) -> Direction {
        match self.address & 0x80 {
            0 => Direction::Out,
            _ => Direction::In,
        }
    }

    pub fn attributes(&self) -> u8 {
        self.attributes
    }

    pub fn transfer_type(&self) -> TransferType {
        match self.attributes & 0x03 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }

    /// Raw `wMaxPacketSize`, including the high-bandwidth multiplier bits.
    pub fn max_packet_size_raw(&self) -> u16 {
        self.max_packet_size_raw
    }

    pub fn max_packet_size(&self) -> usize {
        usize::from(self.max_packet_size_raw & 0x07FF)
    }

    pub fn interval(&self) -> u8 {
        self.interval
    }

    pub fn ss_companion(&self) -> Option<&SsEndpointCompanion> {
        self.companion.as_ref()
    }

    /// Number of bytes this endpoint can move per service interval.
    ///
    /// SuperSpeed endpoints report this directly in their companion descriptor. Otherwise it is
    /// the base packet size, multiplied by the number of transactions per microframe (bits 11..12
    /// of `wMaxPacketSize`) for isochronous and interrupt endpoints.
    pub fn effective_packet_size(&self) -> usize {
        if let Some(companion) = &self.companion {
            return usize::from(companion.bytes_per_interval);
        }

        let base = self.max_packet_size();
        match self.transfer_type() {
            TransferType::Isochronous | TransferType::Interrupt => {
                let extra_transactions = usize::from((self.max_packet_size_raw >> 11) & 0x3);
                base * (1 + extra_transactions)
            }
            _ => base,
        }
    }

    /// Class-specific descriptors following the endpoint descriptor.
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }
}

/// SuperSpeed Endpoint Companion descriptor.
#[derive(Debug, Clone, Copy)]
pub struct SsEndpointCompanion {
    pub max_burst: u8,
    pub attributes: u8,
    pub bytes_per_interval: u16,
}

/// Interface Association Descriptor.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceAssociation {
    pub first_interface: u8,
    pub interface_count: u8,
    pub function_class: u8,
    pub function_subclass: u8,
    pub function_protocol: u8,
}

#[derive(Debug, FromBytes)]
#[repr(C)]
#[allow(non_snake_case)]
struct InterfaceAssociationDescriptor {
    bLength: u8,
    bDescriptorType: u8,
    bFirstInterface: u8,
    bInterfaceCount: u8,
    bFunctionClass: u8,
    bFunctionSubClass: u8,
    bFunctionProtocol: u8,
    iFunction: u8,
}

fn parse_config(raw: &[u8]) -> io::Result<ConfigurationView> {
    let mut descriptors = split_descriptors(raw);

    let (ty, data) = match descriptors.next() {
        Some(res) => res?,
        None => return Err(io::ErrorKind::UnexpectedEof.into()),
    };
    if ty != DESC_TYPE_CONFIGURATION {
        return io_err_res(format!("expected configuration descriptor, found type {}", ty));
    }
    if data.len() < CONFIG_DESC_LEN {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }

    let mut rest = &data[2..];
    let total_len = rest.read_u16::<LE>()?;
    let _num_interfaces = rest.read_u8()?;
    let configuration_value = rest.read_u8()?;
    let _string = rest.read_u8()?;
    let attributes = rest.read_u8()?;
    let max_power = rest.read_u8()?;

    if usize::from(total_len) != raw.len() {
        log::debug!(
            "wTotalLength is {}, but {} bytes of descriptors were provided",
            total_len,
            raw.len()
        );
    }

    let mut config = ConfigurationView {
        configuration_value,
        attributes,
        max_power,
        interfaces: Vec::new(),
        associations: Vec::new(),
        extra: Vec::new(),
    };

    // Where unknown descriptors currently go.
    enum Cursor {
        Config,
        Alt,
        Endpoint,
    }
    let mut cursor = Cursor::Config;
    let mut current: Option<AltSetting> = None;

    for res in descriptors {
        let (ty, data) = res?;
        match ty {
            DESC_TYPE_INTERFACE => {
                if data.len() < INTERFACE_DESC_LEN {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                if let Some(alt) = current.take() {
                    push_alt(&mut config.interfaces, alt);
                }
                current = Some(AltSetting {
                    interface_number: data[2],
                    alt_setting: data[3],
                    class: data[5],
                    subclass: data[6],
                    protocol: data[7],
                    string: data[8],
                    endpoints: Vec::with_capacity(usize::from(data[4])),
                    extra: Vec::new(),
                });
                cursor = Cursor::Alt;
            }
            DESC_TYPE_ENDPOINT => {
                if data.len() < ENDPOINT_DESC_LEN {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                let alt = match &mut current {
                    Some(alt) => alt,
                    None => return io_err_res("endpoint descriptor outside of an interface"),
                };
                let mut fields = &data[2..];
                alt.endpoints.push(Endpoint {
                    address: fields.read_u8()?,
                    attributes: fields.read_u8()?,
                    max_packet_size_raw: fields.read_u16::<LE>()?,
                    interval: fields.read_u8()?,
                    companion: None,
                    extra: Vec::new(),
                });
                cursor = Cursor::Endpoint;
            }
            DESC_TYPE_SS_ENDPOINT_COMPANION => {
                let ep = match current.as_mut().and_then(|alt| alt.endpoints.last_mut()) {
                    Some(ep) => ep,
                    None => return io_err_res("SuperSpeed companion without an endpoint"),
                };
                if data.len() < SS_COMPANION_DESC_LEN {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                let mut fields = &data[2..];
                ep.companion = Some(SsEndpointCompanion {
                    max_burst: fields.read_u8()?,
                    attributes: fields.read_u8()?,
                    bytes_per_interval: fields.read_u16::<LE>()?,
                });
            }
            DESC_TYPE_IAD => {
                let iad = match InterfaceAssociationDescriptor::read_from_prefix(data) {
                    Some(iad) => iad,
                    None => return Err(io::ErrorKind::UnexpectedEof.into()),
                };
                log::trace!("{:?}", iad);
                config.associations.push(InterfaceAssociation {
                    first_interface: iad.bFirstInterface,
                    interface_count: iad.bInterfaceCount,
                    function_class: iad.bFunctionClass,
                    function_subclass: iad.bFunctionSubClass,
                    function_protocol: iad.bFunctionProtocol,
                });
            }
            _ => {
                let extra = match (&cursor, current.as_mut()) {
                    (Cursor::Endpoint, Some(alt)) => match alt.endpoints.last_mut() {
                        Some(ep) => &mut ep.extra,
                        None => &mut alt.extra,
                    },
                    (Cursor::Alt, Some(alt)) => &mut alt.extra,
                    _ => &mut config.extra,
                };
                extra.extend_from_slice(data);
            }
        }
    }

    if let Some(alt) = current.take() {
        push_alt(&mut config.interfaces, alt);
    }

    Ok(config)
}

fn push_alt(interfaces: &mut Vec<Interface>, alt: AltSetting) {
    match interfaces
        .iter_mut()
        .find(|intf| intf.number == alt.interface_number)
    {
        Some(intf) => intf.alt_settings.push(alt),
        None => interfaces.push(Interface {
            number: alt.interface_number,
            alt_settings: vec![alt],
        }),
    }
}

//! Class-specific control requests.

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    error::{Action, Error, ErrorKind, ResultExt},
    transport::UsbTransport,
    Result,
};

const REQ_TYPE_SET_INTERFACE: u8 = 0b0010_0001;
const REQ_TYPE_GET_INTERFACE: u8 = 0b1010_0001;
const REQ_TYPE_SET_ENDPOINT: u8 = 0b0010_0010;
const REQ_TYPE_GET_ENDPOINT: u8 = 0b1010_0010;

/// The recipient of a class-specific request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A unit or terminal (or the interface itself, with `entity` 0).
    Interface { interface: u8, entity: u8 },
    /// An endpoint, by address.
    Endpoint(u8),
}

impl Target {
    fn index(&self) -> u16 {
        match *self {
            Target::Interface { interface, entity } => {
                u16::from(entity) << 8 | u16::from(interface)
            }
            Target::Endpoint(addr) => u16::from(addr),
        }
    }

    fn request_type(&self, get: bool) -> u8 {
        match (self, get) {
            (Target::Interface { .. }, false) => REQ_TYPE_SET_INTERFACE,
            (Target::Interface { .. }, true) => REQ_TYPE_GET_INTERFACE,
            (Target::Endpoint(_), false) => REQ_TYPE_SET_ENDPOINT,
            (Target::Endpoint(_), true) => REQ_TYPE_GET_ENDPOINT,
        }
    }
}

/// UVC and UAC 1.0 request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Request {
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
}

impl Request {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Request::SetCur => "SET_CUR",
            Request::GetCur => "GET_CUR",
            Request::GetMin => "GET_MIN",
            Request::GetMax => "GET_MAX",
            Request::GetRes => "GET_RES",
            Request::GetLen => "GET_LEN",
            Request::GetInfo => "GET_INFO",
            Request::GetDef => "GET_DEF",
        };
        f.write_str(s)
    }
}

/// Issues control requests on a device's default pipe.
#[derive(Clone)]
pub(crate) struct Gateway {
    transport: Arc<dyn UsbTransport>,
    timeout: Duration,
}

impl Gateway {
    pub(crate) fn new(transport: Arc<dyn UsbTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn UsbTransport> {
        &self.transport
    }

    fn with_retry<T>(&self, mut cb: impl FnMut() -> Result<T>) -> Result<T> {
        // Some devices time out on one of the first transfers after being opened; a second
        // attempt goes through.
        match cb() {
            Err(e) if e.is_usb_timeout() => {
                log::warn!("USB timeout, retrying request");
                cb()
            }
            other => other,
        }
    }

    /// Performs a device-to-host request, returning the number of bytes the device sent.
    pub(crate) fn get_raw(
        &self,
        target: Target,
        request: u8,
        selector: u8,
        channel: u8,
        buf: &mut [u8],
    ) -> Result<usize> {
        let value = u16::from(selector) << 8 | u16::from(channel);
        let index = target.index();
        let request_type = target.request_type(true);
        log::trace!(
            "control in: type={:#04x} req={:#04x} value={:#06x} index={:#06x} len={}",
            request_type,
            request,
            value,
            index,
            buf.len()
        );
        self.with_retry(|| {
            self.transport
                .control_in(request_type, request, value, index, buf, self.timeout)
                .during(Action::ReadingControl)
        })
    }

    /// Like [`Gateway::get_raw`], but fails with `ShortBuffer` unless `buf` was filled
    /// completely.
    pub(crate) fn get(
        &self,
        target: Target,
        request: u8,
        selector: u8,
        channel: u8,
        buf: &mut [u8],
    ) -> Result<()> {
        let n = self.get_raw(target, request, selector, channel, buf)?;
        if n < buf.len() {
            log::debug!(
                "control {:#04x} on {:?}: expected {} bytes, got {}",
                selector,
                target,
                buf.len(),
                n
            );
            return Err(Error::with_action(
                ErrorKind::ShortBuffer,
                Action::ReadingControl,
            ));
        }
        Ok(())
    }

    /// Performs a host-to-device request.
    pub(crate) fn set(
        &self,
        target: Target,
        request: u8,
        selector: u8,
        channel: u8,
        data: &[u8],
    ) -> Result<()> {
        let value = u16::from(selector) << 8 | u16::from(channel);
        let index = target.index();
        let request_type = target.request_type(false);
        log::trace!(
            "control out: type={:#04x} req={:#04x} value={:#06x} index={:#06x} data={:02x?}",
            request_type,
            request,
            value,
            index,
            data
        );
        self.with_retry(|| {
            self.transport
                .control_out(request_type, request, value, index, data, self.timeout)
                .during(Action::WritingControl)?;
            Ok(())
        })
    }
}

//! UAC 2.0 clock source controls.
//!
//! Clock entities use the UAC 2.0 request layout: `CUR` and `RANGE` instead of the
//! `GET_CUR`/`GET_MIN`/`GET_MAX`/`GET_RES` family, with the direction given by `bmRequestType`.

use std::io;

use byteorder::{ReadBytesExt, LE};

use crate::{
    audio::{ClockId, ClockSourceDesc, ControlAccess},
    error::{Action, Error, ErrorKind, ResultExt},
    request::Target,
    Device, Result,
};

const REQUEST_CUR: u8 = 0x01;
const REQUEST_RANGE: u8 = 0x02;

const CS_SAM_FREQ_CONTROL: u8 = 0x01;
const CS_CLOCK_VALID_CONTROL: u8 = 0x02;

/// One `(min, max, res)` triplet of a `RANGE` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRateRange {
    pub min: u32,
    pub max: u32,
    pub res: u32,
}

impl SampleRateRange {
    pub fn contains(&self, hz: u32) -> bool {
        if hz < self.min || hz > self.max {
            return false;
        }
        self.res == 0 || (hz - self.min) % self.res == 0
    }
}

/// Grants access to a clock source entity.
pub struct ClockSource<'a> {
    device: &'a Device,
    interface: u8,
    desc: &'a ClockSourceDesc,
}

impl<'a> ClockSource<'a> {
    pub(crate) fn new(device: &'a Device, interface: u8, desc: &'a ClockSourceDesc) -> Self {
        Self {
            device,
            interface,
            desc,
        }
    }

    pub fn id(&self) -> ClockId {
        self.desc.id()
    }

    pub fn desc(&self) -> &ClockSourceDesc {
        self.desc
    }

    /// Reads the current sampling frequency in Hz.
    pub fn sample_rate(&self) -> Result<u32> {
        self.check(self.desc.frequency_control(), false, Action::ReadingControl)?;
        let mut buf = [0; 4];
        self.device.gateway().get(
            self.target(),
            REQUEST_CUR,
            CS_SAM_FREQ_CONTROL,
            0,
            &mut buf,
        )?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        self.check(self.desc.frequency_control(), true, Action::WritingControl)?;
        self.device.gateway().set(
            self.target(),
            REQUEST_CUR,
            CS_SAM_FREQ_CONTROL,
            0,
            &hz.to_le_bytes(),
        )
    }

    /// Reads the supported sampling frequency ranges.
    pub fn sample_rate_ranges(&self) -> Result<Vec<SampleRateRange>> {
        self.check(self.desc.frequency_control(), false, Action::ReadingControl)?;
        let gateway = self.device.gateway();

        // The first request only fetches `wNumSubRanges`, the second one everything.
        let mut count = [0; 2];
        gateway.get(
            self.target(),
            REQUEST_RANGE,
            CS_SAM_FREQ_CONTROL,
            0,
            &mut count,
        )?;
        let count = u16::from_le_bytes(count);

        let mut buf = vec![0; 2 + usize::from(count) * 12];
        gateway.get(
            self.target(),
            REQUEST_RANGE,
            CS_SAM_FREQ_CONTROL,
            0,
            &mut buf,
        )?;
        parse_ranges(&buf).during(Action::ReadingControl)
    }

    /// Whether the clock is currently valid (locked).
    pub fn is_valid(&self) -> Result<bool> {
        self.check(self.desc.validity_control(), false, Action::ReadingControl)?;
        let mut buf = [0];
        self.device.gateway().get(
            self.target(),
            REQUEST_CUR,
            CS_CLOCK_VALID_CONTROL,
            0,
            &mut buf,
        )?;
        Ok(buf[0] != 0)
    }

    fn check(&self, access: ControlAccess, write: bool, action: Action) -> Result<()> {
        let ok = match access {
            ControlAccess::None => false,
            ControlAccess::ReadOnly => !write,
            ControlAccess::ReadWrite => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::with_action(
                ErrorKind::NotSupported(format!(
                    "clock source {} control access is {:?}",
                    self.id().as_raw(),
                    access
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

fn parse_ranges(mut raw: &[u8]) -> io::Result<Vec<SampleRateRange>> {
    let count = raw.read_u16::<LE>()?;
    (0..count)
        .map(|_| {
            Ok(SampleRateRange {
                min: raw.read_u32::<LE>()?,
                max: raw.read_u32::<LE>()?,
                res: raw.read_u32::<LE>()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testutil::{self, ConfigBuilder},
        transport::mock::MockTransport,
    };
    use std::sync::Arc;

    /// A UAC 2.0 control interface with one programmable clock source (ID 0x10) whose validity is
    /// read-only.
    fn uac2_config() -> Vec<u8> {
        ConfigBuilder::new()
            .interface(0, 0, 0x01, 0x01, 0x20)
            .raw(&[0x24, 0x01, 0x00, 0x02, 0x08, 0x40, 0x00, 0x00])
            .raw(&[0x24, 0x0A, 0x10, 0x03, 0x07, 0x00, 0x00])
            .build()
    }

    fn clock_test(f: impl FnOnce(&MockTransport, ClockSource<'_>)) {
        testutil::init_logger();
        let mock = MockTransport::new((0x1234, 0x5678), uac2_config());
        let device = Device::with_transport(Arc::new(mock.clone())).unwrap();
        let id = device.clock_source_ids()[0];
        f(&mock, device.clock_source_by_id(id).unwrap());
    }

    #[test]
    fn read_and_set_sample_rate() {
        clock_test(|mock, mut clock| {
            mock.respond(0x01, 0x0100, 0x1000, Ok(48_000u32.to_le_bytes().to_vec()));
            assert_eq!(clock.sample_rate().unwrap(), 48_000);

            clock.set_sample_rate(96_000).unwrap();
            let calls = mock.calls();
            assert_eq!(calls[0].request_type, 0xA1);
            assert_eq!(calls[1].request_type, 0x21);
            assert_eq!(calls[1].request, 0x01);
            assert_eq!(calls[1].value, 0x0100);
            assert_eq!(calls[1].index, 0x1000);
            assert_eq!(calls[1].data, 96_000u32.to_le_bytes().to_vec());
        });
    }

    #[test]
    fn ranges() {
        clock_test(|mock, clock| {
            let mut full = vec![0x02, 0x00];
            for v in [44_100u32, 44_100, 0, 48_000, 192_000, 48_000] {
                full.extend_from_slice(&v.to_le_bytes());
            }
            mock.respond(0x02, 0x0100, 0x1000, Ok(vec![0x02, 0x00]));
            mock.respond(0x02, 0x0100, 0x1000, Ok(full));

            let ranges = clock.sample_rate_ranges().unwrap();
            assert_eq!(ranges.len(), 2);
            assert!(ranges[0].contains(44_100));
            assert!(!ranges[0].contains(48_000));
            assert!(ranges[1].contains(96_000));
            assert!(!ranges[1].contains(120_000));
        });
    }

    #[test]
    fn validity_is_read_only() {
        clock_test(|mock, clock| {
            mock.respond(0x01, 0x0200, 0x1000, Ok(vec![0x01]));
            assert!(clock.is_valid().unwrap());
        });
    }

    #[test]
    fn truncated_range_response() {
        clock_test(|mock, clock| {
            mock.respond(0x02, 0x0100, 0x1000, Ok(vec![0x01, 0x00]));
            mock.respond(0x02, 0x0100, 0x1000, Ok(vec![0x01, 0x00, 0x44]));
            let err = clock.sample_rate_ranges().unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::ShortBuffer));
        });
    }
}

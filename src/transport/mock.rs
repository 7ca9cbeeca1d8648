//! Scripted in-memory transport for tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use super::{BulkUrb, IsoPacket, IsoUrb, Urb, UrbStatus, UsbTransport};

/// A control transfer as seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Data sent with an OUT request; empty for IN requests.
    pub data: Vec<u8>,
}

/// What the next reaped URB completes with.
#[derive(Debug, Clone)]
pub enum Completion {
    Bulk(Vec<u8>),
    /// `(status, data)` per packet.
    Iso(Vec<(i32, Vec<u8>)>),
    /// A bulk transfer that timed out after receiving some bytes.
    TimedOut(Vec<u8>),
    Error(rusb::Error),
}

#[derive(Debug, Default)]
pub struct MockStream {
    pub completions: VecDeque<Completion>,
    pub created: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    /// Number of URBs the transport will still create before failing with `NoMem`.
    pub urb_limit: Option<usize>,
}

type Responses = HashMap<(u8, u16, u16), VecDeque<rusb::Result<Vec<u8>>>>;

#[derive(Default)]
struct State {
    ids: (u16, u16),
    config: Vec<u8>,
    responses: Responses,
    out_errors: HashMap<(u8, u16, u16), VecDeque<rusb::Error>>,
    calls: Vec<ControlCall>,
    claimed: Vec<u8>,
    released: Vec<u8>,
    alt_settings: Vec<(u8, u8)>,
    claim_error: Option<rusb::Error>,
    detach_error: Option<rusb::Error>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
    stream: Arc<Mutex<MockStream>>,
}

impl MockTransport {
    pub fn new(ids: (u16, u16), config: Vec<u8>) -> Self {
        let this = Self::default();
        {
            let mut state = this.state();
            state.ids = ids;
            state.config = config;
            state.detach_error = Some(rusb::Error::NotFound);
        }
        this
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn stream(&self) -> MutexGuard<'_, MockStream> {
        self.stream.lock().unwrap()
    }

    /// Queues a response for the next IN request `(request, value, index)`.
    pub fn respond(&self, request: u8, value: u16, index: u16, response: rusb::Result<Vec<u8>>) {
        self.state()
            .responses
            .entry((request, value, index))
            .or_default()
            .push_back(response);
    }

    /// Makes the next OUT request `(request, value, index)` fail.
    pub fn fail_out(&self, request: u8, value: u16, index: u16, error: rusb::Error) {
        self.state()
            .out_errors
            .entry((request, value, index))
            .or_default()
            .push_back(error);
    }

    pub fn fail_claim(&self, error: rusb::Error) {
        self.state().claim_error = Some(error);
    }

    pub fn push_completion(&self, completion: Completion) {
        self.stream().completions.push_back(completion);
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        self.state().calls.clone()
    }

    pub fn claimed(&self) -> Vec<u8> {
        self.state().claimed.clone()
    }

    pub fn released(&self) -> Vec<u8> {
        self.state().released.clone()
    }

    pub fn alt_settings(&self) -> Vec<(u8, u8)> {
        self.state().alt_settings.clone()
    }

    fn new_urb(&self) -> rusb::Result<()> {
        let mut stream = self.stream();
        if let Some(limit) = &mut stream.urb_limit {
            if *limit == 0 {
                return Err(rusb::Error::NoMem);
            }
            *limit -= 1;
        }
        stream.created += 1;
        Ok(())
    }
}

impl UsbTransport for MockTransport {
    fn device_ids(&self) -> rusb::Result<(u16, u16)> {
        Ok(self.state().ids)
    }

    fn config_descriptor(&self, _index: u8) -> rusb::Result<Vec<u8>> {
        Ok(self.state().config.clone())
    }

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let mut state = self.state();
        state.calls.push(ControlCall {
            request_type,
            request,
            value,
            index,
            data: Vec::new(),
        });
        let response = state
            .responses
            .get_mut(&(request, value, index))
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Err(rusb::Error::Pipe))?;
        let n = response.len().min(buf.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let mut state = self.state();
        state.calls.push(ControlCall {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        if let Some(e) = state
            .out_errors
            .get_mut(&(request, value, index))
            .and_then(|queue| queue.pop_front())
        {
            return Err(e);
        }
        Ok(data.len())
    }

    fn detach_kernel_driver(&self, _interface: u8) -> rusb::Result<()> {
        match self.state().detach_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn claim_interface(&self, interface: u8) -> rusb::Result<()> {
        let mut state = self.state();
        if let Some(e) = state.claim_error {
            return Err(e);
        }
        state.claimed.push(interface);
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> rusb::Result<()> {
        self.state().released.push(interface);
        Ok(())
    }

    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> rusb::Result<()> {
        self.state().alt_settings.push((interface, alt_setting));
        Ok(())
    }

    fn clear_halt(&self, _endpoint: u8) -> rusb::Result<()> {
        Ok(())
    }

    fn bulk_transfer(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        match self.stream().completions.pop_front() {
            Some(Completion::Bulk(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Completion::Error(e)) => Err(e),
            Some(Completion::TimedOut(_)) | None => Err(rusb::Error::Timeout),
            Some(Completion::Iso(_)) => Err(rusb::Error::Io),
        }
    }

    fn bulk_urb(
        &self,
        _endpoint: u8,
        len: usize,
        _timeout: Duration,
    ) -> rusb::Result<Box<dyn BulkUrb>> {
        self.new_urb()?;
        Ok(Box::new(MockBulkUrb {
            stream: self.stream.clone(),
            capacity: len,
            data: Vec::new(),
            submitted: false,
            cancelled: false,
        }))
    }

    fn iso_urb(
        &self,
        _endpoint: u8,
        num_packets: usize,
        packet_size: usize,
    ) -> rusb::Result<Box<dyn IsoUrb>> {
        self.new_urb()?;
        Ok(Box::new(MockIsoUrb {
            stream: self.stream.clone(),
            num_packets,
            packet_size,
            packets: Vec::new(),
            submitted: false,
            cancelled: false,
        }))
    }
}

fn submit(stream: &Mutex<MockStream>, submitted: &mut bool) -> rusb::Result<()> {
    assert!(!*submitted, "URB submitted twice");
    *submitted = true;
    let mut stream = stream.lock().unwrap();
    stream.in_flight += 1;
    stream.max_in_flight = stream.max_in_flight.max(stream.in_flight);
    Ok(())
}

/// Pops the completion for a finished URB, or `None` if it was cancelled.
fn reap(
    stream: &Mutex<MockStream>,
    submitted: &mut bool,
    cancelled: &mut bool,
) -> rusb::Result<Option<Completion>> {
    assert!(*submitted, "waited on an idle URB");
    let mut stream = stream.lock().unwrap();
    if std::mem::take(cancelled) {
        *submitted = false;
        stream.in_flight -= 1;
        return Ok(None);
    }
    *submitted = false;
    stream.in_flight -= 1;
    match stream.completions.pop_front() {
        Some(c) => Ok(Some(c)),
        // Nothing arrived before the transfer timed out.
        None => Err(rusb::Error::Timeout),
    }
}

struct MockBulkUrb {
    stream: Arc<Mutex<MockStream>>,
    capacity: usize,
    data: Vec<u8>,
    submitted: bool,
    cancelled: bool,
}

impl Urb for MockBulkUrb {
    fn submit(&mut self) -> rusb::Result<()> {
        submit(&self.stream, &mut self.submitted)
    }

    fn wait(&mut self) -> rusb::Result<UrbStatus> {
        self.data.clear();
        match reap(&self.stream, &mut self.submitted, &mut self.cancelled)? {
            None => Ok(UrbStatus::Cancelled),
            Some(Completion::Bulk(mut data)) => {
                data.truncate(self.capacity);
                self.data = data;
                Ok(UrbStatus::Completed(self.data.len()))
            }
            Some(Completion::TimedOut(mut data)) => {
                data.truncate(self.capacity);
                self.data = data;
                Ok(UrbStatus::TimedOut(self.data.len()))
            }
            Some(Completion::Error(e)) => Err(e),
            Some(Completion::Iso(_)) => Err(rusb::Error::Io),
        }
    }

    fn cancel(&mut self) -> rusb::Result<()> {
        if self.submitted {
            self.cancelled = true;
        }
        Ok(())
    }
}

impl BulkUrb for MockBulkUrb {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

struct MockIsoUrb {
    stream: Arc<Mutex<MockStream>>,
    num_packets: usize,
    packet_size: usize,
    packets: Vec<(i32, Vec<u8>)>,
    submitted: bool,
    cancelled: bool,
}

impl Urb for MockIsoUrb {
    fn submit(&mut self) -> rusb::Result<()> {
        submit(&self.stream, &mut self.submitted)
    }

    fn wait(&mut self) -> rusb::Result<UrbStatus> {
        self.packets.clear();
        match reap(&self.stream, &mut self.submitted, &mut self.cancelled)? {
            None => Ok(UrbStatus::Cancelled),
            Some(Completion::Iso(mut packets)) => {
                packets.resize(self.num_packets, (0, Vec::new()));
                for (_, data) in &mut packets {
                    data.truncate(self.packet_size);
                }
                self.packets = packets;
                Ok(UrbStatus::Completed(self.num_packets))
            }
            Some(Completion::Error(e)) => Err(e),
            Some(Completion::Bulk(_)) | Some(Completion::TimedOut(_)) => Err(rusb::Error::Io),
        }
    }

    fn cancel(&mut self) -> rusb::Result<()> {
        if self.submitted {
            self.cancelled = true;
        }
        Ok(())
    }
}

impl IsoUrb for MockIsoUrb {
    fn num_packets(&self) -> usize {
        self.num_packets
    }

    fn packet(&self, index: usize) -> IsoPacket {
        let (status, data) = &self.packets[index];
        IsoPacket {
            status: *status,
            actual_length: data.len(),
        }
    }

    fn packet_data(&self, index: usize) -> &[u8] {
        &self.packets[index].1
    }
}

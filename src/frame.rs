//! Frame reassembly.
//!
//! A video frame arrives as a sequence of payloads. The device toggles the FID bit of the payload
//! headers at every frame boundary and may additionally set EOF on the last payload of a frame.

use std::{
    collections::VecDeque,
    io::{self, Read},
    ops::Range,
};

use crate::{
    payload::{split_payload, HeaderFlags, PayloadHeader, MAX_HEADER_LEN},
    Result,
};

/// A reassembled video frame.
///
/// The frame's data is the concatenation of the data of all its payloads. It can be read through
/// [`Read`] or borrowed as a whole.
pub struct Frame {
    data: Vec<u8>,
    payloads: Vec<(PayloadHeader, Range<usize>)>,
    error: bool,
    pos: usize,
}

impl Frame {
    fn with_capacity(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
            payloads: Vec::new(),
            error: false,
            pos: 0,
        }
    }

    fn append(&mut self, header: PayloadHeader, data: &[u8]) {
        let start = self.data.len();
        self.data.extend_from_slice(data);
        self.error |= header.error();
        self.payloads.push((header, start..self.data.len()));
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// The payloads making up this frame, in arrival order, with their data.
    pub fn payloads(&self) -> impl Iterator<Item = (&PayloadHeader, &[u8])> + '_ {
        self.payloads
            .iter()
            .map(move |(header, range)| (header, &self.data[range.clone()]))
    }

    pub fn num_payloads(&self) -> usize {
        self.payloads.len()
    }

    /// Whether any payload of this frame had its `ERR` bit set.
    ///
    /// The data is delivered anyway; decoders may choose to drop it.
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Whether the frame is a still image (`STILL` bit of its first payload).
    pub fn is_still_image(&self) -> bool {
        self.payloads
            .first()
            .map_or(false, |(header, _)| header.still())
    }

    /// The frame ID bit shared by all payloads of this frame.
    pub fn fid(&self) -> bool {
        self.payloads
            .first()
            .map_or(false, |(header, _)| header.fid())
    }

    /// Presentation time stamp of the first payload that carries one.
    pub fn pts(&self) -> Option<u32> {
        self.payloads.iter().find_map(|(header, _)| header.pts())
    }
}

impl Read for Frame {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rest = &self.data[self.pos..];
        let n = rest.read(buf)?;
        self.pos += n;
        Ok(n)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("payloads", &self.payloads.len())
            .field("error", &self.error)
            .finish()
    }
}

/// Groups payloads into frames using the FID toggle and the EOF flag.
pub struct FrameBuilder {
    last_fid: Option<bool>,
    current: Option<Frame>,
    ready: VecDeque<Frame>,
    frame_size_hint: usize,
    dropped: u64,
}

impl FrameBuilder {
    /// `frame_size_hint` is used to preallocate frame buffers, typically `dwMaxVideoFrameSize`.
    pub fn new(frame_size_hint: usize) -> Self {
        Self {
            last_fid: None,
            current: None,
            ready: VecDeque::new(),
            frame_size_hint,
            dropped: 0,
        }
    }

    /// Parses a complete payload (header and data) and feeds it to the builder.
    ///
    /// A payload with a malformed header is counted as dropped and the error is returned.
    pub fn push(&mut self, payload: &[u8]) -> Result<()> {
        let (header, data) = match split_payload(payload) {
            Ok(split) => split,
            Err(e) => {
                self.dropped += 1;
                return Err(e);
            }
        };
        self.push_payload(header, data);
        Ok(())
    }

    /// Feeds an already parsed payload to the builder.
    pub fn push_payload(&mut self, header: PayloadHeader, data: &[u8]) {
        let fid = header.fid();
        let eof = header.eof();

        if self.last_fid != Some(fid) {
            if let Some(frame) = self.current.take() {
                log::trace!("FID toggled without EOF, emitting frame");
                self.ready.push_back(frame);
            }
            self.current = Some(Frame::with_capacity(self.frame_size_hint));
            self.last_fid = Some(fid);
        }

        let frame = match &mut self.current {
            Some(frame) => frame,
            None => {
                self.dropped += 1;
                log::trace!(
                    "dropping payload after EOF ({} bytes, {} dropped so far)",
                    data.len(),
                    self.dropped
                );
                return;
            }
        };
        frame.append(header, data);

        if eof {
            if let Some(frame) = self.current.take() {
                self.ready.push_back(frame);
            }
        }
    }

    /// Takes the oldest complete frame.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Discards the partially assembled frame. Complete frames are kept.
    pub fn discard(&mut self) {
        self.current = None;
        self.last_fid = None;
    }

    /// Number of payloads dropped because their header was malformed or because they arrived
    /// between an EOF and the next FID toggle.
    pub fn dropped_payloads(&self) -> u64 {
        self.dropped
    }
}

/// A byte source yielding whole payloads per read (the transfer engines).
pub trait PayloadSource {
    /// Reads the next payload into `buf`, returning its length.
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Reads frames from a [`PayloadSource`].
///
/// When a single read returns more than `max_payload` bytes and the bytes after the first
/// `max_payload` look like a payload header, they are treated as the start of the next payload.
/// If that split completes a frame, the remainder is kept in a patch area and consumed by the next
/// call before the source is read again.
pub struct FrameReader<S> {
    source: S,
    builder: FrameBuilder,
    buf: Vec<u8>,
    patch: Vec<u8>,
    max_payload: usize,
}

impl<S: PayloadSource> FrameReader<S> {
    pub fn new(source: S, max_payload: usize, buf_len: usize, frame_size_hint: usize) -> Self {
        Self {
            source,
            builder: FrameBuilder::new(frame_size_hint),
            buf: vec![0; buf_len.max(max_payload).max(MAX_HEADER_LEN)],
            patch: Vec::new(),
            max_payload,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn builder(&self) -> &FrameBuilder {
        &self.builder
    }

    /// Blocks until a complete frame is available.
    ///
    /// If the source fails with `Cancelled`, the partially assembled frame is discarded. On other
    /// errors, the assembly state is kept and the caller may call `read_frame` again.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.builder.pop_frame() {
                return Ok(frame);
            }

            if !self.patch.is_empty() {
                let patch = std::mem::take(&mut self.patch);
                feed(&mut self.builder, &mut self.patch, self.max_payload, &patch);
                continue;
            }

            let n = match self.source.read_payload(&mut self.buf) {
                Ok(n) => n,
                Err(e) => {
                    if e.is_cancelled() {
                        self.builder.discard();
                        self.patch.clear();
                    }
                    return Err(e);
                }
            };
            if n == 0 {
                continue;
            }
            feed(
                &mut self.builder,
                &mut self.patch,
                self.max_payload,
                &self.buf[..n],
            );
        }
    }
}

/// Splits `chunk` into payloads and pushes them into `builder`.
fn feed(builder: &mut FrameBuilder, patch: &mut Vec<u8>, max_payload: usize, mut chunk: &[u8]) {
    loop {
        let split = max_payload != 0
            && chunk.len() > max_payload
            && looks_like_header(&chunk[max_payload..]);
        let (payload, rest) = if split {
            chunk.split_at(max_payload)
        } else {
            (chunk, &[][..])
        };

        let had_ready = builder.ready.len();
        if let Err(e) = builder.push(payload) {
            log::warn!("dropping malformed payload of {} bytes: {}", payload.len(), e);
        }

        if rest.is_empty() {
            return;
        }
        if builder.ready.len() > had_ready {
            patch.extend_from_slice(rest);
            return;
        }
        chunk = rest;
    }
}

/// Heuristic used to find a payload boundary inside a concatenated read.
fn looks_like_header(bytes: &[u8]) -> bool {
    let len = match bytes.first() {
        Some(&len) => usize::from(len),
        None => return false,
    };
    if len < 2 || len > MAX_HEADER_LEN || len > bytes.len() {
        return false;
    }
    let flags = HeaderFlags::from_bits_truncate(bytes[1]);
    flags.contains(HeaderFlags::EOH) && split_payload(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Error, ErrorKind};

    fn payload(flags: u8, data: &[u8]) -> Vec<u8> {
        let mut p = vec![0x02, 0x80 | flags];
        p.extend_from_slice(data);
        p
    }

    const EOF: u8 = 0x02;

    #[test]
    fn fid_toggle_and_eof() {
        let mut builder = FrameBuilder::new(16);
        let fids = [0, 0, 0, EOF, 1, 1, 1 | EOF];
        let data = [b"A", b"B", b"C", b"D", b"E", b"F", b"G"];
        for (flags, data) in fids.iter().zip(data.iter()) {
            builder.push(&payload(*flags, *data)).unwrap();
        }

        let first = builder.pop_frame().unwrap();
        assert_eq!(first.data(), b"ABCD");
        assert_eq!(first.num_payloads(), 4);
        assert!(!first.fid());
        let second = builder.pop_frame().unwrap();
        assert_eq!(second.data(), b"EFG");
        assert!(second.fid());
        assert!(builder.pop_frame().is_none());
    }

    #[test]
    fn payloads_after_eof_are_dropped() {
        let mut builder = FrameBuilder::new(0);
        builder.push(&payload(EOF, b"A")).unwrap();
        builder.push(&payload(0, b"x")).unwrap();
        builder.push(&payload(0, b"y")).unwrap();
        builder.push(&payload(1, b"B")).unwrap();
        builder.push(&payload(1 | EOF, b"C")).unwrap();

        assert_eq!(builder.pop_frame().unwrap().data(), b"A");
        assert_eq!(builder.pop_frame().unwrap().data(), b"BC");
        assert_eq!(builder.dropped_payloads(), 2);
    }

    #[test]
    fn frames_without_eof_end_at_fid_toggle() {
        let mut builder = FrameBuilder::new(0);
        builder.push(&payload(0, b"ab")).unwrap();
        builder.push(&payload(0, b"cd")).unwrap();
        assert!(builder.pop_frame().is_none());
        builder.push(&payload(1, b"ef")).unwrap();
        assert_eq!(builder.pop_frame().unwrap().data(), b"abcd");
        assert!(builder.pop_frame().is_none());
    }

    #[test]
    fn error_bit_is_reported() {
        let mut builder = FrameBuilder::new(0);
        builder.push(&payload(0x40, b"a")).unwrap();
        builder.push(&payload(EOF, b"b")).unwrap();
        let mut frame = builder.pop_frame().unwrap();
        assert!(frame.has_error());
        let mut out = Vec::new();
        frame.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ab");
    }

    #[test]
    fn per_payload_metadata() {
        let mut builder = FrameBuilder::new(0);
        let mut first = vec![0x06, 0x84, 0x01, 0x00, 0x00, 0x00];
        first.extend_from_slice(b"hi");
        builder.push(&first).unwrap();
        builder.push(&payload(EOF, b"!")).unwrap();
        let frame = builder.pop_frame().unwrap();
        assert_eq!(frame.pts(), Some(1));
        let payloads = frame.payloads().collect::<Vec<_>>();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].0.pts(), Some(1));
        assert_eq!(payloads[0].1, b"hi");
        assert_eq!(payloads[1].1, b"!");
    }

    struct Script(VecDeque<Result<Vec<u8>>>);

    impl PayloadSource for Script {
        fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.0.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(Error::new(ErrorKind::Cancelled)),
            }
        }
    }

    #[test]
    fn reader_splits_concatenated_payloads() {
        // Payloads of 6 bytes; the second read carries the end of frame 0 and the start of frame 1.
        let mut second = payload(EOF, b"defg");
        second.extend_from_slice(&payload(1, b"hijk"));
        let script = vec![
            Ok(payload(0, b"abcd")),
            Ok(second),
            Ok(payload(1 | EOF, b"lm")),
        ];
        let mut reader = FrameReader::new(Script(script.into_iter().collect()), 6, 64, 0);

        assert_eq!(reader.read_frame().unwrap().data(), b"abcddefg");
        assert!(!reader.patch.is_empty());
        assert_eq!(reader.read_frame().unwrap().data(), b"hijklm");
        assert!(reader.read_frame().unwrap_err().is_cancelled());
    }

    #[test]
    fn transient_errors_keep_partial_frame() {
        let script = vec![
            Ok(payload(0, b"ab")),
            Err(Error::new(rusb::Error::Timeout)),
            Ok(payload(EOF, b"cd")),
        ];
        let mut reader = FrameReader::new(Script(script.into_iter().collect()), 64, 64, 0);
        assert!(reader.read_frame().unwrap_err().is_usb_timeout());
        assert_eq!(reader.read_frame().unwrap().data(), b"abcd");
    }

    #[test]
    fn cancellation_discards_partial_frame() {
        let script = vec![
            Ok(payload(0, b"ab")),
            Err(Error::new(ErrorKind::Cancelled)),
            Ok(payload(EOF, b"cd")),
        ];
        let mut reader = FrameReader::new(Script(script.into_iter().collect()), 64, 64, 0);
        assert!(reader.read_frame().unwrap_err().is_cancelled());
        // "cd" starts a new frame after the reset, with the same FID.
        assert_eq!(reader.read_frame().unwrap().data(), b"cd");
    }

    #[test]
    fn malformed_payloads_are_skipped() {
        let script = vec![
            Ok(vec![0x0C, 0x80]),
            Ok(payload(EOF, b"ok")),
        ];
        let mut reader = FrameReader::new(Script(script.into_iter().collect()), 64, 64, 0);
        assert_eq!(reader.read_frame().unwrap().data(), b"ok");
        assert_eq!(reader.builder().dropped_payloads(), 1);
    }

    #[test]
    fn header_longer_than_payload_is_counted() {
        let mut builder = FrameBuilder::new(0);
        let mut bad = vec![0x20, 0x80];
        bad.extend_from_slice(&[0; 6]);
        assert!(builder.push(&bad).is_err());
        assert_eq!(builder.dropped_payloads(), 1);
        assert!(builder.pop_frame().is_none());
    }
}

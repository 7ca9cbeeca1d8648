use std::{fmt, io};

pub struct Error {
    action: Option<Action>,
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn new(kind: impl Into<ErrorKind>) -> Self {
        Self {
            action: None,
            kind: kind.into(),
        }
    }

    pub(crate) fn with_action(kind: impl Into<ErrorKind>, action: Action) -> Self {
        Self {
            action: Some(action),
            kind: kind.into(),
        }
    }

    /// Returns what went wrong.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    pub(crate) fn is_usb_timeout(&self) -> bool {
        matches!(&self.kind, ErrorKind::Transport(rusb::Error::Timeout))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(action) = &self.action {
            write!(f, "error while {}: ", action)?;
        }

        match &self.kind {
            ErrorKind::InvalidDescriptor(msg) => write!(f, "invalid descriptor: {}", msg),
            ErrorKind::ShortBuffer => f.write_str("data ended unexpectedly"),
            ErrorKind::Transport(e) => write!(f, "{}", e),
            ErrorKind::BufferTooSmall {
                required,
                available,
            } => write!(
                f,
                "buffer too small (need at least {} bytes, have {})",
                required, available
            ),
            ErrorKind::Cancelled => f.write_str("operation cancelled"),
            ErrorKind::NotFound(what) => write!(f, "not found: {}", what),
            ErrorKind::NotSupported(what) => write!(f, "not supported: {}", what),
            ErrorKind::Other(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A class-specific record violates a structural invariant.
    InvalidDescriptor(String),
    /// A decoder ran off the end of its input, or the device returned fewer bytes than requested.
    ShortBuffer,
    /// The USB layer reported an error.
    Transport(rusb::Error),
    /// A caller-provided buffer cannot hold the next payload.
    BufferTooSmall { required: usize, available: usize },
    /// The owning stream was closed.
    Cancelled,
    NotFound(String),
    NotSupported(String),
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ErrorKind {
    fn from(v: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(v)
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}

impl From<&'_ str> for ErrorKind {
    fn from(s: &str) -> Self {
        Self::Other(s.into())
    }
}

impl From<rusb::Error> for ErrorKind {
    fn from(e: rusb::Error) -> Self {
        Self::Transport(e)
    }
}

/// Descriptor decoders run on `io::Result`; running off the end of a record is reported as
/// `UnexpectedEof`, everything else they raise is a structural problem with the record.
impl From<io::Error> for ErrorKind {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::ShortBuffer,
            _ => Self::InvalidDescriptor(e.to_string()),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

/// A list of actions during which this library might encounter errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    AccessingDeviceDescriptor,
    ParsingDescriptors,
    OpeningDevice,
    ReadingControl,
    WritingControl,
    StreamNegotiation,
    StreamSetup,
    StreamRead,
    ClosingStream,
    AudioSetup,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::AccessingDeviceDescriptor => "accessing device descriptor",
            Action::ParsingDescriptors => "parsing class-specific descriptors",
            Action::OpeningDevice => "opening USB device",
            Action::ReadingControl => "reading a device control",
            Action::WritingControl => "writing a device control",
            Action::StreamNegotiation => "negotiating stream parameters",
            Action::StreamSetup => "setting up the transfer pipeline",
            Action::StreamRead => "reading from the stream",
            Action::ClosingStream => "closing the stream",
            Action::AudioSetup => "configuring the audio stream",
        };
        f.write_str(s)
    }
}

pub(crate) trait ResultExt<T, E> {
    fn during(self, action: Action) -> Result<T, Error>;
}

impl<T, E: Into<ErrorKind>> ResultExt<T, E> for Result<T, E> {
    fn during(self, action: Action) -> Result<T, Error> {
        self.map_err(|e| Error::with_action(e, action))
    }
}

pub(crate) fn err<T>(err: impl Into<ErrorKind>, action: Action) -> Result<T, Error> {
    Err(Error::with_action(err, action))
}

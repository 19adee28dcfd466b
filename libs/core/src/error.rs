use std::fmt;
use std::io;

use thiserror::Error;

/// Status taxonomy for a single tracked connection.
///
/// `Ok` is a first-class member: the connection state record always carries
/// exactly one of these, and `Ok` means "no fault recorded". Kinds in the
/// recoverable set clear on the next report; every other non-`Ok` kind gates
/// send/read/listen until the adapter is torn down and rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// No fault recorded.
    #[default]
    Ok,
    /// Allocation failed inside the stack.
    OutOfMemory,
    /// Endpoint allocation, bind, or listen failed during construction.
    InitializationFailure,
    /// The periodic poll fired with no peer activity.
    Timeout,
    /// Peer reset the connection.
    Reset,
    /// Connection aborted locally.
    Aborted,
    /// An argument was rejected (also the accept-handler reject signal).
    InvalidArgument,
    /// Operation would have blocked.
    WouldBlock,
    /// An operation on this endpoint is already in flight.
    AlreadyInProgress,
    /// The endpoint is already connected.
    AlreadyConnected,
    /// No connection is established.
    NotConnected,
    /// Low-level interface (link-layer) failure.
    InterfaceError,
    /// The connection has been closed.
    Closed,
    /// Any code without a dedicated recovery policy.
    Unspecified,
}

impl ErrorKind {
    /// Whether this kind is `Ok`.
    pub fn is_ok(&self) -> bool {
        *self == Self::Ok
    }

    /// Kinds that clear automatically once reported, allowing continued
    /// operation on the same adapter.
    pub fn recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Reset | Self::InvalidArgument)
    }

    /// Non-`Ok`, non-recoverable: the connection is unusable until torn down.
    pub fn is_fatal(&self) -> bool {
        !self.is_ok() && !self.recoverable()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InitializationFailure => write!(f, "initialization failure"),
            Self::Timeout => write!(f, "poll timeout"),
            Self::Reset => write!(f, "connection reset by peer"),
            Self::Aborted => write!(f, "connection aborted"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::AlreadyInProgress => write!(f, "operation already in progress"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::NotConnected => write!(f, "not connected"),
            Self::InterfaceError => write!(f, "interface error"),
            Self::Closed => write!(f, "connection closed"),
            Self::Unspecified => write!(f, "unspecified error"),
        }
    }
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => Self::Reset,
            io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => Self::Aborted,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::AddrInUse => Self::AlreadyInProgress,
            io::ErrorKind::NotConnected => Self::NotConnected,
            io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            io::ErrorKind::InvalidInput => Self::InvalidArgument,
            io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Unspecified,
        }
    }
}

impl From<&io::Error> for ErrorKind {
    fn from(err: &io::Error) -> Self {
        err.kind().into()
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Link association failed: {0}")]
    Link(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Collapse this error into the status taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(err) => err.into(),
            Self::InvalidAddress(_) => ErrorKind::InvalidArgument,
            Self::Link(_) => ErrorKind::InterfaceError,
            Self::Custom(_) => ErrorKind::Unspecified,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

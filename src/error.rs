use std::io;

use thiserror::Error;

/// Errors raised by the channel, its endpoints and the frame codec.
#[derive(Debug, Error)]
pub enum Error {
    /// The interface name does not resolve to a network interface.
    #[error("no such CAN interface: {0}")]
    NoSuchInterface(String),
    /// The process may not open raw CAN sockets.
    #[error("permission denied opening CAN socket: {0}")]
    PermissionDenied(#[source] io::Error),
    /// The kernel has no CAN_RAW protocol support.
    #[error("CAN protocol unavailable: {0}")]
    ProtocolUnavailable(#[source] io::Error),

    #[error("invalid receive filter: {0}")]
    InvalidFilter(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The endpoint transmit queue is full; the caller decides whether to retry.
    #[error("send would block")]
    WouldBlock,
    /// The endpoint has been closed.
    #[error("endpoint closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("channel is not running")]
    NotRunning,
    #[error("channel is already running")]
    AlreadyRunning,
    /// The channel can no longer be started: it was stopped or has failed.
    #[error("channel endpoint is no longer valid")]
    EndpointInvalid,
    #[error("failed to spawn receiver thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Errors that prevent a channel from ever being constructed.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Error::NoSuchInterface(_) | Error::PermissionDenied(_) | Error::ProtocolUnavailable(_)
        )
    }

    /// Errors caused by calling an operation at the wrong time or with bad input.
    /// They never change channel state.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::InvalidFilter(_)
                | Error::InvalidFrame(_)
                | Error::NotRunning
                | Error::AlreadyRunning
                | Error::EndpointInvalid
        )
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }

    /// Maps a socket creation failure onto the setup error taxonomy.
    pub(crate) fn from_socket_setup(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => Error::PermissionDenied(err),
            Some(libc::EAFNOSUPPORT) | Some(libc::EPROTONOSUPPORT) | Some(libc::ESOCKTNOSUPPORT) => {
                Error::ProtocolUnavailable(err)
            }
            Some(libc::ENODEV) | Some(libc::ENXIO) => Error::NoSuchInterface(err.to_string()),
            _ => Error::Io(err),
        }
    }

    /// Maps a transmit failure: a full queue is back-pressure, not a fault.
    pub(crate) fn from_send(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::ENOBUFS) {
            Error::WouldBlock
        } else {
            Error::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

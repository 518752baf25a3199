//! Error types for peerpad
//!
//! Errors are grouped by the stage that produces them:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Fatal to the connection (state becomes Closed)                 │
//! │  ├── BindError: server could not open its listening socket      │
//! │  ├── ConnectError: client could not reach the server            │
//! │  └── TransportError: an open socket failed or was closed        │
//! │                                                                 │
//! │  Recovered per frame (connection stays Open)                    │
//! │  └── DecodeError: malformed frame                               │
//! │                                                                 │
//! │  Scoped to one operation                                        │
//! │  ├── InvalidLocationError / PermissionDenied (location send)    │
//! │  └── NotConnected / EncodeError (any send)                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! io errors are classified where they occur and kept as text, so every
//! error here is `Clone` and can be carried on the event channel.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::InvalidLocationError;
use crate::protocol::Scheme;

/// Failure to open the server's listening socket
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindError {
    /// Another process already listens on the port
    #[error("address already in use")]
    AddressInUse,

    /// The platform refused the bind (e.g. privileged port)
    #[error("permission denied while binding")]
    PermissionDenied,

    /// Any other bind failure
    #[error("bind failed: {0}")]
    Other(String),
}

impl BindError {
    /// Classify an io error returned by `bind`
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => BindError::AddressInUse,
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied,
            _ => BindError::Other(err.to_string()),
        }
    }
}

/// Failure to establish the client's outbound connection
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectError {
    /// Nothing is listening at the target address
    #[error("connection refused")]
    Refused,

    /// The connect timeout elapsed
    #[error("connection timed out")]
    TimedOut,

    /// Any other connect failure (unreachable network, bad host name, ...)
    #[error("connect failed: {0}")]
    Other(String),
}

impl ConnectError {
    /// Classify an io error returned by `connect`
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::Refused,
            io::ErrorKind::TimedOut => ConnectError::TimedOut,
            _ => ConnectError::Other(err.to_string()),
        }
    }
}

/// Failure on an already open connection
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    /// The remote peer closed or reset the connection
    #[error("peer closed the connection")]
    PeerClosed,

    /// Any other read/write failure
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Classify an io error returned by a socket read or write
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportError::PeerClosed,
            _ => TransportError::Other(err.to_string()),
        }
    }
}

/// A frame that could not be turned into a message
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeError {
    /// `LOC:` payload did not hold a valid coordinate pair
    #[error("malformed location frame: {0}")]
    Location(#[from] InvalidLocationError),

    /// `ADD:` payload did not hold exactly one character
    #[error("append frame must carry exactly one character, got {0}")]
    AppendLength(usize),

    /// Frame bytes were not valid UTF-8
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Frame contained a backslash escape other than `\\`, `\n` or `\r`
    #[error("invalid escape sequence in frame")]
    InvalidEscape,

    /// Frame exceeded the configured maximum length and was discarded
    #[error("frame exceeds {max_length} bytes")]
    FrameTooLong {
        /// Configured limit
        max_length: usize,
    },
}

/// A message that the configured scheme cannot put on the wire
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} cannot be encoded with the {scheme} scheme")]
pub struct EncodeError {
    /// Scheme in use
    pub scheme: Scheme,
    /// Message kind that was rejected
    pub kind: String,
}

/// Main error type for peerpad operations
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerError {
    /// Listening socket could not be opened
    #[error("cannot listen: {0}")]
    Bind(#[from] BindError),

    /// Outbound connection could not be established
    #[error("cannot connect: {0}")]
    Connect(#[from] ConnectError),

    /// Open connection failed
    #[error("connection lost: {0}")]
    Transport(#[from] TransportError),

    /// Incoming frame was malformed
    #[error("bad frame: {0}")]
    Decode(#[from] DecodeError),

    /// Message not representable under the configured scheme
    #[error("cannot send: {0}")]
    Encode(#[from] EncodeError),

    /// Outgoing frame longer than the peer accepts; nothing was sent
    #[error("frame of {length} bytes exceeds the {max_length} byte limit")]
    FrameTooLong {
        /// Escaped payload length
        length: usize,
        /// Configured limit
        max_length: usize,
    },

    /// Coordinates could not be parsed or were not finite
    #[error("invalid location: {0}")]
    InvalidLocation(#[from] InvalidLocationError),

    /// Location access denied by the platform
    #[error("location permission denied")]
    PermissionDenied,

    /// Location provider failed for another reason
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    /// Send attempted while the connection is not open
    #[error("not connected")]
    NotConnected,

    /// Setup operation does not match the peer's role
    #[error("operation requires the {expected} role")]
    RoleMismatch {
        /// Role the operation needs
        expected: String,
    },

    /// `listen`/`connect` called on a connection that was already set up
    #[error("connection already started")]
    AlreadyStarted,

    /// Connection was closed locally while still being set up
    #[error("connection cancelled")]
    Cancelled,

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PeerError {
    /// Whether this error ends the connection
    ///
    /// Fatal errors leave the connection `Closed`; every other error is
    /// scoped to a single frame or a single send.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PeerError::Bind(_) | PeerError::Connect(_) | PeerError::Transport(_)
        )
    }
}

/// Result type alias using PeerError
pub type PeerResult<T> = Result<T, PeerError>;

//! peerpad core library
//!
//! Two peers on a local network share a live text buffer and one-shot
//! location readings over a single TCP connection.
//!
//! ## Overview
//!
//! One peer listens ([`PeerRole::Server`]), the other connects
//! ([`PeerRole::Client`]). Every keystroke on either side is mirrored to the
//! other, as a single-character append/delete when possible and as a full
//! replacement otherwise.
//!
//! ## Components
//!
//! - [`protocol`]: message payloads (tagged or untagged) and newline framing
//! - [`text`]: the mirrored buffer and outgoing diffs
//! - [`location`]: coordinate parsing/formatting and location providers
//! - [`connection`]: sockets, background tasks and the state machine
//! - [`peer`]: role selection and the send API used by a UI
//!
//! ## Quick Start
//!
//! ```ignore
//! use peerpad_core::{Peer, PeerConfig, PeerRole, DEFAULT_PORT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Peer::new(PeerRole::Server, PeerConfig::default())?;
//!     server.listen().await?;
//!
//!     let client = Peer::new(PeerRole::Client, PeerConfig::default())?;
//!     client.connect("127.0.0.1", DEFAULT_PORT).await?;
//!     client.send_text("hello")?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod location;
pub mod peer;
pub mod protocol;
pub mod text;

// Re-exports
pub use config::{PeerConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, LEGACY_PORT};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, PeerRole};
pub use error::{
    BindError, ConnectError, DecodeError, EncodeError, PeerError, PeerResult, TransportError,
};
pub use location::{
    format_location, parse_location, Coordinates, DeniedLocation, FixedLocation,
    InvalidLocationError, LocationError, LocationProvider,
};
pub use peer::Peer;
pub use protocol::{FrameCodec, Message, Scheme, WireCodec};
pub use text::{diff_outgoing, SharedText, TextSync};

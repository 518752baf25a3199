//! Peer configuration
//!
//! Both peers of a pair must agree on [`Scheme`] and port. Two presets cover
//! the protocol generations in use:
//!
//! - [`PeerConfig::default`]: tagged frames on port 5000, character diffs
//! - [`PeerConfig::legacy`]: untagged frames on port 8080, whole-buffer sends

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{PeerError, PeerResult};
use crate::protocol::{Message, Scheme, DEFAULT_MAX_FRAME_LENGTH};
use crate::text::TextSync;

/// Application port of the tagged protocol generation
pub const DEFAULT_PORT: u16 = 5000;

/// Application port of the untagged protocol generation
pub const LEGACY_PORT: u16 = 8080;

/// How long a client waits for the server to accept
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for one peer session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Port the server listens on (and the client's default target)
    pub port: u16,
    /// Interface the server binds; all interfaces by default
    pub bind_host: IpAddr,
    /// Upper bound for the client's connect attempt
    pub connect_timeout: Duration,
    /// Payload scheme shared with the remote peer
    pub scheme: Scheme,
    /// How local text edits are sent
    pub text_sync: TextSync,
    /// Frames longer than this are dropped
    pub max_frame_length: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            scheme: Scheme::Tagged,
            text_sync: TextSync::Diff,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl PeerConfig {
    /// Untagged payloads on port 8080, whole buffer sent on every edit
    pub fn legacy() -> Self {
        Self {
            port: LEGACY_PORT,
            scheme: Scheme::Untagged,
            text_sync: TextSync::Replace,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_host(mut self, host: IpAddr) -> Self {
        self.bind_host = host;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_text_sync(mut self, text_sync: TextSync) -> Self {
        self.text_sync = text_sync;
        self
    }

    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Reject combinations that cannot work on the wire
    pub fn validate(&self) -> PeerResult<()> {
        let diff_frames = [Message::TextAppend(' '), Message::TextDeleteLast];
        if self.text_sync == TextSync::Diff
            && !diff_frames.iter().all(|m| self.scheme.supports(m))
        {
            return Err(PeerError::InvalidConfig(
                "character diffs need the tagged scheme".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(PeerError::InvalidConfig(
                "connect timeout must be positive".to_string(),
            ));
        }
        if self.max_frame_length == 0 {
            return Err(PeerError::InvalidConfig(
                "max frame length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

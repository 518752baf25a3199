//! Connection state and event types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConnectionState                                                │
//! │  ├── Idle: nothing started yet                                  │
//! │  ├── Listening: server waiting for its peer                     │
//! │  ├── Connecting: client dialing the server                      │
//! │  ├── Open: frames flowing both ways                             │
//! │  └── Closed: terminal, socket released                          │
//! │                                                                 │
//! │  ConnectionEvent: what the UI layer subscribes to               │
//! │  ├── StateChanged / PeerConnected / PeerRejected                │
//! │  ├── TextChanged / LocationReceived / RawReceived               │
//! │  └── DecodeFailed (non-fatal) / Failed (fatal)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, PeerError};
use crate::location::Coordinates;

/// Which end of the connection this peer is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Listens and accepts one peer
    Server,
    /// Connects out to a server
    Client,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Server => write!(f, "server"),
            PeerRole::Client => write!(f, "client"),
        }
    }
}

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started
    #[default]
    Idle,
    /// Server socket bound, waiting for a peer
    Listening,
    /// Client connect in progress
    Connecting,
    /// Peer connected, frames flowing
    Open,
    /// Session over; a new session needs a new connection
    Closed,
}

impl ConnectionState {
    /// Whether the state can never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Listening)
                | (Idle, Connecting)
                | (Listening, Open)
                | (Connecting, Open)
                | (Idle | Listening | Connecting | Open, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Listening => write!(f, "Listening"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Events emitted by a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The connection moved to a new state
    StateChanged {
        /// The new state
        state: ConnectionState,
    },
    /// A remote peer is now attached
    PeerConnected {
        /// Remote endpoint
        addr: SocketAddr,
    },
    /// An extra inbound peer was turned away because a session is open
    PeerRejected {
        /// Remote endpoint of the rejected peer
        addr: SocketAddr,
    },
    /// The mirrored text changed because of a remote message
    TextChanged {
        /// Buffer contents after the change
        content: String,
    },
    /// The remote peer reported its location
    LocationReceived {
        /// The reported coordinates
        location: Coordinates,
    },
    /// The remote peer sent an untagged payload
    RawReceived {
        /// Payload as received
        content: String,
    },
    /// A frame was dropped; the connection stays open
    DecodeFailed {
        /// Why the frame was dropped
        error: DecodeError,
    },
    /// The connection failed and is now closed
    Failed {
        /// Classified cause
        error: PeerError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn test_connection_state_default_is_idle() {
        let state: ConnectionState = Default::default();
        assert_eq!(state, ConnectionState::Idle);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Idle), "Idle");
        assert_eq!(format!("{}", ConnectionState::Listening), "Listening");
        assert_eq!(format!("{}", ConnectionState::Open), "Open");
        assert_eq!(format!("{}", ConnectionState::Closed), "Closed");
    }

    #[test]
    fn test_transitions() {
        use ConnectionState::*;
        assert!(Idle.can_transition_to(Listening));
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Closed));
        assert!(Listening.can_transition_to(Open));
        assert!(Open.can_transition_to(Closed));

        assert!(!Idle.can_transition_to(Open));
        assert!(!Listening.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Closed));
        assert!(Closed.is_terminal());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = ConnectionEvent::StateChanged {
            state: ConnectionState::Open,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["state"], "open");

        let event = ConnectionEvent::Failed {
            error: PeerError::Transport(TransportError::PeerClosed),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["error"]["Transport"], "PeerClosed");
    }

    #[test]
    fn test_role_display() {
        assert_eq!(PeerRole::Server.to_string(), "server");
        assert_eq!(PeerRole::Client.to_string(), "client");
    }
}

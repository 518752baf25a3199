//! Per-session shared state
//!
//! The read task writes, the caller reads. Every mutation happens under one
//! lock and publishes its event before the lock is released, so subscribers
//! observe changes in the order they were applied.

use std::net::SocketAddr;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::events::{ConnectionEvent, ConnectionState};
use crate::error::{DecodeError, PeerError, PeerResult};
use crate::location::Coordinates;
use crate::protocol::Message;
use crate::text::{SharedText, TextSync};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct SessionInner {
    state: ConnectionState,
    last_error: Option<PeerError>,
    text: SharedText,
    location: Option<Coordinates>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

/// State shared between a connection's tasks and its owner
pub struct Session {
    inner: RwLock<SessionInner>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl Session {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(SessionInner {
                state: ConnectionState::Idle,
                last_error: None,
                text: SharedText::new(),
                location: None,
                local_addr: None,
                remote_addr: None,
            }),
            event_tx,
        }
    }

    /// Subscribe to connection events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    /// The error that closed the connection, if it failed
    pub fn last_error(&self) -> Option<PeerError> {
        self.inner.read().last_error.clone()
    }

    /// Current mirrored text
    pub fn text(&self) -> String {
        self.inner.read().text.content().to_string()
    }

    /// Last location received or sent
    pub fn location(&self) -> Option<Coordinates> {
        self.inner.read().location
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.read().local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.read().remote_addr
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Move to `next` if the state machine allows it
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.inner.write();
        if !inner.state.can_transition_to(next) {
            debug!(from = %inner.state, to = %next, "Ignoring state transition");
            return false;
        }
        inner.state = next;
        self.emit(ConnectionEvent::StateChanged { state: next });
        true
    }

    pub(crate) fn set_local_addr(&self, addr: SocketAddr) {
        self.inner.write().local_addr = Some(addr);
    }

    /// Attach a remote peer and move to `Open`
    pub(crate) fn open(&self, remote: SocketAddr) -> bool {
        let mut inner = self.inner.write();
        if !inner.state.can_transition_to(ConnectionState::Open) {
            return false;
        }
        inner.state = ConnectionState::Open;
        inner.remote_addr = Some(remote);
        self.emit(ConnectionEvent::PeerConnected { addr: remote });
        self.emit(ConnectionEvent::StateChanged {
            state: ConnectionState::Open,
        });
        true
    }

    /// Close with a classified error
    ///
    /// Returns `false` if the session was already closed.
    pub(crate) fn fail(&self, error: PeerError) -> bool {
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return false;
        }
        inner.last_error = Some(error.clone());
        Self::close_inner(&mut inner);
        self.emit(ConnectionEvent::Failed { error });
        self.emit(ConnectionEvent::StateChanged {
            state: ConnectionState::Closed,
        });
        true
    }

    /// Close without an error (local teardown)
    pub(crate) fn close(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return false;
        }
        Self::close_inner(&mut inner);
        self.emit(ConnectionEvent::StateChanged {
            state: ConnectionState::Closed,
        });
        true
    }

    fn close_inner(inner: &mut SessionInner) {
        inner.state = ConnectionState::Closed;
        inner.text.clear();
        inner.location = None;
    }

    /// Apply a message received from the peer
    pub(crate) fn apply_remote(&self, message: Message) {
        let mut inner = self.inner.write();
        if inner.state != ConnectionState::Open {
            return;
        }
        match message {
            Message::Location(location) => {
                inner.location = Some(location);
                self.emit(ConnectionEvent::LocationReceived { location });
            }
            Message::Raw(content) => {
                self.emit(ConnectionEvent::RawReceived { content });
            }
            text_message => {
                inner.text.apply(&text_message);
                self.emit(ConnectionEvent::TextChanged {
                    content: inner.text.content().to_string(),
                });
            }
        }
    }

    /// Record a local edit and return the payloads that mirror it
    ///
    /// Every mirroring message is encoded before the buffer changes; if any
    /// of them fails to encode, the edit is dropped and the buffer keeps its
    /// old value.
    pub(crate) fn edit_local<F>(
        &self,
        new_value: &str,
        mode: TextSync,
        encode: F,
    ) -> PeerResult<Vec<String>>
    where
        F: Fn(&Message) -> PeerResult<String>,
    {
        let mut inner = self.inner.write();
        if inner.state != ConnectionState::Open {
            return Err(PeerError::NotConnected);
        }
        let payloads = inner
            .text
            .changes_to(new_value, mode)
            .iter()
            .map(encode)
            .collect::<PeerResult<Vec<_>>>()?;
        inner.text.apply_replace(new_value);
        Ok(payloads)
    }

    /// Record a locally produced location
    pub(crate) fn set_location(&self, location: Coordinates) {
        let mut inner = self.inner.write();
        if inner.state == ConnectionState::Open {
            inner.location = Some(location);
        }
    }

    pub(crate) fn report_decode_error(&self, error: DecodeError) {
        self.emit(ConnectionEvent::DecodeFailed { error });
    }

    pub(crate) fn report_rejected(&self, addr: SocketAddr) {
        self.emit(ConnectionEvent::PeerRejected { addr });
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::{Scheme, WireCodec};

    fn remote() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn encode_tagged(message: &Message) -> PeerResult<String> {
        Ok(WireCodec::new(Scheme::Tagged).encode(message)?)
    }

    fn open_session() -> Session {
        let session = Session::new();
        assert!(session.transition(ConnectionState::Connecting));
        assert!(session.open(remote()));
        session
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new();
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.text(), "");
        assert!(session.location().is_none());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_apply_remote_text() {
        let session = open_session();
        session.apply_remote(Message::TextAppend('h'));
        session.apply_remote(Message::TextAppend('i'));
        assert_eq!(session.text(), "hi");

        session.apply_remote(Message::TextDeleteLast);
        assert_eq!(session.text(), "h");

        session.apply_remote(Message::TextReplace("hello".into()));
        assert_eq!(session.text(), "hello");
    }

    #[test]
    fn test_apply_remote_location() {
        let session = open_session();
        let coords = Coordinates::new(1.0, 2.0).unwrap();
        session.apply_remote(Message::Location(coords));
        assert_eq!(session.location(), Some(coords));
    }

    #[test]
    fn test_raw_is_passed_through_not_stored() {
        let session = open_session();
        let mut events = session.subscribe();
        session.apply_remote(Message::Raw("plain".into()));

        assert_eq!(session.text(), "");
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::RawReceived {
                content: "plain".into()
            }
        );
    }

    #[test]
    fn test_messages_ignored_unless_open() {
        let session = Session::new();
        session.apply_remote(Message::TextReplace("early".into()));
        assert_eq!(session.text(), "");
        assert_eq!(
            session.edit_local("x", TextSync::Diff, encode_tagged),
            Err(PeerError::NotConnected)
        );
    }

    #[test]
    fn test_rejected_edit_keeps_old_text() {
        let session = open_session();
        assert_eq!(
            session.edit_local("ab", TextSync::Diff, encode_tagged),
            Ok(vec!["MSG:ab".to_string()])
        );

        let refuse = |_: &Message| -> PeerResult<String> {
            Err(PeerError::FrameTooLong {
                length: 100,
                max_length: 10,
            })
        };
        assert!(session.edit_local("abc", TextSync::Diff, refuse).is_err());
        assert_eq!(session.text(), "ab");

        assert_eq!(
            session.edit_local("abc", TextSync::Diff, encode_tagged),
            Ok(vec!["ADD:c".to_string()])
        );
        assert_eq!(session.text(), "abc");
    }

    #[test]
    fn test_fail_clears_state_and_records_error() {
        let session = open_session();
        session.apply_remote(Message::TextReplace("gone soon".into()));
        session.set_location(Coordinates::new(3.0, 4.0).unwrap());

        let mut events = session.subscribe();
        assert!(session.fail(TransportError::PeerClosed.into()));

        assert_eq!(session.state(), ConnectionState::Closed);
        assert_eq!(session.text(), "");
        assert!(session.location().is_none());
        assert_eq!(
            session.last_error(),
            Some(PeerError::Transport(TransportError::PeerClosed))
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            ConnectionEvent::Failed { .. }
        ));
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::StateChanged {
                state: ConnectionState::Closed
            }
        );

        // closed is terminal
        assert!(!session.fail(TransportError::PeerClosed.into()));
        assert!(!session.close());
        assert!(!session.transition(ConnectionState::Listening));
    }

    #[test]
    fn test_local_close_has_no_error() {
        let session = open_session();
        assert!(session.close());
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(session.last_error().is_none());
    }
}

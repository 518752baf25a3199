//! Peer role controller
//!
//! A [`Peer`] is what the UI layer drives: pick a role, start it, then push
//! text edits and location readings while observing state and events.

use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::PeerConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, PeerRole};
use crate::error::{PeerError, PeerResult};
use crate::location::{Coordinates, LocationError, LocationProvider};
use crate::protocol::Message;

/// One side of a peer pair
///
/// # Example
///
/// ```ignore
/// let client = Peer::new(PeerRole::Client, PeerConfig::default())?;
/// client.connect("192.168.1.101", DEFAULT_PORT).await?;
///
/// client.send_text("a")?;   // ADD:a
/// client.send_text("ab")?;  // ADD:b
/// client.send_text("a")?;   // DEL
/// ```
pub struct Peer {
    connection: ConnectionManager,
    /// Serializes local edits so their diff frames queue in order
    edit_lock: Mutex<()>,
}

impl Peer {
    /// Create an idle peer; the role cannot change afterwards
    pub fn new(role: PeerRole, config: PeerConfig) -> PeerResult<Self> {
        config.validate()?;
        Ok(Self {
            connection: ConnectionManager::new(role, config),
            edit_lock: Mutex::new(()),
        })
    }

    pub fn role(&self) -> PeerRole {
        self.connection.role()
    }

    pub fn config(&self) -> &PeerConfig {
        self.connection.config()
    }

    /// Underlying connection
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Classified error that closed the session, if any
    pub fn last_error(&self) -> Option<PeerError> {
        self.connection.last_error()
    }

    /// Current shared text
    pub fn text(&self) -> String {
        self.connection.text()
    }

    /// Last location received or sent
    pub fn location(&self) -> Option<Coordinates> {
        self.connection.location()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    /// Server role: start listening on the configured port
    pub async fn listen(&self) -> PeerResult<SocketAddr> {
        self.connection.listen().await
    }

    /// Client role: connect to `host:port`
    pub async fn connect(&self, host: &str, port: u16) -> PeerResult<SocketAddr> {
        self.connection.connect(host, port).await
    }

    /// Apply a local edit and mirror it to the peer
    ///
    /// `new_value` is the whole text after the edit. Returns the number of
    /// frames sent (zero when nothing changed). An edit that cannot be sent,
    /// e.g. one whose frame exceeds the maximum frame length, is not applied
    /// locally either, so both mirrors keep the same text.
    pub fn send_text(&self, new_value: &str) -> PeerResult<usize> {
        let _guard = self.edit_lock.lock();
        let payloads = self.connection.session().edit_local(
            new_value,
            self.config().text_sync,
            |message| self.connection.encode(message),
        )?;

        let frames = payloads.len();
        for payload in payloads {
            self.connection.enqueue(payload)?;
        }
        debug!(frames, "Sent text edit");
        Ok(frames)
    }

    /// Read the current position from `provider` and send it once
    ///
    /// Provider failures abort only this send; the connection is untouched.
    pub async fn send_location<P: LocationProvider>(&self, provider: &P) -> PeerResult<Coordinates> {
        if self.state() != ConnectionState::Open {
            return Err(PeerError::NotConnected);
        }

        let location = provider.current_location().await.map_err(|err| match err {
            LocationError::PermissionDenied => PeerError::PermissionDenied,
            LocationError::Unavailable(reason) => PeerError::LocationUnavailable(reason),
        })?;

        self.connection.session().set_location(location);
        self.connection.send(&Message::Location(location))?;
        info!(%location, "Sent location");
        Ok(location)
    }

    /// Send an untyped payload
    pub fn send_raw(&self, content: &str) -> PeerResult<()> {
        self.connection.send(&Message::Raw(content.to_string()))
    }

    /// End the session
    pub fn close(&self) {
        self.connection.close();
    }

    /// End the session after flushing frames already sent
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

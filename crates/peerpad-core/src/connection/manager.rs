//! Connection manager: sockets, tasks and the state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConnectionManager                                              │
//! │  ├── accept task (server): waits for the peer, rejects extras   │
//! │  ├── read task: FramedRead<FrameCodec> -> Session               │
//! │  ├── write task: mpsc queue -> FramedWrite<FrameCodec>          │
//! │  ├── session: state, text, location, event broadcast            │
//! │  └── shutdown: CancellationToken shared by every task           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `send` only enqueues, so it never blocks and never interleaves frames.
//! `close` cancels every task; dropping the socket halves releases the
//! connection. `shutdown` does the same and then waits for the tasks, so
//! frames queued before it still reach the peer (within [`CLOSE_GRACE`]).
//! Closed is terminal: a new session needs a new manager.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ConnectionEvent, ConnectionState, PeerRole};
use super::session::Session;
use crate::config::PeerConfig;
use crate::error::{BindError, ConnectError, PeerError, PeerResult, TransportError};
use crate::location::Coordinates;
use crate::protocol::{frame_len, FrameCodec, Message, WireCodec};

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long queued frames may keep flushing after a close
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// State shared by the manager and its background tasks
struct Shared {
    config: PeerConfig,
    wire: WireCodec,
    session: Session,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn frame_codec(&self) -> FrameCodec {
        FrameCodec::with_max_length(self.wire, self.config.max_frame_length)
    }

    /// Close the session with `error` and stop every task
    fn fail(&self, error: PeerError) -> PeerError {
        if self.session.fail(error.clone()) {
            warn!(%error, "Connection failed");
        }
        self.teardown();
        error
    }

    fn teardown(&self) {
        // Dropping the sender lets the write task drain and finish
        self.outbound.lock().take();
        self.shutdown.cancel();
    }

    /// Take ownership of a connected socket and start its tasks
    fn install(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%remote, error = %err, "Could not disable Nagle");
        }
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        *self.outbound.lock() = Some(tx);
        if !self.session.open(remote) {
            self.outbound.lock().take();
            debug!(%remote, "Session closed before the peer was attached");
            return;
        }

        info!(%remote, "Peer connected");
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(read_loop(self.clone(), reader, remote)));
        tasks.push(tokio::spawn(write_loop(self.clone(), writer, rx)));
    }
}

/// Owns one peer session from setup to teardown
///
/// # Example
///
/// ```ignore
/// let server = ConnectionManager::new(PeerRole::Server, PeerConfig::default());
/// let mut events = server.subscribe();
/// let addr = server.listen().await?;
///
/// while let Ok(event) = events.recv().await {
///     if let ConnectionEvent::TextChanged { content } = event {
///         println!("peer typed: {content}");
///     }
/// }
/// ```
pub struct ConnectionManager {
    role: PeerRole,
    shared: Arc<Shared>,
    started: AtomicBool,
}

impl ConnectionManager {
    /// Create an idle connection for `role`
    pub fn new(role: PeerRole, config: PeerConfig) -> Self {
        let wire = WireCodec::new(config.scheme);
        Self {
            role,
            shared: Arc::new(Shared {
                config,
                wire,
                session: Session::new(),
                outbound: Mutex::new(None),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
            started: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.session.state()
    }

    /// Classified error that closed the connection, if any
    pub fn last_error(&self) -> Option<PeerError> {
        self.shared.session.last_error()
    }

    /// Current mirrored text
    pub fn text(&self) -> String {
        self.shared.session.text()
    }

    /// Last location received or sent
    pub fn location(&self) -> Option<Coordinates> {
        self.shared.session.location()
    }

    /// Bound address (server) or local socket address (client)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.session.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.session.remote_addr()
    }

    /// Subscribe to connection events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.session.subscribe()
    }

    pub(crate) fn session(&self) -> &Session {
        &self.shared.session
    }

    fn expect_role(&self, expected: PeerRole) -> PeerResult<()> {
        if self.role != expected {
            return Err(PeerError::RoleMismatch {
                expected: expected.to_string(),
            });
        }
        Ok(())
    }

    fn begin(&self) -> PeerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PeerError::AlreadyStarted);
        }
        Ok(())
    }

    /// Bind the configured port and wait for a peer in the background
    ///
    /// Returns the bound address. A bind failure closes the connection with a
    /// classified [`BindError`].
    pub async fn listen(&self) -> PeerResult<SocketAddr> {
        self.expect_role(PeerRole::Server)?;
        self.begin()?;

        let addr = SocketAddr::new(self.shared.config.bind_host, self.shared.config.port);
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => return Err(self.shared.fail(BindError::from_io(&err).into())),
        };
        let local = listener
            .local_addr()
            .map_err(|err| self.shared.fail(BindError::Other(err.to_string()).into()))?;

        self.shared.session.set_local_addr(local);
        if !self.shared.session.transition(ConnectionState::Listening) {
            return Err(PeerError::Cancelled);
        }

        info!(%local, "Listening for peer");
        let accept = tokio::spawn(accept_loop(self.shared.clone(), listener));
        self.shared.tasks.lock().push(accept);
        Ok(local)
    }

    /// Connect to a server, giving up after the configured timeout
    ///
    /// Returns the server's address. Refusal, timeout and other failures
    /// close the connection with a classified [`ConnectError`].
    pub async fn connect(&self, host: &str, port: u16) -> PeerResult<SocketAddr> {
        self.expect_role(PeerRole::Client)?;
        self.begin()?;

        if !self.shared.session.transition(ConnectionState::Connecting) {
            return Err(PeerError::Cancelled);
        }
        info!(host, port, "Connecting to server");

        let timeout = self.shared.config.connect_timeout;
        let attempt = tokio::time::timeout(timeout, TcpStream::connect((host, port)));
        let stream = tokio::select! {
            _ = self.shared.shutdown.cancelled() => return Err(PeerError::Cancelled),
            result = attempt => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => return Err(self.shared.fail(ConnectError::from_io(&err).into())),
                Err(_) => return Err(self.shared.fail(ConnectError::TimedOut.into())),
            },
        };

        let remote = stream
            .peer_addr()
            .map_err(|err| self.shared.fail(ConnectError::Other(err.to_string()).into()))?;
        if let Ok(local) = stream.local_addr() {
            self.shared.session.set_local_addr(local);
        }

        self.shared.install(stream, remote);
        if self.state() != ConnectionState::Open {
            return Err(PeerError::Cancelled);
        }
        Ok(remote)
    }

    /// Queue a message for the peer
    ///
    /// Fire-and-forget: returns once the frame is queued. Fails with
    /// `NotConnected` unless the connection is open.
    pub fn send(&self, message: &Message) -> PeerResult<()> {
        if self.state() != ConnectionState::Open {
            return Err(PeerError::NotConnected);
        }
        let payload = self.encode(message)?;
        self.enqueue(payload)?;
        debug!(kind = message.kind(), "Queued frame");
        Ok(())
    }

    /// Encode a message, refusing payloads the peer would discard as too long
    pub(crate) fn encode(&self, message: &Message) -> PeerResult<String> {
        let payload = self.shared.wire.encode(message)?;
        let length = frame_len(&payload);
        let max_length = self.shared.config.max_frame_length;
        if length > max_length {
            return Err(PeerError::FrameTooLong { length, max_length });
        }
        Ok(payload)
    }

    /// Queue an encoded payload for the write task
    pub(crate) fn enqueue(&self, payload: String) -> PeerResult<()> {
        let outbound = self.shared.outbound.lock();
        let tx = outbound.as_ref().ok_or(PeerError::NotConnected)?;
        tx.send(payload).map_err(|_| PeerError::NotConnected)
    }

    /// Close the connection
    ///
    /// Safe to call from any task and more than once. Interrupts a pending
    /// accept, connect or read and clears the session state.
    pub fn close(&self) {
        if self.shared.session.close() {
            info!(role = %self.role, "Connection closed");
        }
        self.shared.teardown();
    }

    /// Close the connection and wait for its background tasks to finish
    ///
    /// Frames queued before the call are flushed first, bounded by
    /// [`CLOSE_GRACE`].
    pub async fn shutdown(&self) {
        self.close();
        let tasks = std::mem::take(&mut *self.shared.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Connection task panicked");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wait for the peer; turn away anyone else while a session is open
async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if shared.session.state() == ConnectionState::Open {
                        info!(%addr, "Rejecting peer, session already open");
                        shared.session.report_rejected(addr);
                        drop(stream);
                        continue;
                    }
                    shared.install(stream, addr);
                }
                Err(err) => {
                    warn!(error = %err, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("Accept task ended");
}

/// Decode frames and apply them until the peer goes away
async fn read_loop(shared: Arc<Shared>, reader: OwnedReadHalf, remote: SocketAddr) {
    let mut frames = FramedRead::new(reader, shared.frame_codec());

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(Ok(message))) => {
                    debug!(%remote, kind = message.kind(), "Received frame");
                    shared.session.apply_remote(message);
                }
                Some(Ok(Err(error))) => {
                    warn!(%remote, %error, "Dropping malformed frame");
                    shared.session.report_decode_error(error);
                }
                Some(Err(err)) => {
                    shared.fail(TransportError::from_io(&err).into());
                    break;
                }
                None => {
                    info!(%remote, "Peer closed the connection");
                    shared.fail(TransportError::PeerClosed.into());
                    break;
                }
            },
        }
    }
    debug!(%remote, "Read task ended");
}

/// Write queued frames one at a time
///
/// Ends when the queue's sender is dropped at teardown. Frames still queued
/// at that point get [`CLOSE_GRACE`] to flush.
async fn write_loop(
    shared: Arc<Shared>,
    writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    let mut frames = FramedWrite::new(writer, shared.frame_codec());

    let drain = async {
        while let Some(payload) = rx.recv().await {
            frames.send(payload).await?;
        }
        frames.close().await
    };
    let deadline = async {
        shared.shutdown.cancelled().await;
        tokio::time::sleep(CLOSE_GRACE).await;
    };

    tokio::select! {
        result = drain => {
            if let Err(err) = result {
                shared.fail(TransportError::from_io(&err).into());
            }
        }
        _ = deadline => debug!("Dropped unsent frames at close"),
    }
    debug!("Write task ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manager_starts_idle() {
        let manager = ConnectionManager::new(PeerRole::Client, PeerConfig::default());
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.role(), PeerRole::Client);
        assert!(manager.last_error().is_none());
        assert!(manager.remote_addr().is_none());
    }

    #[tokio::test]
    async fn test_send_while_idle_is_not_connected() {
        let manager = ConnectionManager::new(PeerRole::Client, PeerConfig::default());
        assert_eq!(
            manager.send(&Message::TextAppend('a')),
            Err(PeerError::NotConnected)
        );
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_role_mismatch() {
        let client = ConnectionManager::new(PeerRole::Client, PeerConfig::default());
        assert!(matches!(
            client.listen().await,
            Err(PeerError::RoleMismatch { .. })
        ));

        let server = ConnectionManager::new(PeerRole::Server, PeerConfig::default());
        assert!(matches!(
            server.connect("127.0.0.1", 1).await,
            Err(PeerError::RoleMismatch { .. })
        ));
        assert_eq!(server.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_listen_twice_fails() {
        let config = PeerConfig::default()
            .with_port(0)
            .with_bind_host("127.0.0.1".parse().unwrap());
        let server = ConnectionManager::new(PeerRole::Server, config);

        let addr = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.state(), ConnectionState::Listening);
        assert_eq!(server.local_addr(), Some(addr));

        assert_eq!(server.listen().await, Err(PeerError::AlreadyStarted));
        server.close();
        assert_eq!(server.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_accept_task() {
        let config = PeerConfig::default()
            .with_port(0)
            .with_bind_host("127.0.0.1".parse().unwrap());
        let server = ConnectionManager::new(PeerRole::Server, config);
        let addr = server.listen().await.unwrap();

        server.shutdown().await;
        assert_eq!(server.state(), ConnectionState::Closed);
        assert!(server.shared.tasks.lock().is_empty());

        // the listener went away with the accept task
        std::net::TcpListener::bind(addr).unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let manager = ConnectionManager::new(PeerRole::Client, PeerConfig::default());
        manager.close();
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.last_error().is_none());
    }
}

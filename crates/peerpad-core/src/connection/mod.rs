//! TCP connection lifecycle
//!
//! ```text
//!           listen()            accept
//!   Idle ─────────────▶ Listening ─────────▶ Open ──┐
//!    │                                        ▲     │ peer closed,
//!    │      connect()                success  │     │ io error,
//!    └─────────────▶ Connecting ──────────────┘     │ close()
//!                        │                          ▼
//!                        └── refused / timeout ──▶ Closed
//! ```
//!
//! A server holds one session at a time: inbound connections that arrive
//! while a session is open are closed immediately and reported as
//! [`ConnectionEvent::PeerRejected`].

pub mod events;
pub mod manager;
pub mod session;

pub use events::{ConnectionEvent, ConnectionState, PeerRole};
pub use manager::ConnectionManager;
pub use session::Session;

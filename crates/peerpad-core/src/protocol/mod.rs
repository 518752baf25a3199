//! Wire protocol
//!
//! Two layers turn a TCP byte stream into messages:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  FrameCodec (frame.rs)                                          │
//! │  ├── splits the stream on '\n'                                  │
//! │  └── escapes '\\', '\n', '\r' inside a frame                    │
//! │                                                                 │
//! │  WireCodec (message.rs)                                         │
//! │  ├── Tagged:   LOC:<lat>,<lon> | ADD:<c> | DEL | MSG:<text>     │
//! │  │             anything else is Raw                             │
//! │  └── Untagged: "<num>,<num>" is a Location, else TextReplace    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both peers must be configured with the same [`Scheme`]; nothing on the
//! wire identifies it.
//!
//! ## Message Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |--- ADD:a -------------------->|  mirror "a"
//!   |--- ADD:b -------------------->|  mirror "ab"
//!   |--- DEL ---------------------->|  mirror "a"
//!   |--- LOC:40.4168,-3.7038 ------>|  location updated
//! ```

pub mod frame;
pub mod message;

pub use frame::{frame_len, FrameCodec, DEFAULT_MAX_FRAME_LENGTH};
pub use message::{Message, Scheme, WireCodec};

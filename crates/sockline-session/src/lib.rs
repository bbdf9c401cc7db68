//! Session state for sockline connections.
//!
//! This crate holds everything the connection actor needs to remember
//! between transport instances:
//!
//! 1. **Options**: what the application asked for ([`ConnectOptions`],
//!    [`ReconnectPolicy`])
//! 2. **Lifecycle**: where the connection is ([`ConnectionState`])
//! 3. **Retry timing**: how long to wait before the next attempt
//!    ([`Backoff`])
//! 4. **Session data**: negotiated session id, outbound buffer, pending
//!    acknowledgement callbacks and announced namespaces ([`Session`])
//!
//! # How it fits in the stack
//!
//! ```text
//! sockline (above)            ← Connection actor owns one Session
//!     ↕
//! Session layer (this crate)  ← options, state machine, buffer, acks
//!     ↕
//! Protocol layer (below)      ← Packet, Handshake
//! ```
//!
//! Nothing here is shared: the connection actor owns the [`Session`] and
//! is the only writer.

mod backoff;
mod config;
mod error;
mod session;
mod state;

pub use backoff::Backoff;
pub use config::{ConnectOptions, ReconnectPolicy};
pub use error::SessionError;
pub use session::{AckCallback, Session};
pub use state::ConnectionState;

//! # sockline
//!
//! Real-time client for a multiplexed, event-based messaging protocol.
//!
//! One [`Connection`] keeps a logical session with a server alive over
//! interchangeable transports: it negotiates a handshake, answers and sends
//! heartbeats, buffers while the link is down, reconnects with backoff and
//! re-announces every open namespace afterwards. Application code talks to
//! [`Namespace`] channels with a plain emit/listen interface.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use sockline::prelude::*;
//!
//! # async fn demo() -> sockline::Result<()> {
//! let connection = Connection::builder("http://localhost:3000").build()?;
//!
//! let chat = connection.of("/chat");
//! chat.on("message", |args| println!("chat: {:?}", args.values()));
//! chat.emit("join", vec![json!("lobby")])?;
//!
//! connection.wait_for(ConnectionState::Connected).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! ```text
//! sockline            ← Connection, Namespace, EventEmitter (this crate)
//!   ├─ sockline-session    ← options, backoff, state machine, buffer, acks
//!   ├─ sockline-heartbeat  ← heartbeat timer and liveness deadline
//!   ├─ sockline-protocol   ← packet and payload codecs, handshake
//!   └─ sockline-transport  ← Transport trait, WebSocket, in-memory
//! ```

mod actor;
mod connection;
mod error;
mod events;
mod namespace;

pub use connection::{Connection, ConnectionBuilder};
pub use error::{Error, Result};
pub use events::{Args, EventEmitter, Listener, Reply};
pub use namespace::Namespace;

pub use sockline_protocol as protocol;
pub use sockline_session::{ConnectOptions, ConnectionState, ReconnectPolicy};
pub use sockline_transport as transport;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything needed for typical use.
pub mod prelude {
    pub use crate::{
        Args, ConnectOptions, Connection, ConnectionBuilder, ConnectionState, Error,
        EventEmitter, Listener, Namespace, ReconnectPolicy, Reply,
    };
}

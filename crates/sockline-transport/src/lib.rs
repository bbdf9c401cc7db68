//! Transport abstraction layer for sockline.
//!
//! Provides the [`Transport`] and [`TransportFactory`] traits that abstract
//! over the network substrate a connection runs on. A transport only moves
//! text frames; framing of packets inside a frame is the protocol crate's
//! job.
//!
//! The connection holds a preference-ordered list of factories and builds
//! one transport per connection attempt, so the traits are object safe
//! (`Box<dyn Transport>`, `Arc<dyn TransportFactory>`).
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket client transport via `tokio-tungstenite`
//! - `memory` (default): in-process transport for tests and embedding

mod error;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketFactory, WebSocketTransport};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use url::Url;

/// Counter for generating unique transport IDs.
static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one transport instance, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    /// Creates a new `TransportId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// Where a transport should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The server URL as given by the application (`http://host:port/?q`).
    pub url: Url,
    /// Path prefix the server listens under.
    pub resource: String,
    /// Protocol revision, the first path segment after `resource`.
    pub protocol: u32,
}

impl Target {
    /// Default resource path.
    pub const DEFAULT_RESOURCE: &'static str = "socket.io";

    /// A target with the default resource path.
    pub fn new(url: Url, protocol: u32) -> Self {
        Self {
            url,
            resource: Self::DEFAULT_RESOURCE.to_string(),
            protocol,
        }
    }

    /// The query string of the target URL, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.url.query().filter(|q| !q.is_empty())
    }

    /// `host:port`, with the scheme's default port filled in.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or("localhost");
        match self.url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Builds the URL a transport named `transport` should open, switching
    /// the scheme to `ws`/`wss` when `websocket` is true.
    ///
    /// ```text
    /// {scheme}://{host}:{port}/{resource}/{protocol}/{transport}/[?query]
    /// ```
    pub fn transport_url(&self, transport: &str, websocket: bool) -> String {
        let secure = matches!(self.url.scheme(), "https" | "wss");
        let scheme = match (websocket, secure) {
            (true, true) => "wss",
            (true, false) => "ws",
            (false, true) => "https",
            (false, false) => "http",
        };
        let mut out = format!(
            "{scheme}://{}/{}/{}/{transport}/",
            self.authority(),
            self.resource.trim_matches('/'),
            self.protocol
        );
        if let Some(query) = self.query() {
            out.push('?');
            out.push_str(query);
        }
        out
    }
}

/// A single client-side transport that can open, move text frames, and
/// close.
///
/// `recv` returning `Ok(None)` means the remote closed cleanly; `Err`
/// means the transport failed. Both end the transport's life; the
/// connection builds a fresh one to reconnect.
///
/// `recv` must be cancel safe: the connection polls it inside
/// `tokio::select!` next to timers and application commands.
#[async_trait]
pub trait Transport: Send + 'static {
    /// The transport name, matching its factory's name.
    fn name(&self) -> &str;

    /// Unique id of this instance.
    fn id(&self) -> TransportId;

    /// Opens the underlying channel.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Sends one frame.
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Receives the next frame.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Closes the transport. Closing a transport that is not open is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Builds transports of one kind.
///
/// The factory's `name` is the capability tag the connection matches
/// against its preference list and the server's advertised transports.
pub trait TransportFactory: Send + Sync + 'static {
    /// The transport name (`"websocket"`, `"memory"`, ...).
    fn name(&self) -> &str;

    /// Whether this transport can run in the current environment.
    fn is_available(&self) -> bool {
        true
    }

    /// Creates an unopened transport aimed at `target`.
    fn create(&self, target: &Target) -> Box<dyn Transport>;
}

//! Namespace channels multiplexed over one connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use sockline_protocol::Packet;
use tokio::sync::mpsc;

use crate::connection::Command;
use crate::events::{Args, EventEmitter, Listener};
use crate::{Error, Result};

/// State of one namespace shared between its handles and the connection
/// task. Holds no channel back to the task, so the registry entry never
/// keeps a connection alive.
pub(crate) struct NamespaceShared {
    pub(crate) endpoint: String,
    pub(crate) events: EventEmitter<Args>,
    connected: AtomicBool,
}

impl NamespaceShared {
    pub(crate) fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            events: EventEmitter::new(),
            connected: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Sets the flag and returns its previous value.
    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::SeqCst)
    }
}

/// Handle to one endpoint of a [`Connection`](crate::Connection).
///
/// Obtained from [`Connection::of`](crate::Connection::of); cheap to clone.
/// Sends are queued to the connection task and buffered there while the
/// connection is down.
///
/// Events received on this endpoint:
///
/// | event | args |
/// |---|---|
/// | `message` | text (string) or JSON body |
/// | any event name | the event's arguments |
/// | `connect` | none; the server confirmed the endpoint |
/// | `connect_failed` | reason, when the server refused or never confirmed |
/// | `disconnect` | reason |
/// | `error` | reason |
///
/// Connection lifecycle events (`connecting`, `reconnecting`, ...) are
/// delivered to every namespace as well.
#[derive(Clone)]
pub struct Namespace {
    shared: Arc<NamespaceShared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("endpoint", &self.shared.endpoint)
            .field("connected", &self.shared.is_connected())
            .finish()
    }
}

impl Namespace {
    pub(crate) fn new(shared: Arc<NamespaceShared>, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { shared, commands }
    }

    /// The endpoint name, `""` for the default namespace.
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Whether the server has confirmed this endpoint.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn packet(&self, packet: Packet, ack: Option<sockline_session::AckCallback>) -> Result<()> {
        self.command(Command::Send { packet, ack })
    }

    // -- Sending ---------------------------------------------------------

    /// Sends a text message.
    pub fn send(&self, data: impl Into<String>) -> Result<()> {
        self.packet(Packet::message(self.endpoint(), data), None)
    }

    /// Sends a text message and calls `ack` when the server acknowledges
    /// it.
    pub fn send_with_ack<F>(&self, data: impl Into<String>, ack: F) -> Result<()>
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        self.packet(Packet::message(self.endpoint(), data), Some(Box::new(ack)))
    }

    /// Sends a JSON message.
    pub fn send_json(&self, data: Value) -> Result<()> {
        self.packet(Packet::json(self.endpoint(), data), None)
    }

    /// Sends a JSON message and calls `ack` when the server acknowledges
    /// it.
    pub fn send_json_with_ack<F>(&self, data: Value, ack: F) -> Result<()>
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        self.packet(Packet::json(self.endpoint(), data), Some(Box::new(ack)))
    }

    /// Emits a named event to the server.
    pub fn emit(&self, name: impl Into<String>, args: Vec<Value>) -> Result<()> {
        self.packet(Packet::event(self.endpoint(), name, args), None)
    }

    /// Emits a named event; `ack` receives the arguments of the server's
    /// acknowledgement.
    ///
    /// ```no_run
    /// # async fn demo(chat: sockline::Namespace) -> sockline::Result<()> {
    /// use serde_json::json;
    ///
    /// chat.emit_with_ack("nickname", vec![json!("tobi")], |reply| {
    ///     println!("server said {reply:?}");
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn emit_with_ack<F>(&self, name: impl Into<String>, args: Vec<Value>, ack: F) -> Result<()>
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        self.packet(
            Packet::event(self.endpoint(), name, args),
            Some(Box::new(ack)),
        )
    }

    /// Leaves this endpoint. On the default namespace this disconnects the
    /// whole connection; otherwise other namespaces and the transport are
    /// unaffected.
    pub fn disconnect(&self) -> Result<()> {
        if self.endpoint().is_empty() {
            self.command(Command::Disconnect)
        } else {
            self.command(Command::Leave {
                endpoint: self.endpoint().to_string(),
            })
        }
    }

    // -- Listening -------------------------------------------------------

    /// This namespace's event dispatcher.
    pub fn events(&self) -> &EventEmitter<Args> {
        &self.shared.events
    }

    /// Registers `handler` for `event`. See [`EventEmitter::on`].
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Listener<Args>
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.shared.events.on(event, handler)
    }

    /// Registers `handler` for the next `event` only.
    pub fn once<F>(&self, event: impl Into<String>, handler: F) -> Listener<Args>
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.shared.events.once(event, handler)
    }

    pub fn remove_listener(&self, event: &str, listener: &Listener<Args>) -> usize {
        self.shared.events.remove_listener(event, listener)
    }
}

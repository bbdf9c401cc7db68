//! `Connection` handle and builder.
//!
//! A connection is a Tokio task (the connection actor) that owns the
//! transport and every piece of session state. [`Connection`] and
//! [`Namespace`] are cheap handles that queue commands to that task, so
//! all state changes happen on one logical thread.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use sockline_protocol::{PROTOCOL_VERSION, Packet};
use sockline_session::{AckCallback, ConnectOptions, ConnectionState, ReconnectPolicy, SessionError};
use sockline_transport::{Target, TransportFactory};
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::actor::ConnectionActor;
use crate::events::{Args, EventEmitter, Listener};
use crate::namespace::{Namespace, NamespaceShared};
use crate::{Error, Result};

/// Commands sent from handles to the connection task.
pub(crate) enum Command {
    Connect,
    Disconnect,
    Send {
        packet: Packet,
        ack: Option<AckCallback>,
    },
    /// A namespace was created with `of()`.
    Open { endpoint: String },
    /// A namespace handle called `disconnect()`.
    Leave { endpoint: String },
    SetBuffer(bool),
    Flush,
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// State visible to both the handles and the connection task.
pub(crate) struct Shared {
    pub(crate) events: EventEmitter<Args>,
    pub(crate) namespaces: Mutex<FxHashMap<String, Arc<NamespaceShared>>>,
    pub(crate) session_id: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        let mut namespaces = FxHashMap::default();
        namespaces.insert(String::new(), Arc::new(NamespaceShared::new("")));
        Self {
            events: EventEmitter::new(),
            namespaces: Mutex::new(namespaces),
            session_id: Mutex::new(None),
        }
    }

    pub(crate) fn namespace(&self, endpoint: &str) -> Option<Arc<NamespaceShared>> {
        self.namespaces.lock().get(endpoint).cloned()
    }

    pub(crate) fn default_namespace(&self) -> Option<Arc<NamespaceShared>> {
        self.namespace("")
    }

    /// Emits `event` on the connection and then on every namespace.
    ///
    /// The registry lock is released before any handler runs.
    pub(crate) fn publish(&self, event: &str, values: Vec<Value>) {
        let args = Args::new(values);
        self.events.emit(event, &args);
        let namespaces: Vec<_> = self.namespaces.lock().values().cloned().collect();
        for namespace in namespaces {
            namespace.events.emit(event, &args);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Handle to a connection.
///
/// Cheap to clone. The connection task stops once every `Connection` and
/// [`Namespace`] handle is dropped. A listener that captures a handle keeps
/// the task alive until [`disconnect`](Self::disconnect) and the handle
/// are both gone.
///
/// Connection-level events:
///
/// | event | args |
/// |---|---|
/// | `connecting` | transport name |
/// | `connect` | none |
/// | `connect_failed` | none |
/// | `disconnect` | reason: `booted`, `forced close`, `heartbeat timeout`, `transport close`, `transport error` |
/// | `reconnecting` | delay in ms, attempt number |
/// | `reconnect` | transport name, attempts taken |
/// | `reconnect_failed` | none |
/// | `error` | reason |
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}

impl Connection {
    /// Creates a builder for a connection to `url`
    /// (`http://host:port/?query`).
    pub fn builder(url: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(url)
    }

    /// Connects to `url` with default options.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect_to(url: impl Into<String>) -> Result<Self> {
        Self::builder(url).build()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Starts connecting. A no-op while connecting, connected or
    /// reconnecting.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Closes the connection for good: cancels any reconnect attempt,
    /// drops buffered packets and pending acks, and destroys every
    /// namespace except the default one. Idempotent.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Returns the namespace for `endpoint`, creating and announcing it on
    /// first use. `""` is the default namespace; any other name is taken as
    /// a path, so `of("chat")` and `of("/chat")` are the same namespace.
    pub fn of(&self, endpoint: &str) -> Namespace {
        let endpoint = endpoint_path(endpoint);
        let endpoint: &str = &endpoint;
        let (shared, created) = {
            let mut namespaces = self.shared.namespaces.lock();
            match namespaces.get(endpoint) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let shared = Arc::new(NamespaceShared::new(endpoint));
                    namespaces.insert(endpoint.to_string(), Arc::clone(&shared));
                    (shared, true)
                }
            }
        };
        if created && !endpoint.is_empty() {
            // A closed task just means the namespace is never announced.
            let _ = self.command(Command::Open {
                endpoint: endpoint.to_string(),
            });
        }
        Namespace::new(shared, self.commands.clone())
    }

    /// Enables or disables explicit buffering. While enabled, sends are
    /// held back; disabling flushes them as one frame in FIFO order.
    pub fn set_buffer(&self, buffering: bool) -> Result<()> {
        self.command(Command::SetBuffer(buffering))
    }

    /// Sends everything buffered now, if connected.
    pub fn flush_buffer(&self) -> Result<()> {
        self.command(Command::Flush)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Session id from the last handshake.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.lock().clone()
    }

    /// Waits until the connection reaches `target`.
    ///
    /// # Errors
    /// [`Error::ConnectionClosed`] if the task stops first.
    pub async fn wait_for(&self, target: ConnectionState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// A receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The connection's event dispatcher.
    pub fn events(&self) -> &EventEmitter<Args> {
        &self.shared.events
    }

    /// Registers `handler` for a connection-level `event`.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Listener<Args>
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.shared.events.on(event, handler)
    }

    /// Registers `handler` for the next connection-level `event` only.
    pub fn once<F>(&self, event: impl Into<String>, handler: F) -> Listener<Args>
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.shared.events.once(event, handler)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a [`Connection`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use sockline::prelude::*;
///
/// # async fn demo() -> sockline::Result<()> {
/// let connection = Connection::builder("http://localhost:3000")
///     .reconnection(ReconnectPolicy::unbounded())
///     .connect_timeout(Duration::from_secs(5))
///     .build()?;
/// connection.wait_for(ConnectionState::Connected).await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionBuilder {
    url: String,
    options: ConnectOptions,
    factories: Vec<Arc<dyn TransportFactory>>,
}

impl ConnectionBuilder {
    /// Creates a builder with default options.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: ConnectOptions::default(),
            factories: Vec::new(),
        }
    }

    /// Replaces all options at once.
    pub fn options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a transport implementation. Without any registration the
    /// WebSocket transport is used.
    pub fn transport(mut self, factory: impl TransportFactory) -> Self {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Sets the transport preference order by name.
    pub fn transports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.transports = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.options.reconnect = enabled;
        self
    }

    pub fn reconnection(mut self, policy: ReconnectPolicy) -> Self {
        self.options.reconnection = policy;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Overrides the heartbeat timeout negotiated by the server.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.options.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn manual_flush(mut self, manual: bool) -> Self {
        self.options.manual_flush = manual;
        self
    }

    pub fn auto_connect(mut self, auto: bool) -> Self {
        self.options.auto_connect = auto;
        self
    }

    pub fn try_multiple_transports(mut self, enabled: bool) -> Self {
        self.options.try_multiple_transports = enabled;
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.options.resource = resource.into();
        self
    }

    /// Validates the configuration and spawns the connection task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - [`Error::Url`] if the URL does not parse.
    /// - [`Error::Session`] for invalid options, or when no registered
    ///   transport matches the preference list.
    pub fn build(mut self) -> Result<Connection> {
        let url = Url::parse(&self.url)?;
        self.options.validate()?;

        if self.factories.is_empty() {
            self.factories.push(Arc::new(sockline_transport::WebSocketFactory));
        }
        let factories = resolve_factories(&self.options.transports, &self.factories)?;

        let target = Target {
            url,
            resource: self.options.resource.clone(),
            protocol: PROTOCOL_VERSION,
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared::new());
        let auto_connect = self.options.auto_connect;

        tracing::info!(url = %target.url, transports = ?self.options.transports, "connection created");
        let actor = ConnectionActor::new(
            target,
            self.options,
            factories,
            commands_rx,
            state_tx,
            Arc::clone(&shared),
        );
        tokio::spawn(actor.run());

        let connection = Connection {
            commands: commands_tx,
            state: state_rx,
            shared,
        };
        if auto_connect {
            connection.connect()?;
        }
        Ok(connection)
    }
}

/// `""` or a path starting with `/`.
fn endpoint_path(endpoint: &str) -> Cow<'_, str> {
    if endpoint.is_empty() || endpoint.starts_with('/') {
        Cow::Borrowed(endpoint)
    } else {
        Cow::Owned(format!("/{endpoint}"))
    }
}

/// Orders the registered factories by the preference list, skipping names
/// with no available factory.
fn resolve_factories(
    preference: &[String],
    registered: &[Arc<dyn TransportFactory>],
) -> Result<Vec<Arc<dyn TransportFactory>>> {
    let resolved: Vec<_> = preference
        .iter()
        .filter_map(|name| {
            let found = registered
                .iter()
                .find(|f| f.name() == name.as_str() && f.is_available())
                .cloned();
            if found.is_none() {
                tracing::debug!(transport = %name, "no available transport registered, skipping");
            }
            found
        })
        .collect();
    if resolved.is_empty() {
        return Err(SessionError::UnknownTransport(preference.join(",")).into());
    }
    Ok(resolved)
}

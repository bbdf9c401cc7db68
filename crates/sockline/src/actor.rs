//! The connection task.
//!
//! One [`ConnectionActor`] runs per connection and is the only code that
//! touches the transport, the [`Session`] (buffer, acks, open endpoints),
//! the heartbeat and the reconnect schedule. Everything it waits on is one
//! branch of a single `tokio::select!`:
//!
//! - commands from [`Connection`](crate::Connection) and
//!   [`Namespace`](crate::Namespace) handles
//! - acknowledgements sent through a [`Reply`]
//! - frames from the open transport
//! - the in-flight connect attempt
//! - the reconnect timer
//! - the heartbeat scheduler
//! - namespace confirmation deadlines

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use sockline_heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatEvent};
use sockline_protocol::{
    AckMode, Handshake, Packet, decode_packet, encode_packet, encode_payload, split_payload,
};
use sockline_session::{Backoff, ConnectOptions, ConnectionState, Session, SessionError};
use sockline_transport::{Target, Transport, TransportError, TransportFactory};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::connection::{Command, Shared};
use crate::events::{Args, Reply};
use crate::{Error, Result};

/// Disconnect reasons reported with the `disconnect` event.
pub(crate) mod reason {
    pub const BOOTED: &str = "booted";
    pub const FORCED_CLOSE: &str = "forced close";
    pub const HEARTBEAT_TIMEOUT: &str = "heartbeat timeout";
    pub const TRANSPORT_CLOSE: &str = "transport close";
    pub const TRANSPORT_ERROR: &str = "transport error";
}

/// A transport that opened and delivered a handshake.
struct Established {
    transport: Box<dyn Transport>,
    handshake: Handshake,
}

type Attempt = Pin<Box<dyn Future<Output = Result<Established>> + Send>>;

pub(crate) struct ConnectionActor {
    target: Target,
    options: ConnectOptions,
    factories: Vec<Arc<dyn TransportFactory>>,
    commands: mpsc::UnboundedReceiver<Command>,
    replies_tx: mpsc::UnboundedSender<Packet>,
    replies: mpsc::UnboundedReceiver<Packet>,
    state: watch::Sender<ConnectionState>,
    shared: Arc<Shared>,
    session: Session,
    transport: Option<Box<dyn Transport>>,
    heartbeat: Heartbeat,
    backoff: Backoff,
    attempt: Option<Attempt>,
    retry_at: Option<Instant>,
    /// Namespaces announced but not yet confirmed by the server.
    confirm_deadlines: FxHashMap<String, Instant>,
}

impl ConnectionActor {
    pub(crate) fn new(
        target: Target,
        options: ConnectOptions,
        factories: Vec<Arc<dyn TransportFactory>>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        shared: Arc<Shared>,
    ) -> Self {
        let (replies_tx, replies) = mpsc::unbounded_channel();
        let backoff = Backoff::new(options.reconnection.clone());
        Self {
            target,
            options,
            factories,
            commands,
            replies_tx,
            replies,
            state,
            shared,
            session: Session::new(),
            transport: None,
            heartbeat: Heartbeat::new(HeartbeatConfig::default()),
            backoff,
            attempt: None,
            retry_at: None,
            confirm_deadlines: FxHashMap::default(),
        }
    }

    /// Runs the task until every handle is dropped.
    pub(crate) async fn run(mut self) {
        debug!(url = %self.target.url, "connection task started");

        loop {
            let retry_at = self.retry_at;
            let confirm_at = self.confirm_deadlines.values().min().copied();

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(packet) = self.replies.recv() => {
                    self.send_packet(packet).await;
                }
                result = next_attempt(&mut self.attempt) => {
                    self.attempt = None;
                    self.handle_attempt(result).await;
                }
                frame = next_frame(&mut self.transport) => {
                    self.handle_frame(frame).await;
                }
                event = self.heartbeat.next_event() => {
                    self.handle_heartbeat(event).await;
                }
                () = sleep_until(retry_at) => {
                    self.retry_at = None;
                    self.start_attempt();
                }
                () = sleep_until(confirm_at) => {
                    self.expire_confirmations();
                }
            }
        }

        self.attempt = None;
        self.release_transport().await;
        debug!("connection task stopped");
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, next: ConnectionState) {
        let current = self.current();
        if current == next {
            return;
        }
        match current.transition_to(next) {
            Ok(next) => {
                debug!(from = %current, to = %next, "connection state");
                self.state.send_replace(next);
            }
            Err(e) => warn!(error = %e, "state change rejected"),
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect().await,
            Command::Send { mut packet, ack } => {
                if let Some(callback) = ack {
                    let id = self.session.register_ack(callback);
                    let mode = if matches!(packet, Packet::Event { .. }) {
                        AckMode::Data
                    } else {
                        AckMode::Auto
                    };
                    if !packet.set_message_id(id.to_string(), mode) {
                        warn!(kind = %packet.packet_type(), "packet cannot carry an ack id");
                    }
                }
                self.send_packet(packet).await;
            }
            Command::Open { endpoint } => {
                if self.session.open_endpoint(&endpoint) && self.current().is_connected() {
                    self.announce(vec![endpoint]).await;
                }
            }
            Command::Leave { endpoint } => self.leave(&endpoint).await,
            Command::SetBuffer(buffering) => {
                self.session.set_buffering(buffering);
                if !buffering {
                    self.flush().await;
                }
            }
            Command::Flush => self.flush().await,
        }
    }

    fn connect(&mut self) {
        let state = self.current();
        if state.is_active() {
            trace!(%state, "connect ignored");
            return;
        }
        self.set_state(ConnectionState::Connecting);
        self.start_attempt();
    }

    async fn disconnect(&mut self) {
        let was = self.current();
        if was == ConnectionState::Disconnected {
            trace!("disconnect ignored, already disconnected");
            return;
        }
        info!("disconnecting");
        self.set_state(ConnectionState::Disconnecting);
        self.attempt = None;
        self.retry_at = None;
        self.backoff.reset();

        if let Some(transport) = self.transport.as_mut() {
            if let Ok(frame) = encode_packet(&Packet::disconnect("")) {
                if let Err(e) = transport.send(&frame).await {
                    debug!(error = %e, "disconnect packet not delivered");
                }
            }
        }
        self.release_transport().await;
        self.set_state(ConnectionState::Disconnected);
        if was.is_connected() {
            self.shared
                .publish("disconnect", vec![Value::from(reason::FORCED_CLOSE)]);
        }
        self.reset_session();
    }

    async fn leave(&mut self, endpoint: &str) {
        let announced = self.session.close_endpoint(endpoint);
        if announced && self.current().is_connected() {
            self.send_packet(Packet::disconnect(endpoint)).await;
        }
        self.detach(endpoint, reason::FORCED_CLOSE);
    }

    /// Forgets `endpoint` locally and tells its listeners.
    fn detach(&mut self, endpoint: &str, why: &str) {
        self.session.close_endpoint(endpoint);
        self.confirm_deadlines.remove(endpoint);
        let removed = self.shared.namespaces.lock().remove(endpoint);
        if let Some(namespace) = removed {
            namespace.set_connected(false);
            debug!(endpoint, reason = why, "namespace detached");
            namespace
                .events
                .emit("disconnect", &Args::new(vec![Value::from(why)]));
        }
    }

    // -----------------------------------------------------------------------
    // Connecting
    // -----------------------------------------------------------------------

    fn start_attempt(&mut self) {
        let candidates = self
            .options
            .candidate_transports(self.session.advertised_transports());
        let factories: Vec<_> = candidates
            .iter()
            .filter_map(|name| {
                self.factories
                    .iter()
                    .find(|f| f.name() == *name && f.is_available())
                    .cloned()
            })
            .collect();
        debug!(
            transports = ?factories.iter().map(|f| f.name().to_string()).collect::<Vec<_>>(),
            "connect attempt"
        );
        self.attempt = Some(Box::pin(establish(
            factories,
            self.target.clone(),
            self.options.connect_timeout,
            Arc::clone(&self.shared),
        )));
    }

    async fn handle_attempt(&mut self, result: Result<Established>) {
        let state = self.current();
        match result {
            Ok(established) => {
                let reconnected = state == ConnectionState::Reconnecting;
                self.on_established(established, reconnected).await;
            }
            Err(e) if state == ConnectionState::Connecting => {
                warn!(error = %e, "connect failed");
                self.set_state(ConnectionState::Disconnected);
                self.shared.publish("connect_failed", vec![]);
            }
            Err(e) => {
                debug!(error = %e, attempt = self.backoff.attempts(), "reconnect attempt failed");
                self.schedule_retry();
            }
        }
    }

    async fn on_established(&mut self, established: Established, reconnected: bool) {
        let Established {
            transport,
            handshake,
        } = established;
        let transport_name = transport.name().to_string();
        info!(
            session_id = %handshake.session_id,
            transport = %transport_name,
            id = %transport.id(),
            "connected"
        );

        *self.shared.session_id.lock() = Some(handshake.session_id.clone());
        self.session.apply_handshake(handshake);
        self.transport = Some(transport);
        self.heartbeat
            .reconfigure(self.session.heartbeat_timeout(self.options.heartbeat_timeout));
        self.heartbeat.start();
        self.set_state(ConnectionState::Connected);

        let open = self.session.open_endpoints().to_vec();
        if !open.is_empty() {
            self.announce(open).await;
        }
        if !self.options.manual_flush && !self.session.is_buffering() {
            self.flush().await;
        }
        // A write above may already have lost the transport.
        if !self.current().is_connected() {
            return;
        }

        if let Some(default) = self.shared.default_namespace() {
            default.set_connected(true);
            default.events.emit("connect", &Args::empty());
        }
        self.shared.events.emit("connect", &Args::empty());

        if reconnected {
            let attempts = self.backoff.attempts();
            self.backoff.reset();
            info!(attempts, "reconnected");
            self.shared.publish(
                "reconnect",
                vec![Value::from(transport_name), Value::from(attempts)],
            );
        }
    }

    /// Sends connect packets for `endpoints` in one frame and starts their
    /// confirmation deadlines.
    async fn announce(&mut self, endpoints: Vec<String>) {
        let query = self
            .target
            .query()
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        let deadline = Instant::now() + self.options.connect_timeout;
        let packets = endpoints
            .into_iter()
            .map(|endpoint| {
                self.confirm_deadlines.insert(endpoint.clone(), deadline);
                Packet::Connect {
                    endpoint,
                    query: query.clone(),
                }
            })
            .collect();
        self.write(packets).await;
    }

    fn expire_confirmations(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .confirm_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        for endpoint in expired {
            self.confirm_deadlines.remove(&endpoint);
            warn!(endpoint = %endpoint, "namespace not confirmed in time");
            if let Some(namespace) = self.shared.namespace(&endpoint) {
                namespace.events.emit("connect_failed", &Args::empty());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Losing the transport
    // -----------------------------------------------------------------------

    async fn release_transport(&mut self) {
        self.heartbeat.stop();
        self.confirm_deadlines.clear();
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, id = %transport.id(), "transport close failed");
            }
        }
        let namespaces: Vec<_> = self.shared.namespaces.lock().values().cloned().collect();
        for namespace in namespaces {
            namespace.set_connected(false);
        }
    }

    /// The established transport is gone. Reconnects if allowed.
    async fn on_transport_lost(&mut self, why: &str) {
        if !self.current().is_connected() {
            return;
        }
        warn!(reason = why, "transport lost");
        self.release_transport().await;

        if self.options.reconnect {
            self.set_state(ConnectionState::Reconnecting);
            self.shared.publish("disconnect", vec![Value::from(why)]);
            self.backoff.reset();
            self.schedule_retry();
        } else {
            self.set_state(ConnectionState::Disconnected);
            self.shared.publish("disconnect", vec![Value::from(why)]);
            self.reset_session();
        }
    }

    /// The server disconnected the default endpoint. Never reconnects.
    async fn on_booted(&mut self) {
        info!("disconnected by server");
        self.release_transport().await;
        self.set_state(ConnectionState::Disconnected);
        self.shared
            .publish("disconnect", vec![Value::from(reason::BOOTED)]);
        self.reset_session();
    }

    fn schedule_retry(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempts();
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                debug!(attempt, delay_ms, "reconnect scheduled");
                self.retry_at = Some(Instant::now() + delay);
                self.shared.publish(
                    "reconnecting",
                    vec![Value::from(delay_ms), Value::from(attempt)],
                );
            }
            None => {
                warn!(attempts = self.backoff.attempts(), "reconnect failed, giving up");
                self.backoff.reset();
                self.set_state(ConnectionState::Disconnected);
                self.shared.publish("reconnect_failed", vec![]);
                self.reset_session();
            }
        }
    }

    /// Drops everything tied to the server-side session and destroys every
    /// namespace but the default one.
    fn reset_session(&mut self) {
        self.session.reset();
        self.confirm_deadlines.clear();
        *self.shared.session_id.lock() = None;
        let destroyed: Vec<_> = {
            let mut namespaces = self.shared.namespaces.lock();
            let gone: Vec<String> = namespaces
                .keys()
                .filter(|k| !k.is_empty())
                .cloned()
                .collect();
            gone.into_iter()
                .filter_map(|k| namespaces.remove(&k))
                .collect()
        };
        for namespace in destroyed {
            namespace.set_connected(false);
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Sends `packet`, or buffers it while disconnected or in buffering
    /// mode.
    async fn send_packet(&mut self, packet: Packet) {
        if !self.current().is_connected() || self.session.is_buffering() {
            self.session.enqueue(packet);
            return;
        }
        let mut batch = self.session.drain_buffer();
        batch.push(packet);
        self.write(batch).await;
    }

    /// Sends every buffered packet as one frame, if connected.
    async fn flush(&mut self) {
        if !self.current().is_connected() || self.session.buffered_len() == 0 {
            return;
        }
        let batch = self.session.drain_buffer();
        trace!(packets = batch.len(), "flushing buffer");
        self.write(batch).await;
    }

    /// Encodes `packets` into one frame and hands it to the transport.
    /// On failure the data packets go back to the front of the buffer.
    async fn write(&mut self, packets: Vec<Packet>) {
        let encoded: Vec<String> = packets
            .iter()
            .filter_map(|p| match encode_packet(p) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, kind = %p.packet_type(), "dropping unencodable packet");
                    None
                }
            })
            .collect();
        if encoded.is_empty() {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            self.session.requeue_front(retained(packets));
            return;
        };
        let frame = encode_payload(&encoded);
        trace!(packets = encoded.len(), bytes = frame.len(), "frame out");
        let sent = transport.send(&frame).await;
        if let Err(e) = sent {
            warn!(error = %e, "send failed");
            self.session.requeue_front(retained(packets));
            self.on_transport_lost(reason::TRANSPORT_ERROR).await;
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn handle_frame(&mut self, frame: std::result::Result<Option<String>, TransportError>) {
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.on_transport_lost(reason::TRANSPORT_CLOSE).await;
                return;
            }
            Err(e) => {
                debug!(error = %e, "receive failed");
                self.on_transport_lost(reason::TRANSPORT_ERROR).await;
                return;
            }
        };
        self.heartbeat.record_traffic();
        trace!(bytes = frame.len(), "frame in");

        let pieces = match split_payload(&frame) {
            Ok(pieces) => pieces,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        // A bad packet is skipped on its own; its neighbours still count.
        for raw in pieces {
            if self.transport.is_none() {
                break;
            }
            match decode_packet(raw) {
                Ok(packet) => self.handle_packet(packet).await,
                Err(e) => warn!(error = %e, packet = raw, "dropping malformed packet"),
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connect { endpoint, .. } if endpoint.is_empty() => {
                trace!("default endpoint confirmed");
            }
            Packet::Connect { endpoint, .. } => {
                self.confirm_deadlines.remove(&endpoint);
                match self.shared.namespace(&endpoint) {
                    Some(namespace) => {
                        if !namespace.set_connected(true) {
                            debug!(endpoint = %endpoint, "namespace connected");
                            namespace.events.emit("connect", &Args::empty());
                        }
                    }
                    None => debug!(endpoint = %endpoint, "connect for unknown namespace"),
                }
            }
            Packet::Disconnect { endpoint } if endpoint.is_empty() => self.on_booted().await,
            Packet::Disconnect { endpoint } => self.detach(&endpoint, reason::BOOTED),
            Packet::Heartbeat { .. } => {
                trace!("heartbeat from server");
                self.write(vec![Packet::heartbeat("")]).await;
            }
            Packet::Message {
                endpoint,
                id,
                ack,
                data,
            } => {
                self.deliver(endpoint, "message", vec![Value::String(data)], id, ack)
                    .await;
            }
            Packet::Json {
                endpoint,
                id,
                ack,
                data,
            } => self.deliver(endpoint, "message", vec![data], id, ack).await,
            Packet::Event {
                endpoint,
                id,
                ack,
                name,
                args,
            } => {
                // Only `id+` asks for a reply on events.
                let ack = ack.filter(|mode| *mode == AckMode::Data);
                self.deliver(endpoint, &name, args, id, ack).await;
            }
            Packet::Ack { ack_id, args, .. } => {
                if self.session.resolve_ack(&ack_id, args) {
                    trace!(ack_id = %ack_id, "ack resolved");
                }
            }
            Packet::Error {
                endpoint,
                reason,
                advice,
            } => self.handle_error(endpoint, reason, advice).await,
            Packet::Noop { .. } => {}
        }
    }

    /// Routes an application packet to its namespace, acknowledging it as
    /// the server requested.
    async fn deliver(
        &mut self,
        endpoint: String,
        event: &str,
        values: Vec<Value>,
        id: Option<String>,
        ack: Option<AckMode>,
    ) {
        let Some(namespace) = self.shared.namespace(&endpoint) else {
            debug!(endpoint = %endpoint, event, "no namespace for packet, dropping");
            return;
        };
        let args = match (id, ack) {
            (Some(id), Some(AckMode::Data)) => {
                Args::with_reply(values, Reply::new(endpoint, id, self.replies_tx.clone()))
            }
            (Some(id), Some(AckMode::Auto)) => {
                self.send_packet(Packet::ack(endpoint, id, vec![])).await;
                Args::new(values)
            }
            _ => Args::new(values),
        };
        namespace.events.emit(event, &args);
    }

    async fn handle_error(&mut self, endpoint: String, reason: String, advice: String) {
        if !endpoint.is_empty() && reason == "unauthorized" {
            self.confirm_deadlines.remove(&endpoint);
            warn!(endpoint = %endpoint, "namespace unauthorized");
            if let Some(namespace) = self.shared.namespace(&endpoint) {
                namespace
                    .events
                    .emit("connect_failed", &Args::new(vec![Value::from(reason)]));
            }
            return;
        }

        warn!(endpoint = %endpoint, reason = %reason, advice = %advice, "error from server");
        if advice == "reconnect" && self.current().is_connected() {
            self.shared.publish("error", vec![Value::from(reason)]);
            self.on_transport_lost(reason::TRANSPORT_ERROR).await;
        } else if endpoint.is_empty() {
            self.shared.publish("error", vec![Value::from(reason)]);
        } else if let Some(namespace) = self.shared.namespace(&endpoint) {
            namespace
                .events
                .emit("error", &Args::new(vec![Value::from(reason)]));
        }
    }

    async fn handle_heartbeat(&mut self, event: HeartbeatEvent) {
        match event {
            HeartbeatEvent::Beat { beat } => {
                trace!(beat, "sending heartbeat");
                self.write(vec![Packet::heartbeat("")]).await;
            }
            HeartbeatEvent::TimedOut { silent_for } => {
                let silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX);
                warn!(silent_ms, "no traffic from server");
                self.on_transport_lost(reason::HEARTBEAT_TIMEOUT).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Packets worth resending after a failed write. Control packets are
/// rebuilt from session state on the next connect.
fn retained(packets: Vec<Packet>) -> Vec<Packet> {
    packets
        .into_iter()
        .filter(|p| {
            !matches!(
                p,
                Packet::Connect { .. } | Packet::Heartbeat { .. } | Packet::Disconnect { .. }
            )
        })
        .collect()
}

/// Resolves with the in-flight attempt's result; pends when there is none.
async fn next_attempt(attempt: &mut Option<Attempt>) -> Result<Established> {
    match attempt {
        Some(attempt) => attempt.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Resolves with the next frame; pends while no transport is open.
async fn next_frame(
    transport: &mut Option<Box<dyn Transport>>,
) -> std::result::Result<Option<String>, TransportError> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Tries each factory in order until one opens and delivers a handshake.
async fn establish(
    factories: Vec<Arc<dyn TransportFactory>>,
    target: Target,
    timeout: Duration,
    shared: Arc<Shared>,
) -> Result<Established> {
    let mut last_error = Error::Session(SessionError::NoTransports);
    for factory in factories {
        let mut transport = factory.create(&target);
        shared.publish("connecting", vec![Value::from(factory.name())]);
        debug!(transport = factory.name(), id = %transport.id(), "opening transport");

        match time::timeout(timeout, open_and_handshake(transport.as_mut())).await {
            Ok(Ok(handshake)) => {
                return Ok(Established {
                    transport,
                    handshake,
                });
            }
            Ok(Err(e)) => {
                warn!(transport = factory.name(), error = %e, "transport failed, trying next");
                last_error = e;
            }
            Err(_) => {
                warn!(transport = factory.name(), "handshake timed out, trying next");
                last_error = Error::HandshakeTimeout;
            }
        }
        if let Err(e) = transport.close().await {
            trace!(error = %e, "closing failed transport");
        }
    }
    Err(last_error)
}

/// Opens `transport`, announces the default endpoint and reads the
/// handshake record.
async fn open_and_handshake(transport: &mut dyn Transport) -> Result<Handshake> {
    transport.open().await?;
    transport.send(&encode_packet(&Packet::connect(""))?).await?;
    let record = transport
        .recv()
        .await?
        .ok_or_else(|| TransportError::ConnectionClosed("closed before handshake".into()))?;
    Ok(Handshake::parse(&record)?)
}

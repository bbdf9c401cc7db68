//! Per-connection session data that outlives individual transports.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use sockline_protocol::{Handshake, Packet};
use tracing::{debug, trace};

/// Completion callback for an acknowledged send. Receives the ack's args.
pub type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Everything the connection remembers across transport instances.
///
/// - the negotiated handshake (session id, timeouts, transports)
/// - the outbound buffer, flushed in FIFO order
/// - pending ack callbacks keyed by ack id
/// - namespaces announced to the server, re-announced after a reconnect
///
/// Owned by the connection actor; there is exactly one writer.
#[derive(Default)]
pub struct Session {
    handshake: Option<Handshake>,
    buffer: VecDeque<Packet>,
    buffering: bool,
    acks: FxHashMap<u64, AckCallback>,
    next_ack_id: u64,
    open: Vec<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handshake", &self.handshake)
            .field("buffered", &self.buffer.len())
            .field("buffering", &self.buffering)
            .field("pending_acks", &self.acks.len())
            .field("open", &self.open)
            .finish()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Handshake -------------------------------------------------------

    /// Stores a freshly negotiated handshake.
    pub fn apply_handshake(&mut self, handshake: Handshake) {
        debug!(session_id = %handshake.session_id, "session established");
        self.handshake = Some(handshake);
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// The negotiated session id, if a handshake has happened.
    pub fn session_id(&self) -> Option<&str> {
        self.handshake.as_ref().map(|h| h.session_id.as_str())
    }

    /// Transports the server advertised (empty before any handshake).
    pub fn advertised_transports(&self) -> &[String] {
        self.handshake
            .as_ref()
            .map(|h| h.transports.as_slice())
            .unwrap_or_default()
    }

    /// The heartbeat timeout to use: `override_timeout` if set, else the
    /// negotiated one.
    pub fn heartbeat_timeout(&self, override_timeout: Option<Duration>) -> Option<Duration> {
        override_timeout.or_else(|| self.handshake.as_ref().and_then(|h| h.heartbeat_timeout))
    }

    // -- Buffer ----------------------------------------------------------

    /// Explicit buffering mode requested by the application.
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn set_buffering(&mut self, buffering: bool) {
        self.buffering = buffering;
    }

    /// Appends a packet to the outbound buffer.
    pub fn enqueue(&mut self, packet: Packet) {
        trace!(
            kind = %packet.packet_type(),
            endpoint = packet.endpoint(),
            buffered = self.buffer.len() + 1,
            "packet buffered"
        );
        self.buffer.push_back(packet);
    }

    /// Takes every buffered packet in enqueue order.
    pub fn drain_buffer(&mut self) -> Vec<Packet> {
        self.buffer.drain(..).collect()
    }

    /// Puts packets back at the front of the buffer, keeping their order.
    /// Used when a flush could not reach the transport.
    pub fn requeue_front(&mut self, packets: Vec<Packet>) {
        for packet in packets.into_iter().rev() {
            self.buffer.push_front(packet);
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    // -- Acks ------------------------------------------------------------

    /// Stores `callback` and returns the id to embed in the outgoing
    /// packet. Ids are never reused within a session's lifetime.
    pub fn register_ack(&mut self, callback: AckCallback) -> u64 {
        self.next_ack_id += 1;
        let id = self.next_ack_id;
        self.acks.insert(id, callback);
        id
    }

    /// Invokes and removes the callback for `ack_id`.
    ///
    /// Returns `false` for ids that are unknown or not numeric. Those are
    /// ignored.
    pub fn resolve_ack(&mut self, ack_id: &str, args: Vec<Value>) -> bool {
        let Some(callback) = ack_id
            .parse::<u64>()
            .ok()
            .and_then(|id| self.acks.remove(&id))
        else {
            trace!(ack_id, "ack for unknown id ignored");
            return false;
        };
        callback(args);
        true
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    // -- Open namespaces -------------------------------------------------

    /// Records that `endpoint` was announced. Returns `false` if it already
    /// was. The default endpoint is implicit and never recorded.
    pub fn open_endpoint(&mut self, endpoint: &str) -> bool {
        if endpoint.is_empty() || self.open.iter().any(|e| e == endpoint) {
            return false;
        }
        self.open.push(endpoint.to_string());
        true
    }

    /// Forgets `endpoint`. Returns `false` if it was not open.
    pub fn close_endpoint(&mut self, endpoint: &str) -> bool {
        let before = self.open.len();
        self.open.retain(|e| e != endpoint);
        self.open.len() != before
    }

    /// Announced endpoints in announcement order.
    pub fn open_endpoints(&self) -> &[String] {
        &self.open
    }

    // -- Lifecycle -------------------------------------------------------

    /// Forgets everything tied to the server-side session. Called on a
    /// permanent disconnect; pending callbacks are dropped uncalled.
    pub fn reset(&mut self) {
        debug!(
            dropped_packets = self.buffer.len(),
            dropped_acks = self.acks.len(),
            "session reset"
        );
        self.handshake = None;
        self.buffer.clear();
        self.buffering = false;
        self.acks.clear();
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_ack(counter: &Arc<AtomicUsize>) -> AckCallback {
        let counter = Arc::clone(counter);
        Box::new(move |_args| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_register_ack_allocates_increasing_ids() {
        let mut session = Session::new();
        let a = session.register_ack(Box::new(|_| {}));
        let b = session.register_ack(Box::new(|_| {}));
        assert_eq!((a, b), (1, 2));
        assert_eq!(session.pending_acks(), 2);
    }

    #[test]
    fn test_resolve_ack_invokes_once_and_removes() {
        let mut session = Session::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = session.register_ack(counting_ack(&counter));

        assert!(session.resolve_ack(&id.to_string(), vec![]));
        assert!(!session.resolve_ack(&id.to_string(), vec![]));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(session.pending_acks(), 0);
    }

    #[test]
    fn test_resolve_ack_unknown_or_garbage_id_is_noop() {
        let mut session = Session::new();
        let counter = Arc::new(AtomicUsize::new(0));
        session.register_ack(counting_ack(&counter));

        assert!(!session.resolve_ack("99", vec![]));
        assert!(!session.resolve_ack("abc", vec![]));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(session.pending_acks(), 1);
    }

    #[test]
    fn test_buffer_is_fifo_and_requeue_keeps_order() {
        let mut session = Session::new();
        session.enqueue(Packet::message("", "a"));
        session.enqueue(Packet::message("", "b"));
        let drained = session.drain_buffer();
        assert_eq!(drained.len(), 2);
        assert_eq!(session.buffered_len(), 0);

        session.enqueue(Packet::message("", "c"));
        session.requeue_front(drained);
        let order: Vec<_> = session
            .drain_buffer()
            .into_iter()
            .map(|p| match p {
                Packet::Message { data, .. } => data,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_open_endpoint_is_idempotent_and_ordered() {
        let mut session = Session::new();
        assert!(session.open_endpoint("/chat"));
        assert!(session.open_endpoint("/news"));
        assert!(!session.open_endpoint("/chat"));
        assert!(!session.open_endpoint(""));
        assert_eq!(session.open_endpoints(), ["/chat", "/news"]);

        assert!(session.close_endpoint("/chat"));
        assert!(!session.close_endpoint("/chat"));
        assert_eq!(session.open_endpoints(), ["/news"]);
    }

    #[test]
    fn test_heartbeat_timeout_prefers_override() {
        let mut session = Session::new();
        assert_eq!(session.heartbeat_timeout(None), None);

        session.apply_handshake(Handshake::parse("sid:60:60:websocket").unwrap());
        assert_eq!(session.session_id(), Some("sid"));
        assert_eq!(
            session.heartbeat_timeout(None),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            session.heartbeat_timeout(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
        assert_eq!(session.advertised_transports(), ["websocket"]);
    }

    #[test]
    fn test_reset_drops_everything_without_calling_acks() {
        let mut session = Session::new();
        let counter = Arc::new(AtomicUsize::new(0));
        session.apply_handshake(Handshake::parse("sid:60:60:websocket").unwrap());
        session.register_ack(counting_ack(&counter));
        session.enqueue(Packet::heartbeat(""));
        session.open_endpoint("/chat");
        session.set_buffering(true);

        session.reset();

        assert!(session.session_id().is_none());
        assert_eq!(session.pending_acks(), 0);
        assert_eq!(session.buffered_len(), 0);
        assert!(session.open_endpoints().is_empty());
        assert!(!session.is_buffering());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Ids keep counting after a reset.
        assert_eq!(session.register_ack(Box::new(|_| {})), 2);
    }
}

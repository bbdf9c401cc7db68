//! Event dispatcher shared by connections and namespaces.
//!
//! [`EventEmitter`] maps event names to ordered handler lists. It is
//! internally synchronized, so handlers can be registered from any thread
//! while the connection task emits.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use sockline::EventEmitter;
//!
//! let events = EventEmitter::<u32>::new();
//! let total = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&total);
//! events.on("tick", move |n| {
//!     seen.fetch_add(*n as usize, Ordering::SeqCst);
//! });
//!
//! events.emit("tick", &2);
//! events.emit("tick", &3);
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use sockline_protocol::Packet;
use tokio::sync::mpsc;

/// A registered handler. Two listeners are the same listener when they
/// point at the same allocation ([`Arc::ptr_eq`]).
pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Entry<A> {
    handler: Listener<A>,
    once: bool,
}

/// Named events with ordered listeners.
pub struct EventEmitter<A> {
    listeners: Mutex<FxHashMap<String, Vec<Entry<A>>>>,
}

impl<A> Default for EventEmitter<A> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<A> fmt::Debug for EventEmitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let mut map = f.debug_map();
        for (event, entries) in listeners.iter() {
            map.entry(event, &entries.len());
        }
        map.finish()
    }
}

impl<A> EventEmitter<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event` and returns it as a [`Listener`]
    /// that can later be passed to [`remove_listener`](Self::remove_listener).
    ///
    /// Same as [`add_listener`](Self::add_listener), for closures.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Listener<A>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.add_listener(event, Arc::new(handler))
    }

    /// Appends `listener` to `event`'s list. The same listener may be
    /// added more than once; it then fires once per registration.
    pub fn add_listener(&self, event: impl Into<String>, listener: Listener<A>) -> Listener<A> {
        self.push(event.into(), Arc::clone(&listener), false);
        listener
    }

    /// Registers `handler` to fire on the next `event` only.
    ///
    /// The returned listener removes it before it fires.
    pub fn once<F>(&self, event: impl Into<String>, handler: F) -> Listener<A>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let listener: Listener<A> = Arc::new(handler);
        self.push(event.into(), Arc::clone(&listener), true);
        listener
    }

    fn push(&self, event: String, handler: Listener<A>, once: bool) {
        self.listeners
            .lock()
            .entry(event)
            .or_default()
            .push(Entry { handler, once });
    }

    /// Removes every registration of `listener` for `event`. Returns how
    /// many were removed.
    pub fn remove_listener(&self, event: &str, listener: &Listener<A>) -> usize {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|e| !Arc::ptr_eq(&e.handler, listener));
        let removed = before - entries.len();
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Removes all listeners of `event`, or of every event when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut listeners = self.listeners.lock();
        match event {
            Some(event) => {
                listeners.remove(event);
            }
            None => listeners.clear(),
        }
    }

    /// Listeners of `event` in registration order.
    pub fn listeners(&self, event: &str) -> Vec<Listener<A>> {
        self.listeners
            .lock()
            .get(event)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Calls every listener of `event` with `args`, in registration order.
    /// Returns `false` if there were none.
    ///
    /// Works on a snapshot taken before the first call: listeners added
    /// while emitting fire from the next emit on, and `once` listeners are
    /// gone before their handler runs.
    pub fn emit(&self, event: &str, args: &A) -> bool {
        let snapshot: Vec<Listener<A>> = {
            let mut listeners = self.listeners.lock();
            let Some(entries) = listeners.get_mut(event) else {
                return false;
            };
            let snapshot = entries.iter().map(|e| Arc::clone(&e.handler)).collect();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                listeners.remove(event);
            }
            snapshot
        };
        for handler in &snapshot {
            handler(args);
        }
        !snapshot.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Args / Reply
// ---------------------------------------------------------------------------

/// Arguments delivered to connection and namespace listeners.
///
/// Server messages carry one value (the text or JSON body), events carry
/// their argument list, and lifecycle events carry details such as the
/// disconnect reason. When the server asked for an acknowledgement,
/// [`reply`](Self::reply) is set.
#[derive(Debug, Default)]
pub struct Args {
    values: Vec<Value>,
    reply: Option<Reply>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            reply: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn with_reply(values: Vec<Value>, reply: Reply) -> Self {
        Self {
            values,
            reply: Some(reply),
        }
    }

    /// All positional values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// The value at `index` as a string slice, if it is a JSON string.
    pub fn str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The acknowledgement the server is waiting for, if any.
    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// One-shot acknowledgement of a server packet that carried `id+`.
///
/// Every listener of the event sees the same `Reply`; only the first
/// [`send`](Self::send) goes out.
pub struct Reply {
    endpoint: String,
    id: String,
    sink: mpsc::UnboundedSender<Packet>,
    sent: AtomicBool,
}

impl Reply {
    pub(crate) fn new(
        endpoint: impl Into<String>,
        id: impl Into<String>,
        sink: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            id: id.into(),
            sink,
            sent: AtomicBool::new(false),
        }
    }

    /// The server's message id being acknowledged.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends `6:<endpoint>:<id>+<args>`. Returns `false` if a reply was
    /// already sent or the connection is gone.
    pub fn send(&self, args: Vec<Value>) -> bool {
        if self.sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sink
            .send(Packet::ack(self.endpoint.clone(), self.id.clone(), args))
            .is_ok()
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("endpoint", &self.endpoint)
            .field("id", &self.id)
            .field("sent", &self.is_sent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_accessors() {
        let args = Args::new(vec![json!("a"), json!(2)]);
        assert_eq!(args.len(), 2);
        assert_eq!(args.str(0), Some("a"));
        assert_eq!(args.str(1), None);
        assert_eq!(args.get(1), Some(&json!(2)));
        assert!(args.reply().is_none());
        assert!(Args::empty().is_empty());
    }

    #[test]
    fn test_reply_sends_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply = Reply::new("/chat", "7", tx);

        assert!(reply.send(vec![json!("ok")]));
        assert!(!reply.send(vec![json!("again")]));
        assert!(reply.is_sent());

        assert_eq!(
            rx.try_recv().unwrap(),
            Packet::ack("/chat", "7", vec![json!("ok")])
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reply_after_connection_gone_returns_false() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let reply = Reply::new("", "1", tx);
        assert!(!reply.send(vec![]));
    }

    #[test]
    fn test_emitter_debug_lists_counts() {
        let events = EventEmitter::<()>::new();
        events.on("a", |_| {});
        events.on("a", |_| {});
        assert_eq!(format!("{events:?}"), r#"{"a": 2}"#);
    }
}

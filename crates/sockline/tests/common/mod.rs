//! Scripted server side for driving a `Connection` over the memory
//! transport.

#![allow(dead_code)]

use std::time::Duration;

use serde_json::Value;
use sockline::prelude::*;
use sockline::protocol::{Packet, decode_payload};
use sockline::transport::memory::{self, MemoryFactory, MemoryListener, MemoryPeer};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const URL: &str = "http://localhost:3000/?token=abc";

/// Handshake record used by most tests: heartbeats effectively off for the
/// duration of a test.
pub const HANDSHAKE: &str = "sid123:60:60:memory";

const WAIT: Duration = Duration::from_secs(2);

/// A builder for [`URL`] wired to a fresh memory transport.
pub fn builder() -> (ConnectionBuilder, MemoryListener) {
    let (factory, listener) = memory::channel("memory");
    (with_factory(factory), listener)
}

pub fn with_factory(factory: MemoryFactory) -> ConnectionBuilder {
    Connection::builder(URL)
        .transport(factory)
        .transports(["memory"])
}

/// Waits for the client to open a transport.
pub async fn accept(listener: &mut MemoryListener) -> MemoryPeer {
    timeout(WAIT, listener.accept())
        .await
        .expect("no transport opened in time")
        .expect("listener closed")
}

/// Accepts a transport, checks the client's opening packet and answers
/// with `record`.
pub async fn handshake(listener: &mut MemoryListener, record: &str) -> MemoryPeer {
    let mut peer = accept(listener).await;
    assert_eq!(recv_frame(&mut peer).await, "1::");
    peer.send(record).unwrap();
    peer
}

/// Builds, accepts and handshakes a connection, then waits for
/// `Connected`.
pub async fn connected(builder: ConnectionBuilder, listener: &mut MemoryListener) -> (Connection, MemoryPeer) {
    let connection = builder.build().unwrap();
    let peer = handshake(listener, HANDSHAKE).await;
    connected_state(&connection).await;
    (connection, peer)
}

pub async fn connected_state(connection: &Connection) {
    timeout(WAIT, connection.wait_for(ConnectionState::Connected))
        .await
        .expect("not connected in time")
        .unwrap();
}

pub async fn state(connection: &Connection, state: ConnectionState) {
    timeout(WAIT, connection.wait_for(state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state}"))
        .unwrap();
}

/// The next raw frame the client sent.
pub async fn recv_frame(peer: &mut MemoryPeer) -> String {
    timeout(WAIT, peer.recv())
        .await
        .expect("no frame in time")
        .expect("client closed the transport")
}

/// The packets of the next frame the client sent.
pub async fn recv_packets(peer: &mut MemoryPeer) -> Vec<Packet> {
    decode_payload(&recv_frame(peer).await).unwrap()
}

/// Forwards the values of every `event` on `events` into a channel.
pub fn record(events: &EventEmitter<Args>, event: &str) -> mpsc::UnboundedReceiver<Vec<Value>> {
    let (tx, rx) = mpsc::unbounded_channel();
    events.on(event, move |args: &Args| {
        let _ = tx.send(args.values().to_vec());
    });
    rx
}

/// The next recorded emission.
pub async fn next(rx: &mut mpsc::UnboundedReceiver<Vec<Value>>) -> Vec<Value> {
    timeout(WAIT, rx.recv())
        .await
        .expect("event not emitted in time")
        .expect("recorder dropped")
}

/// Everything recorded so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut out = Vec::new();
    while let Ok(values) = rx.try_recv() {
        out.push(values);
    }
    out
}

/// Round-trips a server heartbeat. Once the answer arrives, every frame
/// sent before it has been processed by the client.
pub async fn sync(peer: &mut MemoryPeer) {
    peer.send("2::").unwrap();
    assert_eq!(recv_frame(peer).await, "2::");
}

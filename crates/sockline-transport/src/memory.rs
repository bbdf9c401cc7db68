//! In-process transport backed by `tokio` channels.
//!
//! [`channel`] returns a factory the connection uses and a
//! [`MemoryListener`] that plays the server: every transport the factory
//! opens shows up as a [`MemoryPeer`] from [`MemoryListener::accept`].
//! Dropping the listener makes further opens fail, and dropping a peer
//! closes that transport, which is how tests simulate refused and dropped
//! connections.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Target, Transport, TransportError, TransportFactory, TransportId};

/// Creates a memory transport factory named `name` and its listener.
pub fn channel(name: impl Into<String>) -> (MemoryFactory, MemoryListener) {
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    (
        MemoryFactory {
            name: name.into(),
            incoming: incoming_tx,
        },
        MemoryListener {
            incoming: incoming_rx,
        },
    )
}

/// Builds [`MemoryTransport`]s connected to one [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    name: String,
    incoming: mpsc::UnboundedSender<MemoryPeer>,
}

impl TransportFactory for MemoryFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, target: &Target) -> Box<dyn Transport> {
        Box::new(MemoryTransport {
            id: TransportId::next(),
            name: self.name.clone(),
            url: target.transport_url(&self.name, false),
            incoming: self.incoming.clone(),
            outbound: None,
            inbound: None,
        })
    }
}

/// Server side of a memory transport: yields one peer per opened
/// transport.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Waits for the next transport to open. Returns `None` once every
    /// factory and every transport it built has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// Returns an already-opened peer without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.try_recv().ok()
    }
}

/// Server side of one opened memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// The URL the client opened.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends a frame to the client.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionClosed`] if the client side was
    /// dropped or closed.
    pub fn send(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(frame.into())
            .map_err(|_| TransportError::ConnectionClosed("client gone".into()))
    }

    /// Receives the next frame from the client, or `None` once the client
    /// closed the transport.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Returns a frame that has already arrived, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}

/// Client side of a memory transport.
#[derive(Debug)]
pub struct MemoryTransport {
    id: TransportId,
    name: String,
    url: String,
    incoming: mpsc::UnboundedSender<MemoryPeer>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: Option<mpsc::UnboundedReceiver<String>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> TransportId {
        self.id
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: self.url.clone(),
            to_client,
            from_client,
        };
        self.incoming.send(peer).map_err(|_| {
            TransportError::OpenFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("no listener for {}", self.name),
            ))
        })?;
        tracing::trace!(id = %self.id, name = %self.name, "memory transport opened");
        self.outbound = Some(to_server);
        self.inbound = Some(from_server);
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotOpen)?;
        outbound.send(frame.to_string()).map_err(|_| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "server side dropped",
            ))
        })
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        let inbound = self.inbound.as_mut().ok_or(TransportError::NotOpen)?;
        Ok(inbound.recv().await)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.inbound = None;
        Ok(())
    }
}

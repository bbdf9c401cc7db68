//! WebSocket client transport using `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Target, Transport, TransportError, TransportFactory, TransportId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds [`WebSocketTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketFactory;

impl WebSocketFactory {
    /// The transport name advertised by servers.
    pub const NAME: &'static str = "websocket";
}

impl TransportFactory for WebSocketFactory {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn create(&self, target: &Target) -> Box<dyn Transport> {
        Box::new(WebSocketTransport::new(
            target.transport_url(Self::NAME, true),
        ))
    }
}

/// A single WebSocket connection to the server. One text message carries
/// one frame.
pub struct WebSocketTransport {
    id: TransportId,
    url: String,
    ws: Option<WsStream>,
}

impl WebSocketTransport {
    /// Creates an unopened transport for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: TransportId::next(),
            url: url.into(),
            ws: None,
        }
    }

    /// The URL this transport opens.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn stream(&mut self) -> Result<&mut WsStream, TransportError> {
        self.ws.as_mut().ok_or(TransportError::NotOpen)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &str {
        WebSocketFactory::NAME
    }

    fn id(&self) -> TransportId {
        self.id
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| {
                TransportError::OpenFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        tracing::debug!(id = %self.id, url = %self.url, "WebSocket opened");
        self.ws = Some(ws);
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let msg = Message::Text(frame.to_string().into());
        self.stream()?.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        let ws = self.stream()?;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_str().to_string()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec()).map(Some).map_err(
                        |e| {
                            TransportError::ReceiveFailed(std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                e,
                            ))
                        },
                    );
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut ws) = self.ws.take() else {
            return Ok(());
        };
        tracing::debug!(id = %self.id, "closing WebSocket");
        ws.close(None).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

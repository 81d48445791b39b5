//! Socket transport behind the connection manager.
//!
//! [`Connector`] opens sockets; [`Socket`] is one open WebSocket. The
//! production implementation uses `tokio-tungstenite`; tests substitute
//! doubles that count opens and closes.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid WebSocket request: {0}")]
    Request(String),
    #[error("WebSocket connect failed: {0}")]
    Connect(String),
    #[error("WebSocket error: {0}")]
    Socket(String),
}

/// One open WebSocket carrying text frames.
#[async_trait]
pub trait Socket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text frame, or `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the connection loop polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &str,
        protocols: &[String],
    ) -> Result<Box<dyn Socket>, TransportError>;
}

/// Native connector using tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
        protocols: &[String],
    ) -> Result<Box<dyn Socket>, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !protocols.is_empty() {
            let value = HeaderValue::from_str(&protocols.join(", "))
                .map_err(|e| TransportError::Request(e.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(data)) => {
                    // Pong is handled automatically by tungstenite
                    crate::log_debug!("Received ping: {:?}", data);
                }
                Ok(_) => {
                    // Ignore binary, pong, etc.
                }
                Err(e) => return Some(Err(TransportError::Socket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            crate::log_debug!("WebSocket close failed: {}", e);
        }
    }
}

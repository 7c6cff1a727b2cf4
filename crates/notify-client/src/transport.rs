use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Failure to reach or keep talking to the notification source.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{0}")]
    Other(String),
}

/// One inbound notification. The payload is carried along untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub payload: Vec<u8>,
}

/// Opens subscriptions to the notification source.
///
/// [`WsConnector`] is the production implementation; tests substitute a
/// scripted one.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Subscription>, TransportError>;
}

/// A live subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next notification.
    ///
    /// Returns `Ok(None)` when the remote side closes the connection.
    async fn next(&mut self) -> Result<Option<Notification>, TransportError>;
}

/// Connects to the notification source over WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(endpoint).await?;
        Ok(Box::new(WsSubscription { ws }))
    }
}

struct WsSubscription {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Subscription for WsSubscription {
    async fn next(&mut self) -> Result<Option<Notification>, TransportError> {
        while let Some(msg) = self.ws.next().await {
            match msg? {
                Message::Text(text) => {
                    return Ok(Some(Notification {
                        payload: text.as_bytes().to_vec(),
                    }))
                }
                Message::Binary(data) => {
                    return Ok(Some(Notification {
                        payload: data.to_vec(),
                    }))
                }
                Message::Close(_) => return Ok(None),
                // Ping/Pong are control traffic, not notifications.
                _ => {}
            }
        }
        Ok(None)
    }
}

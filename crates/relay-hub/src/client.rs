use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{ClientEvent, RegistrationStatus, ServerEvent};

/// How long [`RelayClient::send_command`] waits for a reply by default.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("failed to encode or decode event: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("relay closed the connection")]
    Closed,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("registration refused: {0}")]
    Registration(String),
}

/// A participant session on the relay.
///
/// Control surfaces use it to register and answer commands; one-shot callers
/// use [`send_command`](Self::send_command) to issue a command and wait for
/// the reply routed back to them.
pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    /// Open a session to the relay at `url` (for example `ws://127.0.0.1:3001`).
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(url, "connected to relay");
        Ok(Self { ws })
    }

    /// Join the channel for `application` and wait for the acknowledgement.
    pub async fn register(&mut self, application: &str) -> Result<String, ClientError> {
        self.emit(&ClientEvent::Register {
            application: application.to_string(),
        })
        .await?;

        loop {
            if let ServerEvent::RegistrationResponse { status, message } = self.next_event().await? {
                return match status {
                    RegistrationStatus::Success => Ok(message),
                    RegistrationStatus::Error => Err(ClientError::Registration(message)),
                };
            }
        }
    }

    /// Broadcast `command` to `application` without waiting for anything.
    pub async fn emit_command(
        &mut self,
        application: &str,
        command: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.emit(&ClientEvent::CommandPacket {
            application: application.to_string(),
            command,
        })
        .await
    }

    /// Broadcast `command` and wait up to `timeout` for the first
    /// `packet_response` addressed to this session.
    ///
    /// The relay never reports an unroutable command, so a command nobody
    /// is registered for ends in [`ClientError::Timeout`].
    pub async fn send_command(
        &mut self,
        application: &str,
        command: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClientError> {
        self.emit_command(application, command).await?;

        let wait = async {
            loop {
                if let ServerEvent::PacketResponse(packet) = self.next_event().await? {
                    return Ok::<_, ClientError>(packet);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Return a response packet to the session named in `packet.senderId`.
    pub async fn respond(&mut self, packet: serde_json::Value) -> Result<(), ClientError> {
        self.emit(&ClientEvent::CommandPacketResponse { packet }).await
    }

    /// Wait for the next event from the relay.
    pub async fn next_event(&mut self) -> Result<ServerEvent, ClientError> {
        while let Some(msg) = self.ws.next().await {
            match msg? {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => return Ok(event),
                    Err(err) => tracing::warn!(%err, "unrecognised relay frame"),
                },
                Message::Close(_) => return Err(ClientError::Closed),
                _ => {}
            }
        }
        Err(ClientError::Closed)
    }

    /// Close the session.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    async fn emit(&mut self, event: &ClientEvent) -> Result<(), ClientError> {
        let json = serde_json::to_string(event)?;
        self.ws.send(Message::Text(json.into())).await?;
        Ok(())
    }
}

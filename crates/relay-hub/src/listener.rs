use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::hub::{self, HubHandle};
use crate::protocol::{ClientEvent, ConnectionId, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::routes::{self, RelayState};

/// Port the relay listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 3001;

/// How long a closing session may spend flushing queued events.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// How long plain HTTP connections get to finish after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: SocketAddr,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
        }
    }
}

/// The WebSocket relay.
///
/// Accepts loopback-origin WebSocket sessions, feeds every event they send
/// into the hub task that owns the [`ConnectionRegistry`], and writes routed
/// events back out. Plain HTTP requests on the same port get CORS-aware
/// answers from [`crate::routes`].
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
}

impl RelayServer {
    /// Bind the listening socket with a fresh, empty registry.
    ///
    /// Failing to bind (for example because the port is taken) is the one
    /// error the relay treats as fatal.
    pub async fn bind(config: RelayConfig) -> anyhow::Result<Self> {
        Self::bind_with_registry(config, ConnectionRegistry::new()).await
    }

    /// Bind the listening socket around a caller-supplied registry.
    pub async fn bind_with_registry(
        config: RelayConfig,
        registry: ConnectionRegistry,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("failed to bind relay on {}", config.listen_addr))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            registry,
        })
    }

    /// The address actually bound (useful when port 0 was requested).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve the relay until `shutdown` is cancelled, then wait for every
    /// open session to detach and return the registry.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<ConnectionRegistry> {
        let (hub, hub_task) = hub::spawn(self.registry);
        let sessions = TaskTracker::new();

        let app = routes::router(RelayState {
            hub: hub.clone(),
            shutdown: shutdown.clone(),
            sessions: sessions.clone(),
        });

        tracing::info!(addr = %self.local_addr, "relay listening");

        let signal = shutdown.clone();
        let serve = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .into_future();

        tokio::select! {
            result = serve => result.context("relay server failed")?,
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                tracing::warn!("plain connections still open after grace period; abandoning them");
            }
        }

        tracing::info!(open = sessions.len(), "relay shutting down");
        sessions.close();
        sessions.wait().await;

        hub.stop().await;
        drop(hub);
        let registry = hub_task.await.context("hub task panicked")?;
        Ok(registry)
    }
}

/// Run one upgraded WebSocket session from attach through teardown.
pub(crate) async fn serve_session(
    socket: WebSocket,
    remote_addr: SocketAddr,
    origin: Option<String>,
    hub: HubHandle,
    shutdown: CancellationToken,
) {
    let connection_id = ConnectionId::generate();

    tracing::info!(
        %connection_id,
        %remote_addr,
        origin = origin.as_deref().unwrap_or("<none>"),
        "client connected"
    );

    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    hub.attach(connection_id.clone(), outbox_tx).await;

    let (ws_write, ws_read) = socket.split();
    let mut writer = tokio::spawn(write_events(ws_write, outbox_rx, connection_id.clone()));

    let writer_finished = tokio::select! {
        _ = read_events(ws_read, &hub, &connection_id) => false,
        _ = &mut writer => true,
        _ = shutdown.cancelled() => false,
    };

    // The only cleanup path for registry membership.
    hub.detach(connection_id.clone()).await;

    if !writer_finished && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(%connection_id, %remote_addr, "client disconnected");
}

/// Read frames from a session and forward the events to the hub in order.
async fn read_events<R>(mut reader: R, hub: &HubHandle, connection_id: &ConnectionId)
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg_result) = reader.next().await {
        let msg = match msg_result {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(%connection_id, %err, "read error, closing session");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => hub.inbound(connection_id.clone(), event).await,
                Err(err) => {
                    tracing::warn!(%connection_id, %err, "unrecognised frame ignored");
                }
            },
            Message::Close(_) => break,
            Message::Binary(data) => {
                tracing::debug!(%connection_id, len = data.len(), "binary frame ignored");
            }
            // Ping/Pong are answered by the websocket layer.
            _ => {}
        }
    }
}

/// Drain a session's outbox into its socket. Ends when the hub drops the
/// outbox or the socket stops accepting writes.
async fn write_events<W>(
    mut writer: W,
    mut outbox: mpsc::UnboundedReceiver<ServerEvent>,
    connection_id: ConnectionId,
) where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    while let Some(event) = outbox.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(%connection_id, %err, "failed to serialize event");
                continue;
            }
        };
        if writer.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }
    let _ = writer.send(Message::Close(None)).await;
}

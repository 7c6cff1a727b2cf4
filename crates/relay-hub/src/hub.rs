//! Single-writer event loop that owns the [`ConnectionRegistry`].
//!
//! Every session task forwards what it reads to the hub over one FIFO
//! channel, so events from the same session are handled in the order they
//! were received and no two handlers ever touch the registry at once.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::RouteError;
use crate::protocol::{
    response_target, ClientEvent, CommandPacket, ConnectionId, RegistrationStatus, ServerEvent,
};
use crate::registry::{ConnectionRegistry, Outbox};

/// Channel buffer size between session tasks and the hub.
const HUB_BUFFER: usize = 1024;

/// Messages accepted by the hub task.
enum HubCommand {
    Attach { id: ConnectionId, outbox: Outbox },
    Inbound { id: ConnectionId, event: ClientEvent },
    Detach { id: ConnectionId },
    Stats { reply: oneshot::Sender<HubStats> },
    Stop,
}

/// Snapshot of the routing table, served on the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub channels: usize,
}

/// Cloneable handle used by session tasks to talk to the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn attach(&self, id: ConnectionId, outbox: Outbox) {
        self.send(HubCommand::Attach { id, outbox }).await;
    }

    pub async fn inbound(&self, id: ConnectionId, event: ClientEvent) {
        self.send(HubCommand::Inbound { id, event }).await;
    }

    pub async fn detach(&self, id: ConnectionId) {
        self.send(HubCommand::Detach { id }).await;
    }

    /// Ask the hub for a snapshot. Returns `None` if the hub has stopped.
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await;
        rx.await.ok()
    }

    /// Ask the hub to exit once everything queued ahead of this call has
    /// been applied, even if other handles are still alive.
    pub async fn stop(&self) {
        self.send(HubCommand::Stop).await;
    }

    async fn send(&self, cmd: HubCommand) {
        if self.tx.send(cmd).await.is_err() {
            tracing::warn!("hub task has stopped; command dropped");
        }
    }
}

/// Spawn the hub task around `registry`.
///
/// The task exits once every [`HubHandle`] clone has been dropped or
/// [`HubHandle::stop`] is called, and hands the registry back through the
/// join handle.
pub fn spawn(registry: ConnectionRegistry) -> (HubHandle, JoinHandle<ConnectionRegistry>) {
    let (tx, rx) = mpsc::channel(HUB_BUFFER);
    let handle = tokio::spawn(run(registry, rx));
    (HubHandle { tx }, handle)
}

async fn run(
    mut registry: ConnectionRegistry,
    mut rx: mpsc::Receiver<HubCommand>,
) -> ConnectionRegistry {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Attach { id, outbox } => registry.attach(id, outbox),
            HubCommand::Inbound { id, event } => handle_event(&mut registry, &id, event),
            HubCommand::Detach { id } => {
                registry.unregister_all(&id);
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(HubStats {
                    connections: registry.connection_count(),
                    channels: registry.channel_count(),
                });
            }
            HubCommand::Stop => break,
        }
    }
    tracing::debug!("hub task shutting down");
    registry
}

/// Apply one inbound event from session `id`.
pub(crate) fn handle_event(registry: &mut ConnectionRegistry, id: &ConnectionId, event: ClientEvent) {
    match event {
        ClientEvent::Register { application } => {
            let reply = if application.is_empty() {
                tracing::warn!(connection_id = %id, err = %RouteError::EmptyApplication, "registration refused");
                ServerEvent::registration(
                    RegistrationStatus::Error,
                    RouteError::EmptyApplication.to_string(),
                )
            } else {
                registry.register(id, &application);
                tracing::info!(connection_id = %id, %application, "application registered");
                ServerEvent::registration(
                    RegistrationStatus::Success,
                    format!("Registered for {application}"),
                )
            };
            registry.direct(id, reply);
        }

        ClientEvent::CommandPacket {
            application,
            command,
        } => {
            if application.is_empty() {
                tracing::warn!(connection_id = %id, err = %RouteError::EmptyApplication, "command dropped");
                return;
            }
            let packet = CommandPacket {
                sender_id: id.clone(),
                application,
                command,
            };
            tracing::debug!(connection_id = %id, application = %packet.application, "command received");
            let application = packet.application.clone();
            registry.fanout(&application, &ServerEvent::CommandPacket(packet));
        }

        ClientEvent::CommandPacketResponse { packet } => match response_target(&packet) {
            Some(target) => {
                tracing::debug!(connection_id = %id, target = %target, "routing response");
                registry.direct(&target, ServerEvent::PacketResponse(packet));
            }
            None => {
                tracing::warn!(connection_id = %id, err = %RouteError::MissingSenderId, "response dropped");
            }
        },
    }
}

use std::collections::{BTreeSet, HashMap};

use tokio::sync::mpsc;

use crate::error::RouteError;
use crate::protocol::{ConnectionId, ServerEvent};

/// Outbound queue of a single session. The session's writer task drains it
/// into the socket.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// In-memory routing table: which sessions are live, and which of them are
/// registered for each application name.
///
/// The registry is a plain owned value with no interior locking. The relay
/// gives it to exactly one task (see [`crate::hub`]), so mutation and lookup
/// never overlap.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// Live sessions and their outbound queues.
    peers: HashMap<ConnectionId, Outbox>,
    /// Application name -> registered sessions. An entry never has an empty
    /// member set.
    channels: HashMap<String, BTreeSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live session so it can be targeted by [`direct`](Self::direct)
    /// and joined to channels.
    pub fn attach(&mut self, id: ConnectionId, outbox: Outbox) {
        self.peers.insert(id, outbox);
    }

    /// Add `id` to the channel for `application`, creating the channel on
    /// first use. Registering twice is a no-op.
    pub fn register(&mut self, id: &ConnectionId, application: &str) {
        let inserted = self
            .channels
            .entry(application.to_string())
            .or_default()
            .insert(id.clone());

        tracing::debug!(
            connection_id = %id,
            application,
            new = inserted,
            "connection registered"
        );
    }

    /// Remove `id` from every channel and forget its outbox. Channels left
    /// without members are deleted.
    ///
    /// Returns the application names the session was registered under.
    pub fn unregister_all(&mut self, id: &ConnectionId) -> Vec<String> {
        self.peers.remove(id);

        let mut left = Vec::new();
        self.channels.retain(|application, members| {
            if members.remove(id) {
                left.push(application.clone());
            }
            !members.is_empty()
        });

        if !left.is_empty() {
            tracing::debug!(connection_id = %id, applications = ?left, "connection unregistered");
        }
        left
    }

    /// Deliver `event` to every session registered for `application`.
    ///
    /// Returns `false` (and logs) when nobody is registered.
    pub fn fanout(&self, application: &str, event: &ServerEvent) -> bool {
        let Some(members) = self.channels.get(application) else {
            let err = RouteError::UnroutablePacket {
                application: application.to_string(),
            };
            tracing::info!(%err, "no recipients; packet dropped");
            return false;
        };

        for id in members {
            self.deliver(id, event.clone());
        }

        tracing::debug!(application, recipients = members.len(), "packet fanned out");
        true
    }

    /// Deliver `event` to one session only. Returns `false` (and logs) if the
    /// session is not connected.
    pub fn direct(&self, id: &ConnectionId, event: ServerEvent) -> bool {
        if !self.peers.contains_key(id) {
            let err = RouteError::UnknownConnection { id: id.clone() };
            tracing::info!(%err, "direct delivery dropped");
            return false;
        }
        self.deliver(id, event)
    }

    fn deliver(&self, id: &ConnectionId, event: ServerEvent) -> bool {
        match self.peers.get(id) {
            Some(outbox) => {
                if outbox.send(event).is_err() {
                    // The writer has already gone; teardown will follow.
                    tracing::debug!(connection_id = %id, "outbox closed; event dropped");
                    return false;
                }
                true
            }
            None => {
                tracing::debug!(connection_id = %id, "registered connection has no outbox");
                false
            }
        }
    }

    /// Sessions currently registered for `application`.
    pub fn members(&self, application: &str) -> Vec<ConnectionId> {
        self.channels
            .get(application)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Applications `id` is currently registered for, sorted.
    pub fn channels_of(&self, id: &ConnectionId) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, members)| members.contains(id))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }
}

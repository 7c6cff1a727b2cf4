use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{Connector, WsConnector};

/// Default address of the external notification source.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8765";

/// Default pause between a failed or closed connection and the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

const BURST_CAPACITY: usize = 256;

/// Configuration for the reconnecting notification client.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// WebSocket URL of the notification source.
    pub endpoint: String,
    /// Fixed delay before every reconnect attempt.
    pub retry_delay: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Where the client currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Cancelled; no further attempts will be made.
    Stopped,
}

/// Local event raised once per inbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst {
    /// 1-based count of notifications seen over the client's lifetime.
    pub seq: u64,
    /// Size of the notification payload in bytes.
    pub len: usize,
}

/// Counters returned when the client stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub attempts: u64,
    pub connections: u64,
    pub bursts: u64,
}

/// Keeps a subscription to the notification source alive.
///
/// Connects to [`NotifierConfig::endpoint`], raises a [`Burst`] for every
/// text or binary frame, and after any disconnect (error or orderly close)
/// waits [`NotifierConfig::retry_delay`] and tries again. Runs until its
/// cancellation token fires. Cancellation is observed while connecting,
/// while connected, and during the retry delay.
pub struct ReconnectingClient<C = WsConnector> {
    config: NotifierConfig,
    connector: C,
    bursts: broadcast::Sender<Burst>,
    state: watch::Sender<ConnectionState>,
}

impl ReconnectingClient<WsConnector> {
    pub fn new(config: NotifierConfig) -> Self {
        Self::with_connector(config, WsConnector)
    }
}

impl<C: Connector> ReconnectingClient<C> {
    /// Create a client that opens subscriptions through `connector`.
    ///
    /// Nothing is contacted until [`run`](Self::run) or
    /// [`spawn`](Self::spawn) is called.
    pub fn with_connector(config: NotifierConfig, connector: C) -> Self {
        let (bursts, _) = broadcast::channel(BURST_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            connector,
            bursts,
            state,
        }
    }

    /// Receive a [`Burst`] for every notification from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Burst> {
        self.bursts.subscribe()
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run the client on a background task.
    pub fn spawn(self, shutdown: CancellationToken) -> NotifierHandle {
        let bursts = self.bursts.clone();
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run(shutdown.clone()));
        NotifierHandle {
            shutdown,
            bursts,
            state,
            task,
        }
    }

    /// Connection loop. Returns once `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> NotifierStats {
        let endpoint = self.config.endpoint.as_str();
        let mut stats = NotifierStats::default();

        'reconnect: loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.state.send_replace(ConnectionState::Connecting);
            stats.attempts += 1;
            debug!(endpoint, attempt = stats.attempts, "connecting to notification source");

            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'reconnect,
                result = self.connector.connect(endpoint) => result,
            };

            match connected {
                Ok(mut subscription) => {
                    stats.connections += 1;
                    self.state.send_replace(ConnectionState::Connected);
                    info!(endpoint, "subscribed to notification source");

                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break 'reconnect,
                            next = subscription.next() => next,
                        };

                        match next {
                            Ok(Some(notification)) => {
                                stats.bursts += 1;
                                let burst = Burst {
                                    seq: stats.bursts,
                                    len: notification.payload.len(),
                                };
                                debug!(seq = burst.seq, len = burst.len, "notification received");
                                // No subscribers is fine.
                                let _ = self.bursts.send(burst);
                            }
                            Ok(None) => {
                                info!(endpoint, "notification source closed the connection");
                                break;
                            }
                            Err(err) => {
                                warn!(endpoint, %err, "notification connection failed");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(endpoint, %err, "could not reach notification source");
                }
            }

            self.state.send_replace(ConnectionState::Disconnected);
            info!(
                delay_ms = self.config.retry_delay.as_millis() as u64,
                "reconnecting to notification source after delay"
            );

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'reconnect,
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Stopped);
        info!(
            attempts = stats.attempts,
            connections = stats.connections,
            bursts = stats.bursts,
            "notification client stopped"
        );
        stats
    }
}

/// Handle to a client running on a background task.
pub struct NotifierHandle {
    shutdown: CancellationToken,
    bursts: broadcast::Sender<Burst>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<NotifierStats>,
}

impl NotifierHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Burst> {
        self.bursts.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Cancel the client and wait for it to stop.
    ///
    /// Returns default stats if the task panicked.
    pub async fn shutdown(self) -> NotifierStats {
        self.shutdown.cancel();
        match self.task.await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(%err, "notification task did not finish cleanly");
                NotifierStats::default()
            }
        }
    }
}

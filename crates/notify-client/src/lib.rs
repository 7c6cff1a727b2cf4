//! Self-healing subscriber for an external notification source.
//!
//! The bridge listens to a local WebSocket service that pushes short
//! notifications. Each one becomes a [`Burst`] on a broadcast channel. The
//! payload is not interpreted; consumers only react to the fact that
//! something arrived. When the source goes away the client waits a fixed
//! delay and reconnects, indefinitely, until it is cancelled.

pub mod client;
pub mod transport;

pub use client::{
    Burst, ConnectionState, NotifierConfig, NotifierHandle, NotifierStats, ReconnectingClient,
    DEFAULT_ENDPOINT, DEFAULT_RETRY_DELAY,
};
pub use transport::{Connector, Notification, Subscription, TransportError, WsConnector};

//! Loopback WebSocket relay for the app-bridge project.
//!
//! Applications (a creative tool and any number of control surfaces) open a
//! WebSocket session to the relay, register under an application name, and
//! exchange commands without knowing each other's address.
//!
//! # Architecture
//!
//! ```text
//! Surface A --WS--+                     +--> session writer --> Surface A
//! Surface B --WS--+--> [hub task] ------+--> session writer --> Surface B
//! Sender    --WS--+   (owns registry)   +--> session writer --> Sender
//! ```
//!
//! Each session's reader forwards parsed events into a single hub task that
//! owns the [`ConnectionRegistry`]. Commands are fanned out to every session
//! registered for the target application; responses are routed back to the
//! one session named in their `senderId`. The `Origin` header is checked on
//! every handshake and on plain HTTP requests by one axum middleware; only
//! loopback origins pass.

pub mod client;
pub mod cors;
pub mod error;
pub mod hub;
pub mod listener;
pub mod origin;
pub mod protocol;
pub mod registry;
pub mod routes;

// Re-export the primary public types at the crate root for convenience.
pub use client::{ClientError, RelayClient, DEFAULT_COMMAND_TIMEOUT};
pub use error::RouteError;
pub use hub::{HubHandle, HubStats};
pub use listener::{RelayConfig, RelayServer, DEFAULT_PORT};
pub use origin::{validate_origin, OriginRejection};
pub use protocol::{ClientEvent, CommandPacket, ConnectionId, RegistrationStatus, ServerEvent};
pub use registry::ConnectionRegistry;

use thiserror::Error;

use crate::protocol::ConnectionId;

/// Reasons a packet could not be delivered.
///
/// None of these are reported back to the issuing session; they exist so the
/// relay can log drops with a consistent vocabulary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no connections registered for application '{application}'")]
    UnroutablePacket { application: String },

    #[error("response packet has no senderId")]
    MissingSenderId,

    #[error("connection '{id}' is not connected")]
    UnknownConnection { id: ConnectionId },

    #[error("application name must not be empty")]
    EmptyApplication,
}

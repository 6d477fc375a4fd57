//! Error types for client operations.

use thiserror::Error;

use crate::transport::ConnectError;

/// Errors surfaced by [`SubscriptionClient`](super::SubscriptionClient),
/// either synchronously from its methods or through the connection
/// callback.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport establishment failed and will not be retried.
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    /// The server rejected the handshake; never retried automatically.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    /// An inbound frame was not a parseable message; fatal to the current
    /// physical connection.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The subscribe request carried no query.
    #[error("subscription request is missing a query")]
    EmptyQuery,
    /// The client has permanently closed.
    #[error("client is closed")]
    Closed,
}

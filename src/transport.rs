//! Frame-oriented transport abstraction.
//!
//! The protocol engines never touch sockets. A [`Transport`] carries whole
//! text frames over an established duplex connection; a [`Connect`] dials
//! new connections for the client's reconnection controller.

use std::io;

use async_trait::async_trait;
use thiserror::Error;

/// An established duplex connection carrying whole text frames.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one frame.
    ///
    /// # Errors
    /// An I/O error means the connection is unusable; the engine tears the
    /// session down.
    async fn send(&mut self, frame: String) -> io::Result<()>;

    /// Receive the next frame. `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<String>;

    /// Close the connection with the given close code. Idempotent.
    async fn close(&mut self, code: u16);
}

/// Why a connection attempt failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The endpoint could not be reached.
    #[error("connection refused: {0}")]
    Refused(String),
    /// The endpoint answered but rejected the subprotocol negotiation.
    #[error("protocol rejected with close code {code}")]
    ProtocolRejected { code: u16 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Dials fresh connections. One value serves the whole client lifetime,
/// including reconnection attempts.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Transport: Transport;

    /// Establish one connection.
    ///
    /// # Errors
    /// A [`ConnectError`]; the client's reconnection policy decides whether
    /// another attempt follows.
    async fn connect(&self) -> Result<Self::Transport, ConnectError>;
}

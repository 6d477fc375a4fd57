//! Client configuration.

use std::time::Duration;

use serde_json::Value;

use super::error::ClientError;

/// Observer for handshake outcomes and eagerly surfaced protocol errors.
///
/// Invoked with `Ok(())` on every accepted handshake (including after
/// reconnects) and with an error for handshake rejection, fatal protocol
/// violations, or a final failed connection attempt.
pub type ConnectionCallback = Box<dyn FnMut(Result<(), ClientError>) + Send + 'static>;

/// Options accepted by
/// [`SubscriptionClient::connect`](super::SubscriptionClient::connect).
pub struct ClientConfig {
    /// Opaque parameters carried in the `init` payload.
    pub connection_params: Option<Value>,
    /// Window for the first response to each subscribe request. `None`
    /// disables the per-subscription timeout.
    pub timeout: Option<Duration>,
    /// Re-establish the connection after unexpected closure.
    pub reconnect: bool,
    /// Maximum reconnection attempts before closing permanently.
    pub reconnection_attempts: usize,
    /// Observer for handshake results and protocol violations.
    pub connection_callback: Option<ConnectionCallback>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_params: None,
            timeout: None,
            reconnect: false,
            reconnection_attempts: usize::MAX,
            connection_callback: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connection_params", &self.connection_params)
            .field("timeout", &self.timeout)
            .field("reconnect", &self.reconnect)
            .field("reconnection_attempts", &self.reconnection_attempts)
            .field(
                "connection_callback",
                &self.connection_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl ClientConfig {
    /// Set the opaque handshake parameters.
    #[must_use]
    pub fn connection_params(mut self, params: Value) -> Self {
        self.connection_params = Some(params);
        self
    }

    /// Set the per-subscription response timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Bound the number of reconnection attempts.
    #[must_use]
    pub fn reconnection_attempts(mut self, attempts: usize) -> Self {
        self.reconnection_attempts = attempts;
        self
    }

    /// Observe handshake outcomes and protocol errors.
    #[must_use]
    pub fn connection_callback(
        mut self,
        callback: impl FnMut(Result<(), ClientError>) + Send + 'static,
    ) -> Self {
        self.connection_callback = Some(Box::new(callback));
        self
    }
}

//! Server-side protocol hooks invoked around the connection lifecycle.
//!
//! Applications implement [`ServerHooks`] to validate handshakes, rewrite
//! subscribe requests, and observe teardown. Every method has a
//! pass-through default, so implementors override only what they need.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::{
    protocol::{Message, SubscriptionId, SubscriptionRequest},
    session::ConnectionId,
};

/// Failure reason reported by a connect or subscribe hook.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct HookError {
    /// Reason reported back to the peer.
    pub reason: String,
}

impl HookError {
    /// Create a failure from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Connection metadata passed to every hook.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    /// Identifier of the owning connection.
    pub connection_id: ConnectionId,
    /// Opaque peer description supplied when the transport was attached.
    pub peer: Option<String>,
}

/// Application hooks around handshake, subscription, and teardown.
#[async_trait]
pub trait ServerHooks: Send + Sync + 'static {
    /// Validate the handshake payload and produce the connection context.
    ///
    /// Failure rejects the handshake with `init_fail` and closes the
    /// connection.
    ///
    /// # Errors
    /// A [`HookError`] whose reason is reported to the peer.
    async fn on_connect(
        &self,
        _params: Option<&Value>,
        _info: &ConnectionInfo,
    ) -> Result<Option<Value>, HookError> {
        Ok(None)
    }

    /// Resolve a subscribe request before it reaches the executor.
    ///
    /// The hook may rewrite the request, e.g. to inject authorisation state
    /// into its context.
    ///
    /// # Errors
    /// A [`HookError`] rejects the request with `subscription_fail`; the
    /// executor is never consulted.
    async fn on_subscribe(
        &self,
        _message: &Message,
        request: SubscriptionRequest,
        _info: &ConnectionInfo,
    ) -> Result<SubscriptionRequest, HookError> {
        Ok(request)
    }

    /// Observe a subscription ending. Fire-and-forget.
    async fn on_unsubscribe(&self, _id: &SubscriptionId, _info: &ConnectionInfo) {}

    /// Observe the connection closing. Invoked exactly once per connection;
    /// never blocks teardown.
    async fn on_disconnect(&self, _info: &ConnectionInfo) {}
}

/// Hooks that accept everything and observe nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

#[async_trait]
impl ServerHooks for NoopHooks {}

#[async_trait]
impl<H: ServerHooks> ServerHooks for Arc<H> {
    async fn on_connect(
        &self,
        params: Option<&Value>,
        info: &ConnectionInfo,
    ) -> Result<Option<Value>, HookError> {
        self.as_ref().on_connect(params, info).await
    }

    async fn on_subscribe(
        &self,
        message: &Message,
        request: SubscriptionRequest,
        info: &ConnectionInfo,
    ) -> Result<SubscriptionRequest, HookError> {
        self.as_ref().on_subscribe(message, request, info).await
    }

    async fn on_unsubscribe(&self, id: &SubscriptionId, info: &ConnectionInfo) {
        self.as_ref().on_unsubscribe(id, info).await;
    }

    async fn on_disconnect(&self, info: &ConnectionInfo) {
        self.as_ref().on_disconnect(info).await;
    }
}

//! Recording [`ServerHooks`] fake.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;

use subwire::{
    hooks::{ConnectionInfo, HookError, ServerHooks},
    protocol::{Message, SubscriptionId, SubscriptionRequest},
};

/// Hooks implementation that records every invocation and can be scripted
/// to reject handshakes or subscriptions.
#[derive(Default)]
pub struct RecordingHooks {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    connect_params: Mutex<Option<Value>>,
    subscribes: Mutex<Vec<SubscriptionRequest>>,
    unsubscribes: Mutex<Vec<SubscriptionId>>,
    connect_error: Mutex<Option<String>>,
    subscribe_error: Mutex<Option<String>>,
    context: Mutex<Option<Value>>,
}

impl RecordingHooks {
    /// Reject every handshake with the given reason.
    pub fn reject_connect(&self, reason: &str) {
        *lock(&self.connect_error) = Some(reason.to_owned());
    }

    /// Reject every subscribe with the given reason.
    pub fn reject_subscribe(&self, reason: &str) {
        *lock(&self.subscribe_error) = Some(reason.to_owned());
    }

    /// Return the given context from accepted handshakes.
    pub fn with_context(&self, context: Value) { *lock(&self.context) = Some(context); }

    #[must_use]
    pub fn connect_count(&self) -> usize { self.connects.load(Ordering::SeqCst) }

    #[must_use]
    pub fn disconnect_count(&self) -> usize { self.disconnects.load(Ordering::SeqCst) }

    /// Parameters seen by the most recent handshake.
    #[must_use]
    pub fn last_connect_params(&self) -> Option<Value> { lock(&self.connect_params).clone() }

    /// Requests seen by the subscribe hook, in order.
    #[must_use]
    pub fn subscribed(&self) -> Vec<SubscriptionRequest> { lock(&self.subscribes).clone() }

    /// Ids seen by the unsubscribe hook, in order.
    #[must_use]
    pub fn unsubscribed(&self) -> Vec<SubscriptionId> { lock(&self.unsubscribes).clone() }
}

#[async_trait]
impl ServerHooks for RecordingHooks {
    async fn on_connect(
        &self,
        params: Option<&Value>,
        _info: &ConnectionInfo,
    ) -> Result<Option<Value>, HookError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *lock(&self.connect_params) = params.cloned();
        if let Some(reason) = lock(&self.connect_error).clone() {
            return Err(HookError::new(reason));
        }
        Ok(lock(&self.context).clone())
    }

    async fn on_subscribe(
        &self,
        _message: &Message,
        request: SubscriptionRequest,
        _info: &ConnectionInfo,
    ) -> Result<SubscriptionRequest, HookError> {
        lock(&self.subscribes).push(request.clone());
        if let Some(reason) = lock(&self.subscribe_error).clone() {
            return Err(HookError::new(reason));
        }
        Ok(request)
    }

    async fn on_unsubscribe(&self, id: &SubscriptionId, _info: &ConnectionInfo) {
        lock(&self.unsubscribes).push(id.clone());
    }

    async fn on_disconnect(&self, _info: &ConnectionInfo) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Deterministic executor fake driven entirely by the test.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use futures::StreamExt;
use tokio::sync::mpsc;

use subwire::{
    executor::{ActiveSubscription, ExecutorEvent, ExecutorHandle, SubscriptionExecutor},
    protocol::{EventPayload, ProtocolError, SubscriptionRequest},
};

struct LiveSubscription {
    handle: ExecutorHandle,
    query: String,
    events: mpsc::UnboundedSender<ExecutorEvent>,
}

/// Scripted [`SubscriptionExecutor`]: records every call and publishes
/// events on demand to subscriptions selected by query substring.
#[derive(Default)]
pub struct ScriptedExecutor {
    next_handle: AtomicU64,
    live: Mutex<Vec<LiveSubscription>>,
    rejection: Mutex<Option<Vec<ProtocolError>>>,
    subscribed: Mutex<Vec<SubscriptionRequest>>,
    released: Mutex<Vec<ExecutorHandle>>,
}

impl ScriptedExecutor {
    /// Reject every following subscribe call with the given errors.
    pub fn reject_with(&self, errors: Vec<ProtocolError>) {
        *lock(&self.rejection) = Some(errors);
    }

    /// Accept subscribe calls again.
    pub fn accept(&self) { *lock(&self.rejection) = None; }

    /// Publish one event to every live subscription whose query contains
    /// `fragment`.
    pub fn publish(&self, fragment: &str, payload: &EventPayload) {
        for sub in lock(&self.live).iter() {
            if sub.query.contains(fragment) {
                let _ = sub.events.send(ExecutorEvent::Data(payload.clone()));
            }
        }
    }

    /// Report a terminal error list to matching subscriptions.
    pub fn fail(&self, fragment: &str, errors: &[ProtocolError]) {
        for sub in lock(&self.live).iter() {
            if sub.query.contains(fragment) {
                let _ = sub.events.send(ExecutorEvent::Failed(errors.to_vec()));
            }
        }
    }

    /// End matching subscription streams normally.
    pub fn end(&self, fragment: &str) {
        lock(&self.live).retain(|sub| !sub.query.contains(fragment));
    }

    /// Requests accepted so far, in order.
    #[must_use]
    pub fn subscribed(&self) -> Vec<SubscriptionRequest> { lock(&self.subscribed).clone() }

    /// Handles released so far, in order.
    #[must_use]
    pub fn released(&self) -> Vec<ExecutorHandle> { lock(&self.released).clone() }

    /// Number of streams still attached.
    #[must_use]
    pub fn live_count(&self) -> usize { lock(&self.live).len() }
}

#[async_trait::async_trait]
impl SubscriptionExecutor for ScriptedExecutor {
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<ActiveSubscription, Vec<ProtocolError>> {
        if let Some(errors) = lock(&self.rejection).clone() {
            return Err(errors);
        }
        lock(&self.subscribed).push(request.clone());
        let handle = ExecutorHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&self.live).push(LiveSubscription {
            handle,
            query: request.query,
            events: tx,
        });
        let events = async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
        .boxed();
        Ok(ActiveSubscription { handle, events })
    }

    async fn unsubscribe(&self, handle: ExecutorHandle) {
        lock(&self.released).push(handle);
        lock(&self.live).retain(|sub| sub.handle != handle);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

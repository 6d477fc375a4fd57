//! Executor seam: where accepted subscriptions produce their events.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::protocol::{EventPayload, ProtocolError, SubscriptionRequest};

/// Executor-side identifier of one running subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecutorHandle(u64);

impl ExecutorHandle {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// One occurrence on a subscription's event stream.
#[derive(Clone, Debug)]
pub enum ExecutorEvent {
    /// A result event, forwarded as `subscription_data`.
    Data(EventPayload),
    /// A terminal failure; the subscription is torn down after the errors
    /// are reported.
    Failed(Vec<ProtocolError>),
}

/// Stream of events for one running subscription. Ending the stream ends
/// the subscription normally.
pub type EventStream = BoxStream<'static, ExecutorEvent>;

/// A subscription the executor accepted.
pub struct ActiveSubscription {
    pub handle: ExecutorHandle,
    pub events: EventStream,
}

/// Registers subscriptions and produces their event streams.
#[async_trait]
pub trait SubscriptionExecutor: Send + Sync + 'static {
    /// Validate and register one subscription.
    ///
    /// # Errors
    /// A non-empty error list; the server reports it via `subscription_fail`
    /// and registers nothing.
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<ActiveSubscription, Vec<ProtocolError>>;

    /// Release one running subscription. Unknown handles are a no-op.
    async fn unsubscribe(&self, handle: ExecutorHandle);
}

#[async_trait]
impl<E: SubscriptionExecutor> SubscriptionExecutor for Arc<E> {
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<ActiveSubscription, Vec<ProtocolError>> {
        self.as_ref().subscribe(request).await
    }

    async fn unsubscribe(&self, handle: ExecutorHandle) {
        self.as_ref().unsubscribe(handle).await;
    }
}

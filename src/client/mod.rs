//! Client engine: connection lifecycle, subscription table, outbound
//! queue, and reconnection.
//!
//! [`SubscriptionClient`] is a cheap handle over shared state; the work
//! happens in a runtime task spawned by [`SubscriptionClient::connect`].
//! `subscribe` and `unsubscribe` mutate the shared table synchronously and
//! nudge the runtime, which owns the transport and all timers exclusively.

mod backoff;
mod config;
mod error;
mod observers;
mod queue;
mod runtime;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub use config::{ClientConfig, ConnectionCallback};
pub use error::ClientError;
pub use observers::ListenerGuard;
pub use runtime::SUBSCRIPTION_TIMEOUT_ERROR;

use observers::Observers;
use queue::OutboundQueue;
use runtime::Runtime;

use crate::{
    protocol::{EventPayload, Message, SubscriptionId, SubscriptionRequest},
    transport::Connect,
};

/// Client-visible lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// No transport yet (initial or between reconnection attempts).
    Connecting,
    /// Transport open, `init` sent, acknowledgment pending.
    AwaitingAck,
    /// Handshake accepted; traffic flows.
    Ready,
    /// Permanently closed; every subsequent operation fails.
    Closed,
}

/// State of one logical subscription, client view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubscriptionState {
    /// `subscription_start` queued or sent; no response yet.
    Pending,
    /// Acknowledged (or already delivering data).
    Active,
}

/// Callback receiving result events for one subscription. A single
/// delivery may carry partial data and errors together.
pub type ResultCallback = Box<dyn FnMut(EventPayload) + Send + 'static>;

struct ClientSubscription {
    request: SubscriptionRequest,
    // Shared so the runtime can invoke it without holding the table lock;
    // a callback may re-enter the client (e.g. unsubscribe_all).
    callback: Arc<Mutex<ResultCallback>>,
    state: SubscriptionState,
}

/// State shared between the handle and the runtime task.
struct Core {
    state: ClientState,
    subscriptions: HashMap<SubscriptionId, ClientSubscription>,
    queue: OutboundQueue,
    /// Ids whose response timeout the runtime has not armed yet.
    newly_pending: Vec<SubscriptionId>,
    closed: bool,
    keepalives_seen: u64,
}

impl Core {
    fn new() -> Self {
        Self {
            state: ClientState::Connecting,
            subscriptions: HashMap::new(),
            queue: OutboundQueue::default(),
            newly_pending: Vec::new(),
            closed: false,
            keepalives_seen: 0,
        }
    }
}

fn lock_core(core: &Mutex<Core>) -> MutexGuard<'_, Core> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The client side of the subscription protocol.
pub struct SubscriptionClient {
    core: Arc<Mutex<Core>>,
    observers: Arc<Observers>,
    outbound: Arc<Notify>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    runtime: JoinHandle<()>,
}

impl SubscriptionClient {
    /// Establish a client over `connector` and spawn its runtime task.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect<C: Connect>(connector: C, config: ClientConfig) -> Self {
        let core = Arc::new(Mutex::new(Core::new()));
        let observers = Arc::new(Observers::default());
        let outbound = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let runtime = Runtime::new(
            connector,
            config,
            Arc::clone(&core),
            Arc::clone(&observers),
            Arc::clone(&outbound),
            shutdown.clone(),
        );
        Self {
            core,
            observers,
            outbound,
            shutdown,
            next_id: AtomicU64::new(1),
            runtime: tokio::spawn(runtime.run()),
        }
    }

    /// Open a subscription.
    ///
    /// The id is allocated here: monotonically increasing and never reused,
    /// even across reconnects. The request is queued immediately and sent
    /// once the connection is `Ready`.
    ///
    /// # Errors
    /// [`ClientError::EmptyQuery`] when the request carries a blank query;
    /// [`ClientError::Closed`] once the client has permanently closed.
    pub fn subscribe(
        &self,
        request: SubscriptionRequest,
        callback: impl FnMut(EventPayload) + Send + 'static,
    ) -> Result<SubscriptionId, ClientError> {
        if request.query.trim().is_empty() {
            return Err(ClientError::EmptyQuery);
        }
        let mut core = lock_core(&self.core);
        if core.closed {
            return Err(ClientError::Closed);
        }
        let id = SubscriptionId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        core.subscriptions.insert(
            id.clone(),
            ClientSubscription {
                request: request.clone(),
                callback: Arc::new(Mutex::new(Box::new(callback))),
                state: SubscriptionState::Pending,
            },
        );
        core.newly_pending.push(id.clone());
        core.queue.push(Message::SubscriptionStart {
            id: id.clone(),
            payload: request,
        });
        drop(core);
        self.outbound.notify_one();
        Ok(id)
    }

    /// End a subscription. Unknown ids are a no-op.
    ///
    /// The table entry is removed immediately: an in-flight event for the
    /// id is dropped, never delivered.
    pub fn unsubscribe(&self, id: &SubscriptionId) {
        let mut core = lock_core(&self.core);
        if core.subscriptions.remove(id).is_some() {
            core.queue.push(Message::SubscriptionEnd { id: id.clone() });
            drop(core);
            self.outbound.notify_one();
        }
    }

    /// End every subscription.
    pub fn unsubscribe_all(&self) {
        let mut core = lock_core(&self.core);
        let mut ids: Vec<SubscriptionId> = core.subscriptions.keys().cloned().collect();
        ids.sort_unstable();
        for id in ids {
            core.subscriptions.remove(&id);
            core.queue.push(Message::SubscriptionEnd { id });
        }
        drop(core);
        self.outbound.notify_one();
    }

    /// Register a listener for the first successful connection.
    pub fn on_connect(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerGuard {
        self.observers.connect.register(listener)
    }

    /// Register a listener for connection loss.
    pub fn on_disconnect(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerGuard {
        self.observers.disconnect.register(listener)
    }

    /// Register a listener for re-established connections.
    pub fn on_reconnect(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerGuard {
        self.observers.reconnect.register(listener)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState { lock_core(&self.core).state }

    /// Number of frames waiting for the handshake to complete.
    #[must_use]
    pub fn queued_messages(&self) -> usize { lock_core(&self.core).queue.len() }

    /// Keep-alive probes observed on the current connection.
    #[must_use]
    pub fn keepalives_seen(&self) -> u64 { lock_core(&self.core).keepalives_seen }

    /// Close deliberately and wait for the runtime to stop.
    ///
    /// Never triggers reconnection.
    pub async fn close(self) {
        lock_core(&self.core).closed = true;
        self.shutdown.cancel();
        let _ = self.runtime.await;
    }
}

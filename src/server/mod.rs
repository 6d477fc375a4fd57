//! Server engine: one independent session task per accepted connection.
//!
//! The engine owns no listener. Whatever accepts connections and negotiates
//! the sub-protocol hands each established [`Transport`] to
//! [`SubscriptionServer::attach`], which spawns a session actor and
//! registers it in the shared [`SessionRegistry`].

mod session;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    executor::SubscriptionExecutor,
    hooks::{ConnectionInfo, NoopHooks, ServerHooks},
    session::{ConnectionId, SessionControl, SessionRegistry},
    transport::Transport,
};

/// Per-engine settings shared by every session.
#[derive(Clone, Copy, Debug, Default)]
struct ServerConfig {
    /// Interval between `keepalive` frames on `Ready` connections.
    keepalive: Option<Duration>,
}

/// The server side of the subscription protocol.
///
/// Generic over the executor `E` (required at construction) and the hook
/// implementation `H` (defaults to [`NoopHooks`]). Cloning is cheap and
/// yields a handle to the same engine, so listener tasks can share one.
pub struct SubscriptionServer<E, H = NoopHooks> {
    executor: Arc<E>,
    hooks: Arc<H>,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    next_connection_id: Arc<AtomicU64>,
}

impl<E, H> Clone for SubscriptionServer<E, H> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            hooks: Arc::clone(&self.hooks),
            config: self.config,
            registry: Arc::clone(&self.registry),
            next_connection_id: Arc::clone(&self.next_connection_id),
        }
    }
}

impl<E: SubscriptionExecutor> SubscriptionServer<E, NoopHooks> {
    /// Create an engine around the given executor.
    pub fn new(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
            hooks: Arc::new(NoopHooks),
            config: ServerConfig::default(),
            registry: Arc::new(SessionRegistry::default()),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<E: SubscriptionExecutor, H: ServerHooks> SubscriptionServer<E, H> {
    /// Replace the hook implementation.
    #[must_use]
    pub fn with_hooks<H2: ServerHooks>(self, hooks: H2) -> SubscriptionServer<E, H2> {
        SubscriptionServer {
            executor: self.executor,
            hooks: Arc::new(hooks),
            config: self.config,
            registry: self.registry,
            next_connection_id: self.next_connection_id,
        }
    }

    /// Emit a `keepalive` frame every `interval` on `Ready` connections.
    #[must_use]
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.config.keepalive = Some(interval);
        self
    }

    /// Adopt an accepted transport, spawning its session task.
    ///
    /// `peer` is an opaque description (e.g. remote address) surfaced to
    /// hooks and logs.
    pub fn attach<T: Transport>(&self, transport: T, peer: Option<String>) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let control = SessionControl::new();
        self.registry.insert(id, &control);
        let session = session::Session::new(
            transport,
            Arc::clone(&self.executor),
            Arc::clone(&self.hooks),
            ConnectionInfo {
                connection_id: id,
                peer,
            },
            self.config,
            control,
            Arc::clone(&self.registry),
        );
        tokio::spawn(session.run());
        id
    }

    /// The registry of live sessions.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry { &self.registry }

    /// Cancel every live session.
    pub fn shutdown(&self) { self.registry.shutdown_all(); }
}

//! Utilities for driving `subwire` engines over in-memory transports
//! during tests.
//!
//! The harness deliberately contains no real sockets: transports are
//! unbounded channel pairs, the executor and hooks are scripted fakes, and
//! timers are expected to run under a paused tokio clock so every timing
//! property is deterministic.

pub mod executor;
pub mod hooks;
pub mod memory;

use std::{sync::Arc, time::Duration};

pub use executor::ScriptedExecutor;
pub use hooks::RecordingHooks;
pub use memory::{CloseProbe, MemoryConnector, MemoryTransport, memory_pair};

use subwire::{
    client::{ClientConfig, SubscriptionClient},
    executor::SubscriptionExecutor,
    hooks::ServerHooks,
    server::SubscriptionServer,
};

/// Let spawned tasks and due timers settle under a paused clock.
pub async fn settle() { tokio::time::sleep(Duration::from_millis(1)).await; }

/// Wire a client to a server engine over in-memory links.
///
/// Every (re)connection attempt mints a fresh pair whose server end is fed
/// to the engine by a background acceptor task. The returned connector
/// clone exposes the rejection toggle and attempt counter.
pub fn attach_pair<E, H>(
    server: &SubscriptionServer<E, H>,
    config: ClientConfig,
) -> (SubscriptionClient, MemoryConnector)
where
    E: SubscriptionExecutor,
    H: ServerHooks,
{
    let (connector, mut ends) = MemoryConnector::new();
    let acceptor = server.clone();
    tokio::spawn(async move {
        while let Some(end) = ends.recv().await {
            acceptor.attach(end, Some("memory".to_owned()));
        }
    });
    let client = SubscriptionClient::connect(connector.clone(), config);
    (client, connector)
}

/// Shorthand for sharing a scripted executor with a server engine.
#[must_use]
pub fn scripted_server() -> (Arc<ScriptedExecutor>, SubscriptionServer<Arc<ScriptedExecutor>>) {
    let executor = Arc::new(ScriptedExecutor::default());
    let server = SubscriptionServer::new(Arc::clone(&executor));
    (executor, server)
}

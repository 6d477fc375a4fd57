//! `subwire`: a bidirectional, multiplexed subscription protocol over one
//! persistent duplex connection.
//!
//! The crate implements both protocol engines and the wire format; the
//! transport, the query executor, and the event source stay behind traits:
//!
//! - [`server::SubscriptionServer`] validates the handshake, registers
//!   subscriptions against a [`SubscriptionExecutor`], forwards executor
//!   events as `subscription_data`, emits keep-alive probes, and sweeps
//!   state on disconnect.
//! - [`client::SubscriptionClient`] owns the connection lifecycle, a local
//!   subscription table, an outbound queue flushed in order once the
//!   handshake is acknowledged, per-subscription response timeouts, and
//!   bounded reconnection with automatic resubscription.
//! - [`protocol`] defines the closed message set, serialized as one UTF-8
//!   JSON text frame per message.

pub mod client;
pub mod executor;
pub mod hooks;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{
    ClientConfig, ClientError, ClientState, ConnectionCallback, ListenerGuard, ResultCallback,
    SUBSCRIPTION_TIMEOUT_ERROR, SubscriptionClient,
};
pub use executor::{
    ActiveSubscription, EventStream, ExecutorEvent, ExecutorHandle, SubscriptionExecutor,
};
pub use hooks::{ConnectionInfo, HookError, NoopHooks, ServerHooks};
pub use protocol::{
    EventPayload, Message, ProtocolError, SUBSCRIPTIONS_PROTOCOL, SubscriptionId,
    SubscriptionRequest,
};
pub use server::SubscriptionServer;
pub use session::{ConnectionId, SessionControl, SessionRegistry};
pub use transport::{Connect, ConnectError, Transport};

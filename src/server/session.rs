//! Per-connection session actor.
//!
//! Each session owns its transport, registry of active subscriptions, and
//! optional keep-alive timer. It multiplexes four event sources through one
//! biased `tokio::select!` loop: cancellation, inbound frames, executor
//! events piped back by forwarder tasks, and the keep-alive tick.
//!
//! Executor event streams are drained by small forwarder tasks that feed a
//! bounded channel, so a slow subscription applies backpressure to its own
//! stream without stalling frame handling for the rest of the connection.

use std::{collections::HashMap, ops::ControlFlow, sync::Arc};

use futures::StreamExt;
use log::{info, warn};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::debug;

use super::ServerConfig;
use crate::{
    executor::{EventStream, ExecutorEvent, ExecutorHandle, SubscriptionExecutor},
    hooks::{ConnectionInfo, ServerHooks},
    metrics::{self, Direction},
    protocol::{
        DecodeError, InitFailPayload, Message, ProtocolError, SubscriptionId, close_code,
    },
    session::{SessionControl, SessionRegistry},
    transport::Transport,
};

/// Protocol state of the server side of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    /// Transport established, handshake not yet accepted.
    Connecting,
    /// Handshake accepted; subscription traffic flows.
    Ready,
}

/// Registry entry for one active subscription.
struct SubscriptionEntry {
    handle: ExecutorHandle,
    forwarder: JoinHandle<()>,
}

/// Event piped back from a subscription's forwarder task.
enum SessionEvent {
    Event {
        id: SubscriptionId,
        event: ExecutorEvent,
    },
    Ended {
        id: SubscriptionId,
    },
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub(super) struct Session<T, E, H> {
    transport: T,
    executor: Arc<E>,
    hooks: Arc<H>,
    info: ConnectionInfo,
    config: ServerConfig,
    state: SessionState,
    context: Option<serde_json::Value>,
    subscriptions: HashMap<SubscriptionId, SubscriptionEntry>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    keepalive: Option<Interval>,
    control: Arc<SessionControl>,
    registry: Arc<SessionRegistry>,
}

impl<T, E, H> Session<T, E, H>
where
    T: Transport,
    E: SubscriptionExecutor,
    H: ServerHooks,
{
    pub(super) fn new(
        transport: T,
        executor: Arc<E>,
        hooks: Arc<H>,
        info: ConnectionInfo,
        config: ServerConfig,
        control: Arc<SessionControl>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            executor,
            hooks,
            info,
            config,
            state: SessionState::Connecting,
            context: None,
            subscriptions: HashMap::new(),
            events_tx,
            events_rx,
            keepalive: None,
            control,
            registry,
        }
    }

    pub(super) async fn run(mut self) {
        metrics::connection_opened();
        info!(
            "connection opened: id={}, peer={:?}",
            self.info.connection_id, self.info.peer
        );
        let cancel = self.control.token();
        loop {
            let keepalive_armed = self.keepalive.is_some();
            let flow = tokio::select! {
                biased;
                () = cancel.cancelled() => ControlFlow::Break(()),
                frame = self.transport.recv() => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => ControlFlow::Break(()),
                },
                Some(event) = self.events_rx.recv() => self.forward_event(event).await,
                () = tick(self.keepalive.as_mut()), if keepalive_armed => {
                    self.send(Message::Keepalive).await
                }
            };
            if flow.is_break() {
                break;
            }
        }
        self.teardown().await;
    }

    async fn handle_frame(&mut self, frame: String) -> ControlFlow<()> {
        metrics::frame_processed(Direction::Inbound);
        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(error) => return self.reject_frame(&error).await,
        };
        debug!(kind = message.kind(), "inbound message");
        match message {
            Message::Init { payload } => self.handle_init(payload).await,
            Message::SubscriptionStart { .. } => self.handle_start(message).await,
            Message::SubscriptionEnd { id } => {
                // Unknown ids (reserved-looking names included) are no-ops.
                self.release(&id).await;
                ControlFlow::Continue(())
            }
            other => {
                metrics::error_recorded();
                let errors = vec![ProtocolError::new(format!(
                    "invalid message type: {}",
                    other.kind()
                ))];
                self.send(Message::subscription_fail(other.id().cloned(), errors))
                    .await
            }
        }
    }

    async fn handle_init(&mut self, payload: Option<serde_json::Value>) -> ControlFlow<()> {
        if self.state != SessionState::Connecting {
            warn!(
                "duplicate init ignored: id={}",
                self.info.connection_id
            );
            return ControlFlow::Continue(());
        }
        match self.hooks.on_connect(payload.as_ref(), &self.info).await {
            Ok(context) => {
                self.context = context;
                self.state = SessionState::Ready;
                self.arm_keepalive();
                self.send(Message::InitSuccess).await
            }
            Err(error) => {
                metrics::error_recorded();
                info!(
                    "handshake rejected: id={}, reason={}",
                    self.info.connection_id, error.reason
                );
                let _ = self
                    .send(Message::InitFail {
                        payload: InitFailPayload {
                            error: error.reason,
                        },
                    })
                    .await;
                self.transport.close(close_code::NORMAL).await;
                ControlFlow::Break(())
            }
        }
    }

    async fn handle_start(&mut self, message: Message) -> ControlFlow<()> {
        let (id, request) = match &message {
            Message::SubscriptionStart { id, payload } => (id.clone(), payload.clone()),
            _ => return ControlFlow::Continue(()),
        };
        if self.state != SessionState::Ready {
            let errors = vec![ProtocolError::new("connection has not been initialised")];
            return self.send(Message::subscription_fail(Some(id), errors)).await;
        }
        // An id is never active twice; a reused id releases the old entry.
        if self.subscriptions.contains_key(&id) {
            self.release(&id).await;
        }
        let mut request = request;
        if request.context.is_none() {
            request.context = self.context.clone();
        }
        let resolved = match self.hooks.on_subscribe(&message, request, &self.info).await {
            Ok(resolved) => resolved,
            Err(error) => {
                metrics::error_recorded();
                let errors = vec![ProtocolError::new(error.reason)];
                return self.send(Message::subscription_fail(Some(id), errors)).await;
            }
        };
        let active = match self.executor.subscribe(resolved).await {
            Ok(active) => active,
            Err(errors) => {
                metrics::error_recorded();
                return self.send(Message::subscription_fail(Some(id), errors)).await;
            }
        };
        let forwarder = self.spawn_forwarder(id.clone(), active.events);
        self.subscriptions.insert(
            id.clone(),
            SubscriptionEntry {
                handle: active.handle,
                forwarder,
            },
        );
        debug!(%id, "subscription registered");
        self.send(Message::SubscriptionSuccess { id }).await
    }

    fn spawn_forwarder(&self, id: SubscriptionId, mut events: EventStream) -> JoinHandle<()> {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if tx
                    .send(SessionEvent::Event {
                        id: id.clone(),
                        event,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx.send(SessionEvent::Ended { id }).await;
        })
    }

    async fn forward_event(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Event { id, event } => {
                if !self.subscriptions.contains_key(&id) {
                    // Raced an unsubscribe; the event is dropped.
                    return ControlFlow::Continue(());
                }
                match event {
                    ExecutorEvent::Data(payload) => {
                        self.send(Message::SubscriptionData { id, payload }).await
                    }
                    ExecutorEvent::Failed(errors) => {
                        metrics::error_recorded();
                        self.send(Message::subscription_fail(Some(id.clone()), errors))
                            .await?;
                        self.release(&id).await;
                        ControlFlow::Continue(())
                    }
                }
            }
            SessionEvent::Ended { id } => {
                if self.subscriptions.contains_key(&id) {
                    self.send(Message::SubscriptionEnd { id: id.clone() }).await?;
                    self.release(&id).await;
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Release one subscription: hook, executor, forwarder, registry entry.
    async fn release(&mut self, id: &SubscriptionId) {
        if let Some(entry) = self.subscriptions.remove(id) {
            entry.forwarder.abort();
            self.hooks.on_unsubscribe(id, &self.info).await;
            self.executor.unsubscribe(entry.handle).await;
            debug!(%id, "subscription released");
        }
    }

    async fn reject_frame(&mut self, error: &DecodeError) -> ControlFlow<()> {
        metrics::error_recorded();
        warn!(
            "rejecting frame: id={}, error={error}",
            self.info.connection_id
        );
        let (id, reason) = match error {
            DecodeError::Malformed(source) => {
                (None, format!("message must be a serialized object: {source}"))
            }
            DecodeError::Unsupported { id, reason } => (id.clone(), reason.clone()),
        };
        self.send(Message::subscription_fail(
            id,
            vec![ProtocolError::new(reason)],
        ))
        .await
    }

    fn arm_keepalive(&mut self) {
        // Armed exactly once, on the Connecting -> Ready transition.
        if let Some(period) = self.config.keepalive {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.keepalive = Some(timer);
        }
    }

    async fn send(&mut self, message: Message) -> ControlFlow<()> {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(error) => {
                metrics::error_recorded();
                log::error!("failed to encode {}: {error}", message.kind());
                return ControlFlow::Continue(());
            }
        };
        match self.transport.send(frame).await {
            Ok(()) => {
                metrics::frame_processed(Direction::Outbound);
                ControlFlow::Continue(())
            }
            Err(error) => {
                warn!(
                    "transport send failed: id={}, error={error}",
                    self.info.connection_id
                );
                ControlFlow::Break(())
            }
        }
    }

    async fn teardown(mut self) {
        self.hooks.on_disconnect(&self.info).await;
        let ids: Vec<SubscriptionId> = self.subscriptions.keys().cloned().collect();
        for id in ids {
            self.release(&id).await;
        }
        self.registry.remove(&self.info.connection_id);
        metrics::connection_closed();
        info!(
            "connection closed: id={}, peer={:?}",
            self.info.connection_id, self.info.peer
        );
    }
}

/// Poll an optional keep-alive timer; pends forever when unarmed.
async fn tick(timer: Option<&mut Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}

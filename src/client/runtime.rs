//! Connection-lifecycle runtime driving one client.
//!
//! The runtime task owns the transport, the per-subscription timeout queue,
//! and the reconnection controller. It multiplexes shutdown, inbound
//! frames, outbound nudges from the handle, and timeout expiry through one
//! biased `tokio::select!` loop per physical connection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use log::{error, info, warn};
use tokio::sync::Notify;
use tokio_util::{
    sync::CancellationToken,
    time::{DelayQueue, delay_queue},
};
use tracing::{debug, trace};

use super::{
    ClientState, Core, ResultCallback, SubscriptionState,
    backoff::Backoff,
    config::{ClientConfig, ConnectionCallback},
    error::ClientError,
    lock_core,
    observers::Observers,
};
use crate::{
    metrics::{self, Direction},
    protocol::{
        DecodeError, EventPayload, Message, ProtocolError, SubscriptionId, SubscriptionRequest,
        close_code,
    },
    transport::{Connect, Transport},
};

/// Error message synthesized when a subscribe round trip times out.
pub const SUBSCRIPTION_TIMEOUT_ERROR: &str = "Subscription timed out - no response from server";

/// Why the current physical connection stopped being driven.
enum Stop {
    /// Deliberate close; never reconnects.
    Manual,
    /// Handshake rejected by the server; never reconnects.
    Rejected,
    /// Unexpected closure or fatal protocol violation.
    Lost,
}

pub(super) struct Runtime<C: Connect> {
    connector: C,
    config: ClientConfig,
    core: Arc<Mutex<Core>>,
    observers: Arc<Observers>,
    outbound: Arc<Notify>,
    shutdown: CancellationToken,
    callback: Option<ConnectionCallback>,
    timeouts: DelayQueue<SubscriptionId>,
    timeout_keys: HashMap<SubscriptionId, delay_queue::Key>,
    backoff: Backoff,
    connected_once: bool,
    /// Set when a connection is lost; the next `init_success` re-issues
    /// every surviving subscription from the table.
    resubscribe: bool,
}

impl<C: Connect> Runtime<C> {
    pub(super) fn new(
        connector: C,
        mut config: ClientConfig,
        core: Arc<Mutex<Core>>,
        observers: Arc<Observers>,
        outbound: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        let callback = config.connection_callback.take();
        Self {
            connector,
            config,
            core,
            observers,
            outbound,
            shutdown,
            callback,
            timeouts: DelayQueue::new(),
            timeout_keys: HashMap::new(),
            backoff: Backoff::default(),
            connected_once: false,
            resubscribe: false,
        }
    }

    pub(super) async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let mut transport = match self.connector.connect().await {
                Ok(transport) => transport,
                Err(err) => {
                    warn!("connect attempt failed: {err}");
                    if self.retry(&mut attempt).await {
                        continue;
                    }
                    self.emit(Err(ClientError::Connect(err)));
                    break;
                }
            };
            attempt = 0;
            metrics::connection_opened();
            self.opened();
            let stop = self.drive(&mut transport).await;
            metrics::connection_closed();
            self.observers.disconnect.notify();
            match stop {
                Stop::Manual | Stop::Rejected => {
                    transport.close(close_code::NORMAL).await;
                    break;
                }
                Stop::Lost => {
                    self.retire();
                    if !self.retry(&mut attempt).await {
                        break;
                    }
                }
            }
        }
        self.finish();
    }

    /// Drive one open transport until it stops.
    async fn drive(&mut self, transport: &mut C::Transport) -> Stop {
        let init = Message::Init {
            payload: self.config.connection_params.clone(),
        };
        if self.send(transport, init).await.is_err() {
            return Stop::Lost;
        }
        loop {
            let timeouts_armed = !self.timeouts.is_empty();
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Stop::Manual,
                frame = transport.recv() => match frame {
                    Some(frame) => {
                        if let Some(stop) = self.handle_frame(transport, frame).await {
                            return stop;
                        }
                    }
                    None => return Stop::Lost,
                },
                () = self.outbound.notified() => {
                    self.arm_new_timeouts();
                    if self.flush(transport).await.is_err() {
                        return Stop::Lost;
                    }
                }
                expired = next_expired(&mut self.timeouts), if timeouts_armed => {
                    if let Some(id) = expired {
                        self.expire(&id);
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &mut self,
        transport: &mut C::Transport,
        frame: String,
    ) -> Option<Stop> {
        metrics::frame_processed(Direction::Inbound);
        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(DecodeError::Malformed(source)) => {
                metrics::error_recorded();
                error!("malformed inbound frame: {source}");
                self.emit(Err(ClientError::ProtocolViolation(source.to_string())));
                transport.close(close_code::PROTOCOL_ERROR).await;
                return Some(Stop::Lost);
            }
            Err(DecodeError::Unsupported { reason, .. }) => {
                warn!("ignoring unsupported inbound message: {reason}");
                return None;
            }
        };
        debug!(kind = message.kind(), "inbound message");
        match message {
            Message::InitSuccess => self.ready(transport).await,
            Message::InitFail { payload } => {
                info!("handshake rejected: {}", payload.error);
                self.emit(Err(ClientError::HandshakeRejected(payload.error)));
                Some(Stop::Rejected)
            }
            Message::SubscriptionSuccess { id } => {
                self.acknowledge(&id);
                None
            }
            Message::SubscriptionData { id, payload } => {
                self.deliver_data(&id, payload);
                None
            }
            Message::SubscriptionFail { id, payload } => {
                metrics::error_recorded();
                self.deliver_failure(id.as_ref(), payload.into_errors());
                None
            }
            Message::SubscriptionEnd { id } => {
                self.server_ended(&id);
                None
            }
            Message::Keepalive => {
                lock_core(&self.core).keepalives_seen += 1;
                trace!("keepalive");
                None
            }
            other @ (Message::Init { .. } | Message::SubscriptionStart { .. }) => {
                warn!("ignoring client-bound message kind: {}", other.kind());
                None
            }
        }
    }

    /// Handle `init_success`: resubscribe after a reconnect, then flush.
    async fn ready(&mut self, transport: &mut C::Transport) -> Option<Stop> {
        let resubscribe: Vec<(SubscriptionId, SubscriptionRequest)> = {
            let mut core = lock_core(&self.core);
            core.state = ClientState::Ready;
            if self.resubscribe {
                // The stale queue was discarded on loss; the table is the
                // sole source of truth for what must be re-issued.
                core.queue.clear();
                core.newly_pending.clear();
                let mut entries: Vec<_> = core
                    .subscriptions
                    .iter_mut()
                    .map(|(id, sub)| {
                        sub.state = SubscriptionState::Pending;
                        (id.clone(), sub.request.clone())
                    })
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries
            } else {
                Vec::new()
            }
        };
        self.resubscribe = false;
        self.emit(Ok(()));
        for (id, request) in resubscribe {
            self.arm_timeout(&id);
            let start = Message::SubscriptionStart {
                id,
                payload: request,
            };
            if self.send(transport, start).await.is_err() {
                return Some(Stop::Lost);
            }
        }
        self.arm_new_timeouts();
        if self.flush(transport).await.is_err() {
            return Some(Stop::Lost);
        }
        None
    }

    fn acknowledge(&mut self, id: &SubscriptionId) {
        {
            let mut core = lock_core(&self.core);
            let Some(sub) = core.subscriptions.get_mut(id) else {
                debug!(%id, "acknowledgment for unknown subscription");
                return;
            };
            sub.state = SubscriptionState::Active;
        }
        self.cancel_timeout(id);
    }

    fn deliver_data(&mut self, id: &SubscriptionId, payload: EventPayload) {
        let callback = {
            let mut core = lock_core(&self.core);
            let Some(sub) = core.subscriptions.get_mut(id) else {
                // Ended or unknown subscription; the event is dropped.
                debug!(%id, "dropping data for unknown subscription");
                return;
            };
            sub.state = SubscriptionState::Active;
            Arc::clone(&sub.callback)
        };
        self.cancel_timeout(id);
        invoke(&callback, payload);
    }

    fn deliver_failure(&mut self, id: Option<&SubscriptionId>, errors: Vec<ProtocolError>) {
        let Some(id) = id else {
            warn!("subscription failure without id: {errors:?}");
            return;
        };
        // The entry stays in the table; ending it is the caller's decision.
        let callback = {
            let core = lock_core(&self.core);
            let Some(sub) = core.subscriptions.get(id) else {
                debug!(%id, "failure for unknown subscription");
                return;
            };
            Arc::clone(&sub.callback)
        };
        self.cancel_timeout(id);
        invoke(&callback, EventPayload::from_errors(errors));
    }

    fn server_ended(&mut self, id: &SubscriptionId) {
        lock_core(&self.core).subscriptions.remove(id);
        self.cancel_timeout(id);
        debug!(%id, "subscription ended by server");
    }

    /// A subscribe round trip timed out while still `Pending`.
    fn expire(&mut self, id: &SubscriptionId) {
        self.timeout_keys.remove(id);
        let callback = {
            let mut core = lock_core(&self.core);
            match core.subscriptions.get(id) {
                Some(sub) if sub.state == SubscriptionState::Pending => {}
                _ => return,
            }
            core.subscriptions
                .remove(id)
                .map(|sub| sub.callback)
        };
        let Some(callback) = callback else { return };
        metrics::error_recorded();
        warn!("subscription timed out: id={id}");
        invoke(
            &callback,
            EventPayload::from_errors(vec![ProtocolError::new(SUBSCRIPTION_TIMEOUT_ERROR)]),
        );
    }

    /// Drain the outbound queue while the connection is `Ready`.
    async fn flush(&mut self, transport: &mut C::Transport) -> Result<(), ()> {
        loop {
            let message = {
                let mut core = lock_core(&self.core);
                if core.state != ClientState::Ready {
                    return Ok(());
                }
                core.queue.pop()
            };
            let Some(message) = message else {
                return Ok(());
            };
            self.send(transport, message).await?;
        }
    }

    async fn send(&mut self, transport: &mut C::Transport, message: Message) -> Result<(), ()> {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                metrics::error_recorded();
                error!("failed to encode {}: {err}", message.kind());
                return Ok(());
            }
        };
        match transport.send(frame).await {
            Ok(()) => {
                metrics::frame_processed(Direction::Outbound);
                Ok(())
            }
            Err(err) => {
                warn!("transport send failed: {err}");
                Err(())
            }
        }
    }

    fn arm_new_timeouts(&mut self) {
        let pending: Vec<SubscriptionId> = {
            let mut core = lock_core(&self.core);
            core.newly_pending.drain(..).collect()
        };
        for id in pending {
            self.arm_timeout(&id);
        }
    }

    fn arm_timeout(&mut self, id: &SubscriptionId) {
        let Some(window) = self.config.timeout else {
            return;
        };
        if self.timeout_keys.contains_key(id) {
            return;
        }
        let key = self.timeouts.insert(id.clone(), window);
        self.timeout_keys.insert(id.clone(), key);
    }

    fn cancel_timeout(&mut self, id: &SubscriptionId) {
        if let Some(key) = self.timeout_keys.remove(id) {
            self.timeouts.try_remove(&key);
        }
    }

    fn opened(&mut self) {
        {
            let mut core = lock_core(&self.core);
            core.state = ClientState::AwaitingAck;
            core.keepalives_seen = 0;
        }
        if self.connected_once {
            info!("transport reopened");
            self.observers.reconnect.notify();
        } else {
            info!("transport opened");
            self.connected_once = true;
            self.observers.connect.notify();
        }
    }

    /// Fully retire a lost connection before a new one is attempted.
    fn retire(&mut self) {
        self.timeouts.clear();
        self.timeout_keys.clear();
        self.resubscribe = true;
        let mut core = lock_core(&self.core);
        core.state = ClientState::Connecting;
        core.queue.clear();
        core.newly_pending.clear();
    }

    /// Wait out the backoff before the next attempt. Returns `false` when
    /// no further attempt should be made.
    async fn retry(&mut self, attempt: &mut u32) -> bool {
        if !self.config.reconnect {
            return false;
        }
        *attempt += 1;
        if *attempt as usize > self.config.reconnection_attempts {
            warn!("reconnection attempts exhausted");
            return false;
        }
        let delay = self.backoff.delay(*attempt);
        debug!(attempt = *attempt, ?delay, "waiting before reconnect");
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn emit(&mut self, outcome: Result<(), ClientError>) {
        if let Some(callback) = self.callback.as_mut() {
            callback(outcome);
        }
    }

    /// Transition to the permanent `Closed` state.
    fn finish(&mut self) {
        self.timeouts.clear();
        self.timeout_keys.clear();
        let mut core = lock_core(&self.core);
        core.state = ClientState::Closed;
        core.closed = true;
        core.queue.clear();
        core.subscriptions.clear();
        drop(core);
        info!("client closed");
    }
}

fn invoke(callback: &Arc<Mutex<ResultCallback>>, payload: EventPayload) {
    let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
    callback(payload);
}

async fn next_expired(queue: &mut DelayQueue<SubscriptionId>) -> Option<SubscriptionId> {
    futures::future::poll_fn(|cx| queue.poll_expired(cx))
        .await
        .map(delay_queue::Expired::into_inner)
}

//! Registry of live server sessions.
//!
//! [`SessionRegistry`] stores non-owning weak references to per-session
//! controls, letting maintenance tasks cancel live sessions without keeping
//! dead ones alive. Entries for dropped sessions are removed lazily at
//! lookup time or in bulk via [`SessionRegistry::prune`].

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Identifier assigned to an accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// The raw identifier value.
    #[must_use]
    pub const fn as_u64(self) -> u64 { self.0 }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Cancellation control owned by one live session.
#[derive(Debug, Default)]
pub struct SessionControl {
    cancel: CancellationToken,
}

impl SessionControl {
    pub(crate) fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Request the owning session to stop.
    pub fn cancel(&self) { self.cancel.cancel(); }

    pub(crate) fn token(&self) -> CancellationToken { self.cancel.clone() }
}

/// Concurrent registry of session controls keyed by [`ConnectionId`].
#[derive(Debug, Default)]
pub struct SessionRegistry(DashMap<ConnectionId, Weak<SessionControl>>);

impl SessionRegistry {
    /// Fetch a live session control, removing the entry if the session has
    /// already terminated.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<SessionControl>> {
        let control = self.0.get(id).and_then(|weak| weak.upgrade());
        if control.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        control
    }

    pub(crate) fn insert(&self, id: ConnectionId, control: &Arc<SessionControl>) {
        self.0.insert(id, Arc::downgrade(control));
    }

    pub(crate) fn remove(&self, id: &ConnectionId) { self.0.remove(id); }

    /// Remove entries whose sessions have terminated.
    pub fn prune(&self) { self.0.retain(|_, weak| weak.strong_count() > 0); }

    /// Ids of sessions still alive at the time of the call.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        self.0
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Cancel one live session. Returns whether it was found.
    pub fn end(&self, id: &ConnectionId) -> bool {
        self.get(id).map(|control| control.cancel()).is_some()
    }

    /// Cancel every live session.
    pub fn shutdown_all(&self) {
        for entry in &self.0 {
            if let Some(control) = entry.value().upgrade() {
                control.cancel();
            }
        }
    }
}

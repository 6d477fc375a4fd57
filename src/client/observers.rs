//! Observer registration for connection lifecycle transitions.
//!
//! Listeners are registered explicitly and removed through the returned
//! [`ListenerGuard`]; there is no broadcast bus. They run synchronously in
//! the runtime task at the owning transition, without any internal lock
//! held, so a listener may re-enter the client.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

type Listener = Arc<dyn Fn() + Send + Sync + 'static>;
type Slots = Mutex<HashMap<u64, Listener>>;

/// Handle to one registered listener.
///
/// Dropping the guard without calling [`unregister`](Self::unregister)
/// leaves the listener registered for the client's lifetime.
#[must_use = "dropping the guard does not unregister the listener"]
pub struct ListenerGuard {
    slot: u64,
    slots: Weak<Slots>,
}

impl ListenerGuard {
    /// Remove the listener.
    pub fn unregister(self) {
        if let Some(slots) = self.slots.upgrade() {
            slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.slot);
        }
    }
}

/// One set of listeners for a single lifecycle transition.
#[derive(Default)]
pub(crate) struct ListenerSet {
    slots: Arc<Slots>,
    next: AtomicU64,
}

impl ListenerSet {
    pub(crate) fn register(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerGuard {
        let slot = self.next.fetch_add(1, Ordering::Relaxed);
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot, Arc::new(listener));
        ListenerGuard {
            slot,
            slots: Arc::downgrade(&self.slots),
        }
    }

    pub(crate) fn notify(&self) {
        let listeners: Vec<Listener> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

/// Listener sets for every client lifecycle transition.
#[derive(Default)]
pub(crate) struct Observers {
    pub(crate) connect: ListenerSet,
    pub(crate) disconnect: ListenerSet,
    pub(crate) reconnect: ListenerSet,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn notify_runs_each_registered_listener() {
        let set = ListenerSet::default();
        let count = Arc::new(AtomicUsize::new(0));
        let first = set.register({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });
        let _second = set.register({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });

        set.notify();
        assert_eq!(count.load(Ordering::Relaxed), 2);

        first.unregister();
        set.notify();
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn dropped_guard_keeps_listener_registered() {
        let set = ListenerSet::default();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            let _ = set.register(move || {
                count.fetch_add(1, Ordering::Relaxed);
            });
        }
        set.notify();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}

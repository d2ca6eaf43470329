//! # Subscription Registry
//!
//! Fan-out of session notifications to observers.
//!
//! `notify()` copies the observer list for the session before calling
//! anyone, so observers may subscribe or unsubscribe from inside a callback
//! without disturbing the dispatch in progress. Changes apply from the next
//! dispatch on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::core::state::SessionSnapshot;
use crate::core::types::{SessionId, StreamEvent};

/// What observers receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A classified stream event, in receipt order.
    Event(StreamEvent),
    /// Session state after a mutation.
    Snapshot(SessionSnapshot),
}

pub type Observer = Arc<dyn Fn(&Notification) + Send + Sync>;

type ObserverMap = HashMap<SessionId, Vec<(u64, Observer)>>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    observers: ObserverMap,
}

#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<Inner>>,
}

/// Handle returned by [`SubscriptionRegistry::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    session_id: SessionId,
    id: u64,
    registry: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Remove this observer. Idempotent, and harmless after the registry is gone.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.registry.upgrade() {
            let mut inner = lock(&inner);
            if let Some(list) = inner.observers.get_mut(&self.session_id) {
                list.retain(|(id, _)| *id != self.id);
                if list.is_empty() {
                    inner.observers.remove(&self.session_id);
                }
            }
        }
    }
}

/// Observers run outside the lock, so a poisoned lock only means an
/// observer panicked mid-`subscribe`; the map itself is still consistent.
fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, session_id: &SessionId, observer: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .observers
            .entry(session_id.clone())
            .or_default()
            .push((id, Arc::new(observer)));
        log::debug!("Observer {} subscribed to session {}", id, session_id);

        Subscription {
            session_id: session_id.clone(),
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `notification` to every observer subscribed when the call
    /// starts, in subscription order.
    pub fn notify(&self, session_id: &SessionId, notification: &Notification) {
        let snapshot: Vec<Observer> = lock(&self.inner)
            .observers
            .get(session_id)
            .map(|list| list.iter().map(|(_, o)| Arc::clone(o)).collect())
            .unwrap_or_default();

        for observer in snapshot {
            observer(notification);
        }
    }

    pub fn observer_count(&self, session_id: &SessionId) -> usize {
        lock(&self.inner)
            .observers
            .get(session_id)
            .map_or(0, Vec::len)
    }

    /// Drop every observer of a session. Used on teardown.
    pub fn clear(&self, session_id: &SessionId) {
        if let Some(list) = lock(&self.inner).observers.remove(session_id) {
            log::debug!("Cleared {} observers of session {}", list.len(), session_id);
        }
    }
}

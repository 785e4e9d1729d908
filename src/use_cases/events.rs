// Typed publish/subscribe hubs with explicit unsubscribe handles.

use crate::domain::{Activity, ConnectionStatus, Participant, Summary};
use crate::use_cases::{ServerRejection, SessionEnded, SessionStarted};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Handler<T> = dyn Fn(&T) + Send + Sync;

// Handlers run outside the lock, so a poisoned mutex only means a handler panicked mid-dispatch.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Slot<T> {
    id: u64,
    active: AtomicBool,
    handler: Box<Handler<T>>,
}

struct Listeners<T> {
    slots: HashMap<u64, Arc<Slot<T>>>,
    next_id: u64,
}

/// Handlers for one event type, invoked in registration order.
///
/// Subscribing and unsubscribing are safe from inside a handler: a handler added during a
/// dispatch first runs on the next one, and a removed handler is skipped for the rest of the pass.
pub struct EventHub<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T: 'static> EventHub<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                slots: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let slot = {
            let mut listeners = lock(&self.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            let slot = Arc::new(Slot {
                id,
                active: AtomicBool::new(true),
                handler: Box::new(handler),
            });
            listeners.slots.insert(id, Arc::clone(&slot));
            slot
        };

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            slot.active.store(false, Ordering::Release);
            if let Some(listeners) = listeners.upgrade() {
                lock(&listeners).slots.remove(&slot.id);
            }
        })
    }

    pub fn dispatch(&self, event: &T) {
        // Snapshot so handlers can (un)subscribe without deadlocking.
        let mut slots: Vec<Arc<Slot<T>>> = lock(&self.listeners).slots.values().cloned().collect();
        slots.sort_unstable_by_key(|slot| slot.id);

        for slot in slots {
            if slot.active.load(Ordering::Acquire) {
                (slot.handler)(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

/// Removes its handler when dropped or when [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription removes its handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// One hub per domain event a session client emits.
#[derive(Clone, Default)]
pub struct SessionEvents {
    pub roster: EventHub<Vec<Participant>>,
    pub started: EventHub<SessionStarted>,
    pub activity: EventHub<Activity>,
    pub ended: EventHub<SessionEnded>,
    pub summary: EventHub<Vec<Summary>>,
    pub rejected: EventHub<ServerRejection>,
    pub status: EventHub<ConnectionStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn recorded(calls: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        calls.lock().expect("calls mutex poisoned").clone()
    }

    #[test]
    fn when_event_is_dispatched_then_handlers_run_in_registration_order() {
        let hub = EventHub::<u32>::new();
        let calls = recorder();

        let _subs: Vec<Subscription> = ["first", "second", "third"]
            .into_iter()
            .map(|name| {
                let calls = Arc::clone(&calls);
                hub.subscribe(move |value| {
                    calls
                        .lock()
                        .expect("calls mutex poisoned")
                        .push(format!("{name}:{value}"));
                })
            })
            .collect();

        hub.dispatch(&7);

        assert_eq!(recorded(&calls), ["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn when_subscription_is_dropped_then_handler_is_not_invoked() {
        let hub = EventHub::<u32>::new();
        let calls = recorder();

        let sub = {
            let calls = Arc::clone(&calls);
            hub.subscribe(move |_| calls.lock().expect("calls mutex poisoned").push("x".into()))
        };
        hub.dispatch(&1);
        drop(sub);
        hub.dispatch(&2);

        assert_eq!(recorded(&calls).len(), 1);
        assert!(hub.is_empty());
    }

    #[test]
    fn when_handler_subscribes_during_dispatch_then_new_handler_waits_for_next_event() {
        let hub = EventHub::<u32>::new();
        let calls = recorder();
        let late: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let _first = {
            let inner_hub = hub.clone();
            let calls = Arc::clone(&calls);
            let late = Arc::clone(&late);
            hub.subscribe(move |_| {
                calls
                    .lock()
                    .expect("calls mutex poisoned")
                    .push("first".into());
                let mut late = late.lock().expect("late mutex poisoned");
                if late.is_none() {
                    let calls = Arc::clone(&calls);
                    *late = Some(inner_hub.subscribe(move |_| {
                        calls
                            .lock()
                            .expect("calls mutex poisoned")
                            .push("late".into());
                    }));
                }
            })
        };

        hub.dispatch(&1);
        assert_eq!(recorded(&calls), ["first"]);

        hub.dispatch(&2);
        assert_eq!(recorded(&calls), ["first", "first", "late"]);
    }

    #[test]
    fn when_handler_unsubscribes_a_later_handler_then_it_is_skipped_without_panicking() {
        let hub = EventHub::<u32>::new();
        let calls = recorder();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let _killer = {
            let victim = Arc::clone(&victim);
            hub.subscribe(move |_| {
                if let Some(sub) = victim.lock().expect("victim mutex poisoned").take() {
                    sub.unsubscribe();
                }
            })
        };
        let sub = {
            let calls = Arc::clone(&calls);
            hub.subscribe(move |_| {
                calls
                    .lock()
                    .expect("calls mutex poisoned")
                    .push("victim".into());
            })
        };
        *victim.lock().expect("victim mutex poisoned") = Some(sub);

        hub.dispatch(&1);

        assert!(recorded(&calls).is_empty());
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn when_hub_is_gone_then_dropping_subscription_is_harmless() {
        let hub = EventHub::<u32>::new();
        let sub = hub.subscribe(|_| {});
        drop(hub);
        drop(sub);
    }
}

//! Event bus: type-keyed publish/subscribe with synchronous, ordered delivery.
//!
//! Subscribers are keyed by [`Event::KEY`], a stable token chosen by the event
//! type itself, and receive events of exactly that type. Delivery happens on
//! the emitting thread, in subscription order, with a mutable reference, so a
//! subscriber sees the edits made by the ones before it.
//!
//! Keys are copied into the bus. An extension library's string constants go
//! away when the library is closed; the bus may outlive them.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use talon_core::guard::isolate;
use talon_core::types::SubscriptionId;

/// A type that can travel over the [`EventBus`].
pub trait Event: Any {
    /// Stable key identifying this event type. Must be unique per type.
    const KEY: &'static str;
}

/// Type-erased subscriber. Returns `false` when the event is not of the
/// type it was subscribed for.
pub(crate) type ErasedCallback = Rc<dyn Fn(&mut dyn Any) -> bool>;

struct Subscription {
    id: SubscriptionId,
    callback: ErasedCallback,
}

/// Synchronous event bus for the host's execution context.
#[derive(Default)]
pub struct EventBus {
    /// Event key → subscribers in subscription order.
    subscribers: RefCell<HashMap<String, Vec<Subscription>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `callback` to events of type `E`.
    pub fn subscribe<E, F>(&self, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&mut E) + 'static,
    {
        self.subscribe_erased(E::KEY, erase::<E, F>(callback))
    }

    pub(crate) fn subscribe_erased(&self, key: &str, callback: ErasedCallback) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.subscribers
            .borrow_mut()
            .entry(key.to_string())
            .or_default()
            .push(Subscription { id, callback });
        debug!(event = key, subscription_id = %id, "Subscribed");
        id
    }

    /// Removes subscription `id` from the subscribers of `E`.
    ///
    /// Returns whether it was present; an absent id is a no-op.
    pub fn unsubscribe<E: Event>(&self, id: SubscriptionId) -> bool {
        self.unsubscribe_erased(E::KEY, id)
    }

    pub(crate) fn unsubscribe_erased(&self, key: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let Some(list) = subscribers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(key);
        }
        removed
    }

    /// Removes subscription `id` whatever its event type.
    pub fn remove_subscription(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let Some(key) = subscribers
            .iter()
            .find(|(_, list)| list.iter().any(|s| s.id == id))
            .map(|(key, _)| key.clone())
        else {
            return false;
        };

        if let Some(list) = subscribers.get_mut(&key) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(&key);
            }
        }
        true
    }

    /// Delivers `event` to every subscriber of `E`, returning how many ran.
    ///
    /// A panicking subscriber is logged and skipped. Subscribers added or
    /// removed during delivery take effect from the next emit.
    pub fn emit<E: Event>(&self, event: &mut E) -> usize {
        self.emit_erased(E::KEY, event)
    }

    pub(crate) fn emit_erased(&self, key: &str, event: &mut dyn Any) -> usize {
        let snapshot: Vec<(SubscriptionId, ErasedCallback)> = self
            .subscribers
            .borrow()
            .get(key)
            .map(|list| list.iter().map(|s| (s.id, s.callback.clone())).collect())
            .unwrap_or_default();

        for (id, callback) in &snapshot {
            match isolate(|| callback(&mut *event)) {
                Ok(true) => {}
                Ok(false) => warn!(event = key, subscription_id = %id, "Event key shared by two types"),
                Err(panic) => warn!(
                    event = key,
                    subscription_id = %id,
                    panic = %panic,
                    "Event subscriber panicked"
                ),
            }
        }
        snapshot.len()
    }

    /// Drops every subscription for every event type.
    pub fn clear(&self) {
        self.subscribers.borrow_mut().clear();
    }

    /// Number of subscribers of `E`.
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.subscribers.borrow().get(E::KEY).map_or(0, Vec::len)
    }

    /// Number of subscriptions across all event types.
    pub fn total_subscriptions(&self) -> usize {
        self.subscribers.borrow().values().map(Vec::len).sum()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.subscribers.borrow();
        let mut counts: Vec<(&str, usize)> = subscribers.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        counts.sort();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

/// Wraps a typed subscriber for storage on the bus.
pub(crate) fn erase<E, F>(callback: F) -> ErasedCallback
where
    E: Event,
    F: Fn(&mut E) + 'static,
{
    Rc::new(move |event: &mut dyn Any| match event.downcast_mut::<E>() {
        Some(event) => {
            callback(event);
            true
        }
        None => false,
    })
}

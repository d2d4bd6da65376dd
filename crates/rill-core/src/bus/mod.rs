//! # Event Bus
//!
//! The keyed-dispatch surface over the selector registry: handlers register
//! under selectors, and notifications routed by key fan out to every match
//! through a [`Dispatcher`]. Handler execution is never serialized by the
//! registry — routing takes the cache locks, invocation does not.
//!
//! Two handler shapes exist: consumers (fire-and-forget) and responders,
//! whose computed replies [`send`](EventBus::send) forwards to a reply key.

mod filter;

pub use filter::{FirstMatch, Passthrough, RoundRobin, RouteFilter, Traced};

use std::hash::Hash;
use std::sync::Arc;

use crate::dispatch::{Dispatcher, Task};
use crate::registry::{CachingRegistry, Key, Registration, Selector};

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

type ConsumeFn<E> = Arc<dyn Fn(&E) + Send + Sync>;
type RespondFn<E> = Arc<dyn Fn(&E) -> E + Send + Sync>;

/// A registered event handler.
pub enum Handler<E> {
    /// Receives the event; produces nothing.
    Consume(ConsumeFn<E>),
    /// Receives the event and produces a reply, forwarded by
    /// [`EventBus::send`] when a reply key is given.
    Respond(RespondFn<E>),
}

impl<E> Clone for Handler<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Consume(f) => Self::Consume(Arc::clone(f)),
            Self::Respond(f) => Self::Respond(Arc::clone(f)),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Bus registration handle type.
pub type BusRegistration<K, E> = Arc<Registration<K, Handler<E>>>;

struct BusInner<K, E> {
    registry: CachingRegistry<K, Handler<E>>,
    dispatcher: Arc<dyn Dispatcher>,
    filter: Box<dyn RouteFilter<BusRegistration<K, E>>>,
}

/// Keyed notification dispatch over a [`CachingRegistry`].
///
/// Cheaply cloneable; clones share the registry and dispatcher.
pub struct EventBus<K, E> {
    inner: Arc<BusInner<K, E>>,
}

impl<K, E> Clone for EventBus<K, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, E> EventBus<K, E>
where
    K: PartialEq + Hash + Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a bus that broadcasts to every match.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_filter(dispatcher, Passthrough)
    }

    /// Creates a bus with a custom routing filter.
    #[must_use]
    pub fn with_filter(
        dispatcher: Arc<dyn Dispatcher>,
        filter: impl RouteFilter<BusRegistration<K, E>> + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: CachingRegistry::new(),
                dispatcher,
                filter: Box::new(filter),
            }),
        }
    }

    /// Registers a consumer to be triggered when a notification matches the
    /// selector.
    pub fn on(
        &self,
        selector: Selector<K>,
        consumer: impl Fn(&E) + Send + Sync + 'static,
    ) -> BusRegistration<K, E> {
        self.inner
            .registry
            .register(selector, Handler::Consume(Arc::new(consumer)))
    }

    /// Registers a responder producing a reply per matched notification.
    pub fn receive(
        &self,
        selector: Selector<K>,
        responder: impl Fn(&E) -> E + Send + Sync + 'static,
    ) -> BusRegistration<K, E> {
        self.inner
            .registry
            .register(selector, Handler::Respond(Arc::new(responder)))
    }

    /// Returns `true` if any live registration matches `key`.
    #[must_use]
    pub fn responds_to(&self, key: &Key<K>) -> bool {
        self.inner
            .registry
            .select(key)
            .iter()
            .any(|r| r.handler().is_some())
    }

    /// Routes `event` to every handler matching `key`.
    ///
    /// Responder replies are computed and discarded; use
    /// [`send`](Self::send) to forward them.
    pub fn notify(&self, key: &Key<K>, event: &E) {
        Self::route(&self.inner, key, event, None);
    }

    /// Routes `event` to every handler matching `key`, forwarding each
    /// responder's reply to `reply_to` as a fresh notification.
    pub fn send(&self, key: &Key<K>, event: &E, reply_to: Option<Key<K>>) {
        Self::route(&self.inner, key, event, reply_to);
    }

    /// Cancels every registration and empties the routing caches.
    pub fn clear(&self) {
        self.inner.registry.clear();
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &CachingRegistry<K, Handler<E>> {
        &self.inner.registry
    }

    fn route(inner: &Arc<BusInner<K, E>>, key: &Key<K>, event: &E, reply_to: Option<Key<K>>) {
        let matches = inner.registry.select(key);
        let routed = inner
            .filter
            .filter(matches.into_vec(), &key.hash_code());

        for registration in routed {
            let Some(handler) = registration.handler().cloned() else {
                continue;
            };
            let event = event.clone();

            // Invocation happens on the dispatcher, outside every registry
            // lock. Tasks hold the bus only weakly so a queued reply can
            // never keep the dispatcher alive from its own queue.
            let task: Task = match handler {
                Handler::Consume(consume) => Box::new(move || consume(&event)),
                Handler::Respond(respond) => {
                    let reply_to = reply_to.clone();
                    let bus = Arc::downgrade(inner);
                    Box::new(move || {
                        let reply = respond(&event);
                        if let (Some(reply_key), Some(bus)) = (reply_to, bus.upgrade()) {
                            Self::route(&bus, &reply_key, &reply, None);
                        }
                    })
                }
            };
            inner.dispatcher.schedule(task);

            if registration.is_cancel_after_use() {
                registration.cancel();
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{InlineDispatcher, ThreadDispatcher};
    use parking_lot::Mutex;

    type Bus = EventBus<String, u64>;

    fn inline_bus() -> Bus {
        EventBus::new(Arc::new(InlineDispatcher))
    }

    fn value_key(k: &str) -> Key<String> {
        Key::Value(k.to_string())
    }

    // --- notify tests ---

    #[test]
    fn test_notify_routes_to_matching_consumers() {
        let bus = inline_bus();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.on(Selector::eq("orders".to_string()), move |e| {
            sink.lock().push(*e);
        });
        let sink = Arc::clone(&seen);
        bus.on(Selector::eq("trades".to_string()), move |e| {
            sink.lock().push(e + 1000);
        });

        bus.notify(&value_key("orders"), &1);
        bus.notify(&value_key("trades"), &2);
        bus.notify(&value_key("absent"), &3);

        assert_eq!(*seen.lock(), vec![1, 1002]);
    }

    #[test]
    fn test_notify_skips_paused_and_cancelled() {
        let bus = inline_bus();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let registration = bus.on(Selector::eq("k".to_string()), move |e| {
            sink.lock().push(*e);
        });

        bus.notify(&value_key("k"), &1);
        registration.pause();
        bus.notify(&value_key("k"), &2);
        registration.resume();
        bus.notify(&value_key("k"), &3);
        registration.cancel();
        bus.notify(&value_key("k"), &4);

        assert_eq!(*seen.lock(), vec![1, 3]);
    }

    #[test]
    fn test_cancel_after_use_fires_once() {
        let bus = inline_bus();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let registration = bus.on(Selector::eq("k".to_string()), move |e| {
            sink.lock().push(*e);
        });
        registration.cancel_after_use();

        bus.notify(&value_key("k"), &1);
        bus.notify(&value_key("k"), &2);

        assert_eq!(*seen.lock(), vec![1]);
        assert!(registration.is_cancelled());
    }

    // --- send / reply tests ---

    #[test]
    fn test_send_forwards_reply() {
        let bus = inline_bus();
        let replies: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        bus.receive(Selector::eq("compute".to_string()), |e| e * 2);

        let sink = Arc::clone(&replies);
        bus.on(Selector::eq("answers".to_string()), move |e| {
            sink.lock().push(*e);
        });

        bus.send(&value_key("compute"), &21, Some(value_key("answers")));
        assert_eq!(*replies.lock(), vec![42]);
    }

    #[test]
    fn test_notify_discards_responder_reply() {
        let bus = inline_bus();
        let invoked: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));

        let count = Arc::clone(&invoked);
        bus.receive(Selector::eq("compute".to_string()), move |e| {
            *count.lock() += 1;
            e * 2
        });

        bus.notify(&value_key("compute"), &21);
        assert_eq!(*invoked.lock(), 1);
    }

    // --- responds_to tests ---

    #[test]
    fn test_responds_to() {
        let bus = inline_bus();
        assert!(!bus.responds_to(&value_key("k")));

        let registration = bus.on(Selector::eq("k".to_string()), |_| {});
        assert!(bus.responds_to(&value_key("k")));

        registration.cancel();
        assert!(!bus.responds_to(&value_key("k")));
    }

    // --- anonymous routing tests ---

    #[test]
    fn test_anonymous_reply_routing() {
        let bus = inline_bus();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        let (selector, token) = Selector::anonymous();
        let sink = Arc::clone(&seen);
        bus.on(selector, move |e| {
            sink.lock().push(*e);
        });

        bus.notify(&Key::Anonymous(token), &7);
        assert_eq!(*seen.lock(), vec![7]);
    }

    // --- filter tests ---

    #[test]
    fn test_round_robin_bus_distributes() {
        let bus: Bus = EventBus::with_filter(Arc::new(InlineDispatcher), RoundRobin::new());
        let first: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let second: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));

        let count = Arc::clone(&first);
        bus.on(Selector::eq("k".to_string()), move |_| *count.lock() += 1);
        let count = Arc::clone(&second);
        bus.on(Selector::eq("k".to_string()), move |_| *count.lock() += 1);

        for _ in 0..6 {
            bus.notify(&value_key("k"), &0);
        }

        assert_eq!(*first.lock(), 3);
        assert_eq!(*second.lock(), 3);
    }

    // --- dispatcher decoupling tests ---

    #[test]
    fn test_thread_dispatcher_delivery() {
        let dispatcher = Arc::new(ThreadDispatcher::new("bus"));
        let bus: Bus = EventBus::new(dispatcher.clone());
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.on(Selector::eq("k".to_string()), move |e| {
            sink.lock().push(*e);
        });

        for i in 0..10 {
            bus.notify(&value_key("k"), &i);
        }
        drop(bus);
        drop(dispatcher); // joins the worker after the queue drains

        assert_eq!(*seen.lock(), (0..10).collect::<Vec<u64>>());
    }

    // --- clear tests ---

    #[test]
    fn test_clear_silences_bus() {
        let bus = inline_bus();
        let seen: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));

        let count = Arc::clone(&seen);
        bus.on(Selector::eq("k".to_string()), move |_| *count.lock() += 1);

        bus.notify(&value_key("k"), &0);
        bus.clear();
        bus.notify(&value_key("k"), &0);

        assert_eq!(*seen.lock(), 1);
    }
}

//! EventBus - signal-keyed subscriber registry
//!
//! Subscribers are called synchronously, in registration order, after the
//! emitter has released its own locks. A subscriber may therefore call back
//! into the graph or the view that notified it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use super::kind::{EventKind, Signal};
use super::log::EventLog;

/// Receiver of events
///
/// Implemented for closures and for `EventLog`.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &EventKind);
}

impl<F> EventSink for F
where
    F: Fn(&EventKind) + Send + Sync,
{
    fn deliver(&self, event: &EventKind) {
        self(event)
    }
}

impl EventSink for EventLog {
    fn deliver(&self, event: &EventKind) {
        self.record(event.clone());
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn deliver(&self, _event: &EventKind) {}
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    /// `None` receives every signal
    signal: Option<Signal>,
    sink: Arc<dyn EventSink>,
}

pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    isolate_panics: bool,
}

impl EventBus {
    pub fn new(isolate_panics: bool) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            isolate_panics,
        }
    }

    pub fn subscribe(&self, signal: Signal, sink: impl EventSink + 'static) -> SubscriptionId {
        self.insert(Some(signal), Arc::new(sink))
    }

    /// Receive every signal through one sink
    pub fn subscribe_all(&self, sink: impl EventSink + 'static) -> SubscriptionId {
        self.insert(None, Arc::new(sink))
    }

    fn insert(&self, signal: Option<Signal>, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber { id, signal, sink });
        id
    }

    /// Returns false if the id was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver one event to every matching subscriber
    pub fn publish(&self, event: &EventKind) {
        let signal = event.signal();
        // Snapshot so a subscriber can (un)subscribe while being notified
        let sinks: Vec<Arc<dyn EventSink>> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.signal.map_or(true, |wanted| wanted == signal))
            .map(|s| Arc::clone(&s.sink))
            .collect();

        trace!(signal = %signal, node_id = event.node_id(), subscribers = sinks.len(), "publish");

        for sink in sinks {
            if self.isolate_panics {
                let outcome = catch_unwind(AssertUnwindSafe(|| sink.deliver(event)));
                if outcome.is_err() {
                    error!(signal = %signal, node_id = event.node_id(), "subscriber panicked");
                }
            } else {
                sink.deliver(event);
            }
        }
    }

    pub fn publish_all(&self, events: &[EventKind]) {
        for event in events {
            self.publish(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("isolate_panics", &self.isolate_panics)
            .finish()
    }
}

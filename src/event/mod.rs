//! Event Module - notifications from the registry and from views
//!
//! Key types:
//! - `EventKind`: raw node events and per-occurrence view events
//! - `Signal`: subscription key (`"node-added"`, `"node-added-inview"`, ...)
//! - `EventBus`: synchronous, ordered delivery with panic isolation
//! - `EventSink`: trait seam for subscribers (closures, `EventLog`)
//! - `EventLog`: thread-safe recording subscriber

mod bus;
mod kind;
mod log;

pub use bus::{EventBus, EventSink, NoopSink, SubscriptionId};
pub use kind::{EventKind, Signal};
pub use log::{Event, EventLog};

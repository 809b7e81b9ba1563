//! View Module - consumer-facing trees over a registry
//!
//! - `FilteredProjection`: filtered, ordered tree kept in sync with the
//!   registry, publishing per-occurrence `*-inview` events
//! - `ViewHandle`: uniform surface over a static or filtered view
//! - `ViewCount`: live node count under a set of filters

mod count;
mod handle;
mod projection;

pub use count::{CallbackId, ViewCount};
pub use handle::{ViewHandle, ViewMode};
pub use projection::{AppliedFilter, Comparator, FilteredProjection};

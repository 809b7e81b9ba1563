//! Utilities Module - shared infrastructure
//!
//! - `intern`: id interning (Arc<str> deduplication), owned per registry

mod intern;

pub use intern::Interner;

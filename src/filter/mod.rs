//! Filter Module - named predicates over nodes
//!
//! - `FilterBank`: registry of filters, one per graph
//! - `FilterRef`: a resolved filter (with `!name` negation applied)
//! - `FilterParams`: JSON parameters with the reserved `negate`/`flat`/`transparent` keys

mod bank;

pub use bank::{
    Filter, FilterBank, FilterParams, FilterRef, Predicate, FLAT, NEGATE, NEGATION_PREFIX,
    TRANSPARENT,
};

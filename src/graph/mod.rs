//! Graph Module - canonical node storage
//!
//! - `node`: `Node<T>`, `NodeView`, `Priority`
//! - `path`: `NodePath`, the positional identity of one node occurrence
//! - `registry`: `NodeRegistry<T>`, owner of all nodes and of the DAG invariant

mod node;
mod path;
mod registry;

use std::sync::Arc;

use smallvec::SmallVec;

/// Node identifier (interned per registry, O(1) clone)
pub type NodeId = Arc<str>;

/// Stack-allocated adjacency: most nodes have 0-4 parents or children
pub type AdjVec = SmallVec<[NodeId; 4]>;

pub use node::{Node, NodeView, Priority};
pub use path::NodePath;
pub use registry::NodeRegistry;

pub(crate) use registry::GraphState;

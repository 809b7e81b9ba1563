//! Arbor - a DAG of nodes with live, filtered tree views
//!
//! A `NodeRegistry` holds nodes and their parent/child relationships (any
//! number of parents, never a cycle). Views project the graph as a tree:
//! a node with several displayed parents appears once per parent, each
//! occurrence addressed by its root-to-node `NodePath`.
//!
//! ```text
//! NodeRegistry ──node-added / -modified / -deleted──▶ FilteredProjection
//!      ▲                                                   │
//!      │ move_node / add_parent                            │ node-*-inview
//!      └──────────────── ViewHandle ◀─────────────────────┘
//! ```
//!
//! ```rust
//! use arbor::{Arbor, Node, Priority};
//!
//! let arbor: Arbor<u32> = Arbor::new();
//! arbor.register_filter_fn("even", |n| n.data() % 2 == 0).unwrap();
//! arbor.add_node(Node::new("a", 1), None, Priority::Low).unwrap();
//! arbor.add_node(Node::new("b", 2), Some("a"), Priority::Low).unwrap();
//!
//! let view = arbor.view(Some("evens"), true);
//! view.apply_filter("even", None, false, true).unwrap();
//! assert!(!view.is_displayed("a"));
//! assert_eq!(view.paths_for_node("b")[0].to_string(), "(b)");
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod graph;
pub mod tree;
pub mod util;
pub mod view;

pub use config::ArborConfig;
pub use error::{ArborError, FixSuggestion, Result};
pub use event::{Event, EventBus, EventKind, EventLog, EventSink, Signal, SubscriptionId};
pub use filter::{FilterBank, FilterParams};
pub use graph::{Node, NodeId, NodePath, NodeRegistry, NodeView, Priority};
pub use tree::Arbor;
pub use view::{FilteredProjection, ViewCount, ViewHandle, ViewMode};

//! Event kinds and signal names
//!
//! Raw events come from the registry and speak about nodes.
//! View events come from a projection and speak about node occurrences,
//! so they carry the path of the occurrence as well.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};
use crate::graph::{NodeId, NodePath, Priority};

/// Subscription key: one signal per event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    NodeAdded,
    NodeDeleted,
    NodeModified,
    NodeAddedInview,
    NodeDeletedInview,
    NodeModifiedInview,
    NodeChildrenReordered,
}

impl Signal {
    pub const ALL: [Signal; 7] = [
        Signal::NodeAdded,
        Signal::NodeDeleted,
        Signal::NodeModified,
        Signal::NodeAddedInview,
        Signal::NodeDeletedInview,
        Signal::NodeModifiedInview,
        Signal::NodeChildrenReordered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::NodeAdded => "node-added",
            Signal::NodeDeleted => "node-deleted",
            Signal::NodeModified => "node-modified",
            Signal::NodeAddedInview => "node-added-inview",
            Signal::NodeDeletedInview => "node-deleted-inview",
            Signal::NodeModifiedInview => "node-modified-inview",
            Signal::NodeChildrenReordered => "node-children-reordered",
        }
    }

    /// Signals emitted by projections rather than the registry
    pub fn is_view_signal(&self) -> bool {
        matches!(
            self,
            Signal::NodeAddedInview
                | Signal::NodeDeletedInview
                | Signal::NodeModifiedInview
                | Signal::NodeChildrenReordered
        )
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        Signal::ALL
            .into_iter()
            .find(|signal| signal.as_str() == s)
            .ok_or_else(|| ArborError::InvalidState {
                reason: format!("unknown signal '{}'", s),
            })
    }
}

/// Everything a subscriber can be told about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RAW (registry)
    // ═══════════════════════════════════════════
    NodeAdded {
        node_id: NodeId,
        priority: Priority,
    },
    NodeDeleted {
        node_id: NodeId,
    },
    NodeModified {
        node_id: NodeId,
        priority: Priority,
    },

    // ═══════════════════════════════════════════
    // VIEW (projection)
    // ═══════════════════════════════════════════
    AddedInView {
        node_id: NodeId,
        path: NodePath,
    },
    DeletedInView {
        node_id: NodeId,
        path: NodePath,
    },
    ModifiedInView {
        node_id: NodeId,
        path: NodePath,
    },
    /// Children of `node_id` changed order. `new_order[i]` is the former
    /// index of the child now at position `i`. The registry emits it with
    /// no path; views emit it once per occurrence of the parent.
    ChildrenReordered {
        node_id: NodeId,
        path: Option<NodePath>,
        new_order: Vec<usize>,
    },
}

impl EventKind {
    pub fn signal(&self) -> Signal {
        match self {
            Self::NodeAdded { .. } => Signal::NodeAdded,
            Self::NodeDeleted { .. } => Signal::NodeDeleted,
            Self::NodeModified { .. } => Signal::NodeModified,
            Self::AddedInView { .. } => Signal::NodeAddedInview,
            Self::DeletedInView { .. } => Signal::NodeDeletedInview,
            Self::ModifiedInView { .. } => Signal::NodeModifiedInview,
            Self::ChildrenReordered { .. } => Signal::NodeChildrenReordered,
        }
    }

    pub fn node_id(&self) -> &str {
        match self {
            Self::NodeAdded { node_id, .. }
            | Self::NodeDeleted { node_id }
            | Self::NodeModified { node_id, .. }
            | Self::AddedInView { node_id, .. }
            | Self::DeletedInView { node_id, .. }
            | Self::ModifiedInView { node_id, .. }
            | Self::ChildrenReordered { node_id, .. } => node_id,
        }
    }

    /// Path of the occurrence, for view events
    pub fn path(&self) -> Option<&NodePath> {
        match self {
            Self::AddedInView { path, .. }
            | Self::DeletedInView { path, .. }
            | Self::ModifiedInView { path, .. } => Some(path),
            Self::ChildrenReordered { path, .. } => path.as_ref(),
            Self::NodeAdded { .. } | Self::NodeDeleted { .. } | Self::NodeModified { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names_round_trip() {
        for signal in Signal::ALL {
            assert_eq!(signal.as_str().parse::<Signal>().unwrap(), signal);
        }
        assert!("node-exploded".parse::<Signal>().is_err());
    }

    #[test]
    fn view_signals() {
        assert!(Signal::NodeAddedInview.is_view_signal());
        assert!(!Signal::NodeModified.is_view_signal());
    }

    #[test]
    fn eventkind_serializes_with_type_tag() {
        let kind = EventKind::AddedInView {
            node_id: "b".into(),
            path: ["a", "b"].into_iter().collect(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "added_in_view");
        assert_eq!(json["node_id"], "b");
        assert_eq!(json["path"][1], "b");
    }

    #[test]
    fn accessors() {
        let raw = EventKind::NodeModified {
            node_id: "x".into(),
            priority: Priority::High,
        };
        assert_eq!(raw.signal(), Signal::NodeModified);
        assert_eq!(raw.node_id(), "x");
        assert_eq!(raw.path(), None);

        let reorder = EventKind::ChildrenReordered {
            node_id: "p".into(),
            path: Some(["p"].into_iter().collect()),
            new_order: vec![1, 0],
        };
        assert_eq!(reorder.path().map(|p| p.depth()), Some(1));
    }
}

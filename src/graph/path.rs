//! NodePath - position of one occurrence of a node in a tree view
//!
//! A node with several parents shows up several times in a view; each
//! occurrence is identified by the ids from the view root down to it.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::NodeId;

/// Stack-allocated for shallow trees (≤4 levels)
type PathVec = SmallVec<[NodeId; 4]>;

/// Root-to-occurrence sequence of node ids. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath(PathVec);

impl NodePath {
    /// The path of the (implicit) root
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path of a child occurrence below this one
    pub fn child(&self, node_id: NodeId) -> Self {
        let mut inner = self.0.clone();
        inner.push(node_id);
        Self(inner)
    }

    /// Concatenate a relative path below this one
    pub fn join(&self, relative: &NodePath) -> Self {
        let mut inner = self.0.clone();
        inner.extend(relative.0.iter().cloned());
        Self(inner)
    }

    /// The node this path points to (`None` for the root path)
    pub fn last(&self) -> Option<&NodeId> {
        self.0.last()
    }

    /// Path of the parent occurrence (`None` for the root path)
    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].iter().cloned().collect()))
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl Deref for NodePath {
    type Target = [NodeId];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S: AsRef<str>> FromIterator<S> for NodePath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|s| NodeId::from(s.as_ref())).collect())
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, ")")
    }
}

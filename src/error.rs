//! Arbor Error Types with Error Codes
//!
//! Error code ranges:
//! - ARBOR-001-009: Node errors
//! - ARBOR-010-019: Graph structure errors
//! - ARBOR-020-029: Filter errors
//! - ARBOR-030-039: View errors
//! - ARBOR-040-049: Config errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArborError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArborError {
    // ═══════════════════════════════════════════
    // NODE ERRORS (001-009)
    // ═══════════════════════════════════════════
    #[error("[ARBOR-001] Node '{node_id}' not found")]
    NodeNotFound { node_id: String },

    #[error("[ARBOR-002] Node '{node_id}' already exists")]
    DuplicateId { node_id: String },

    #[error("[ARBOR-003] Node id '{node_id}' is reserved for the tree root")]
    ReservedId { node_id: String },

    // ═══════════════════════════════════════════
    // GRAPH STRUCTURE ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[ARBOR-010] Cycle detected: '{parent_id}' is a descendant of '{child_id}'")]
    CycleDetected { parent_id: String, child_id: String },

    #[error("[ARBOR-011] Node '{node_id}' does not accept children")]
    ChildrenNotAllowed { node_id: String },

    #[error("[ARBOR-012] Node '{node_id}' does not accept parents")]
    ParentsNotAllowed { node_id: String },

    #[error("[ARBOR-013] Invalid state: {reason}")]
    InvalidState { reason: String },

    // ═══════════════════════════════════════════
    // FILTER ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[ARBOR-020] Filter '{name}' not found")]
    FilterNotFound { name: String },

    #[error("[ARBOR-021] Filter '{name}' is already registered")]
    FilterExists { name: String },

    // ═══════════════════════════════════════════
    // VIEW ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[ARBOR-030] Operation '{operation}' is not supported on a static view")]
    UnsupportedOperation { operation: String },

    #[error("[ARBOR-031] No node at path '{path}'")]
    PathNotFound { path: String },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[ARBOR-040] Configuration error: {reason}")]
    ConfigError { reason: String },
}

impl ArborError {
    /// Get the error code (e.g., "ARBOR-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::NodeNotFound { .. } => "ARBOR-001",
            Self::DuplicateId { .. } => "ARBOR-002",
            Self::ReservedId { .. } => "ARBOR-003",
            Self::CycleDetected { .. } => "ARBOR-010",
            Self::ChildrenNotAllowed { .. } => "ARBOR-011",
            Self::ParentsNotAllowed { .. } => "ARBOR-012",
            Self::InvalidState { .. } => "ARBOR-013",
            Self::FilterNotFound { .. } => "ARBOR-020",
            Self::FilterExists { .. } => "ARBOR-021",
            Self::UnsupportedOperation { .. } => "ARBOR-030",
            Self::PathNotFound { .. } => "ARBOR-031",
            Self::ConfigError { .. } => "ARBOR-040",
        }
    }

    /// Structural errors reject a mutation and leave the graph untouched
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId { .. }
                | Self::ReservedId { .. }
                | Self::CycleDetected { .. }
                | Self::ChildrenNotAllowed { .. }
                | Self::ParentsNotAllowed { .. }
        )
    }

    pub(crate) fn node_not_found(node_id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node_id: node_id.into(),
        }
    }

    pub(crate) fn filter_not_found(name: impl Into<String>) -> Self {
        Self::FilterNotFound { name: name.into() }
    }

    pub(crate) fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }
}

impl FixSuggestion for ArborError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ArborError::NodeNotFound { .. } => Some("Check has_node() before addressing a node"),
            ArborError::DuplicateId { .. } => {
                Some("Use a unique node id, or modify_node() to update the existing node")
            }
            ArborError::ReservedId { .. } => {
                Some("Pick another id or change root_id in the configuration")
            }
            ArborError::CycleDetected { .. } => {
                Some("A node cannot become its own ancestor; choose a parent outside its subtree")
            }
            ArborError::ChildrenNotAllowed { .. } => {
                Some("Enable children on the parent with set_children_allowed(id, true)")
            }
            ArborError::ParentsNotAllowed { .. } => {
                Some("Enable parents on the node with set_parents_allowed(id, true)")
            }
            ArborError::InvalidState { .. } => None,
            ArborError::FilterNotFound { .. } => {
                Some("Register the filter with register_filter() before applying it")
            }
            ArborError::FilterExists { .. } => {
                Some("Unregister the old filter first or use a '!name' alias for the negation")
            }
            ArborError::UnsupportedOperation { .. } => {
                Some("Filters need a filtered view: use Arbor::view() instead of main_view()")
            }
            ArborError::PathNotFound { .. } => {
                Some("Paths change as the view updates; fetch a fresh one with paths_for_node()")
            }
            ArborError::ConfigError { .. } => Some("Check the TOML syntax and key names"),
        }
    }
}

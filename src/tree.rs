//! Interface to the content tree.
//!
//! The registry never owns the tree. It asks this collaborator for paths and
//! parents (to check subtree containment and find covering locks) and for the
//! node-level preconditions of locking.

use crate::context::SessionContext;
use crate::node::{NodeId, NodePath};

/// What the lock subsystem needs to know about the content tree.
pub trait ContentTree: Send + Sync {
    /// Current path of a node, if the tree still exposes it.
    fn path(&self, node: &NodeId) -> Option<NodePath>;

    /// Parent of a node in the working view. `None` at the root, and for
    /// nodes the working view no longer exposes.
    fn parent(&self, node: &NodeId) -> Option<NodeId>;

    /// Parent of a node as persisted in the durable tree. Used when a node has
    /// been removed from the working view but still exists durably.
    fn persisted_parent(&self, node: &NodeId) -> Option<NodeId>;

    /// Whether the node's type allows locking.
    fn is_lockable(&self, node: &NodeId) -> bool;

    /// Whether `session` holds unsaved modifications of the node.
    fn has_pending_changes(&self, session: &SessionContext, node: &NodeId) -> bool;

    /// Human-readable location for messages: the path when known, else the id.
    fn describe(&self, node: &NodeId) -> String {
        self.path(node)
            .map(|p| p.to_string())
            .unwrap_or_else(|| node.to_string())
    }
}

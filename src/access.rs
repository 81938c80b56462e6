//! Interface to permission evaluation.
//!
//! Locking and unlocking require the `LockManagement` permission on the target
//! node. Evaluating that permission belongs to the repository's access-control
//! layer; this module only defines the call-out.

use crate::context::SessionContext;
use crate::error::{LockError, Result};
use crate::node::NodeId;

/// Permissions the lock subsystem asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Lock or unlock a node.
    LockManagement,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::LockManagement => "lock_management",
        }
    }
}

/// Permission collaborator.
pub trait AccessControl: Send + Sync {
    fn has_permission(&self, session: &SessionContext, node: &NodeId, permission: Permission)
    -> bool;

    /// Fail with `AccessDenied` unless the permission is granted.
    fn check_permission(
        &self,
        session: &SessionContext,
        node: &NodeId,
        permission: Permission,
    ) -> Result<()> {
        if self.has_permission(session, node, permission) {
            Ok(())
        } else {
            Err(LockError::AccessDenied(format!(
                "user '{}' lacks '{}' on node '{}'",
                session.user_id,
                permission.as_str(),
                node
            )))
        }
    }
}

/// Grants everything. The default when a repository has no access control.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn has_permission(&self, _: &SessionContext, _: &NodeId, _: Permission) -> bool {
        true
    }
}

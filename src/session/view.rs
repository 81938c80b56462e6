//! Session-facing view of one lock.

use super::ledger::TokenLedger;
use crate::descriptor::LockDescriptor;
use crate::error::{LockError, Result};
use crate::node::{NodeId, NodePath};
use crate::registry::LockRegistry;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// A lock as seen by one session.
///
/// The view is a snapshot of the descriptor plus a handle on the session's
/// ledger: whether the token is visible, and whether the lock is still live,
/// are answered at call time.
pub struct LockView {
    lock: LockDescriptor,
    path: Option<NodePath>,
    registry: Arc<LockRegistry>,
    ledger: Arc<TokenLedger>,
}

impl LockView {
    pub(crate) fn new(
        lock: LockDescriptor,
        registry: Arc<LockRegistry>,
        ledger: Arc<TokenLedger>,
    ) -> Self {
        let path = registry.tree().path(lock.locked_node());
        Self {
            lock,
            path,
            registry,
            ledger,
        }
    }

    pub fn owner(&self) -> &str {
        self.lock.owner()
    }

    /// The lock token, if this session holds it and the lock is open-scoped.
    pub fn token(&self) -> Option<&str> {
        if self.lock.is_session_scoped() || !self.is_lock_owning_session() {
            return None;
        }
        Some(self.lock.token())
    }

    pub fn node(&self) -> &NodeId {
        self.lock.locked_node()
    }

    /// Path of the locked node when the view was taken, if the tree knew it.
    pub fn node_path(&self) -> Option<&NodePath> {
        self.path.as_ref()
    }

    pub fn is_deep(&self) -> bool {
        self.lock.is_deep()
    }

    pub fn is_session_scoped(&self) -> bool {
        self.lock.is_session_scoped()
    }

    /// Whether the registry still holds a lock on the locked node.
    ///
    /// Any lock on the node counts, including one that replaced the lock
    /// this view was taken from.
    pub fn is_live(&self) -> bool {
        self.registry.is_locked(self.lock.locked_node())
    }

    /// Whether the session behind this view holds the lock token.
    pub fn is_lock_owning_session(&self) -> bool {
        self.ledger.owns(self.lock.token())
    }

    /// Check that this session still holds the lock.
    ///
    /// Expiry is advisory, so there is nothing to extend.
    pub fn refresh(&self) -> Result<()> {
        if !self.is_lock_owning_session() {
            let at = match &self.path {
                Some(path) => path.to_string(),
                None => self.lock.locked_node().to_string(),
            };
            return Err(LockError::NotLocked(at));
        }
        Ok(())
    }

    /// Unbounded for the owning session, and already past for everyone else.
    pub fn seconds_remaining(&self) -> i64 {
        if self.is_lock_owning_session() {
            i64::MAX
        } else {
            i64::MIN
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock.expires_at()
    }

    pub fn descriptor(&self) -> &LockDescriptor {
        &self.lock
    }
}

impl fmt::Debug for LockView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockView")
            .field("lock_id", self.lock.lock_id())
            .field("path", &self.path)
            .field("owner", &self.lock.owner())
            .finish_non_exhaustive()
    }
}

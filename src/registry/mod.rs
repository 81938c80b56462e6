//! Repository lock registry.
//!
//! The registry is the per-process authoritative index of active locks
//! (`node id -> descriptor`). Local acquisitions and releases go through it and
//! are written synchronously to the durable [`LockStore`]; locks created or
//! removed by other processes arrive later through the change feed.
//!
//! # Consistency
//!
//! This is a **best-effort, eventually-consistent coordinator**, not a
//! linearizable lock service:
//! - Operations from this process are immediately visible to all of its
//!   threads and are durable before they return.
//! - Locks taken by other processes become visible only once their change
//!   batch has been delivered. Until then two processes can each believe they
//!   may lock the same node (or overlapping subtrees).
//! - For the same node, the store's exclusive node flag settles the race: the
//!   loser's store write fails and its in-memory entry is rolled back.
//! - For overlapping subtrees the deep-lock scan is optimistic and not atomic
//!   with the insert, so an ancestor/descendant lock taken concurrently by
//!   another process can slip through.
//!
//! # Map discipline
//!
//! Entries are only ever inserted when absent, removed, or replaced wholesale.
//! A stored descriptor is never mutated in place.


use crate::context::{ProcessId, SessionContext};
use crate::descriptor::LockDescriptor;
use crate::error::{LockError, Result};
use crate::feed::{ChangeBatch, ChangeKind};
use crate::node::{LockId, NodeId, NodePath};
use crate::store::{LockStore, locks_path};
use crate::tree::ContentTree;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Requested lock timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockTimeout {
    /// No timeout requested; the registry's default lock age applies.
    #[default]
    Unspecified,
    /// Desired lifetime in seconds. Zero and `u64::MAX` mean unspecified.
    Seconds(u64),
}

impl LockTimeout {
    fn expiry_from(self, now: DateTime<Utc>, default_age: Duration) -> DateTime<Utc> {
        let age = match self {
            LockTimeout::Seconds(secs) if secs > 0 && secs < u64::MAX => {
                i64::try_from(secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .unwrap_or(default_age)
            }
            _ => default_age,
        };
        now.checked_add_signed(age).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Per-process index of active locks.
pub struct LockRegistry {
    locks: DashMap<NodeId, LockDescriptor>,
    store: Arc<dyn LockStore>,
    tree: Arc<dyn ContentTree>,
    process_id: ProcessId,
    system_workspace: String,
    locks_path: NodePath,
    default_lock_age: Duration,
}

impl LockRegistry {
    /// Create an empty registry. Call [`resync`](Self::resync) to load the
    /// persisted locks.
    pub fn new(
        store: Arc<dyn LockStore>,
        tree: Arc<dyn ContentTree>,
        process_id: ProcessId,
        system_workspace: impl Into<String>,
        default_lock_age: Duration,
    ) -> Self {
        Self {
            locks: DashMap::new(),
            store,
            tree,
            process_id,
            system_workspace: system_workspace.into(),
            locks_path: locks_path(),
            default_lock_age,
        }
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    pub fn tree(&self) -> &Arc<dyn ContentTree> {
        &self.tree
    }

    /// Lock `node` on behalf of `session`.
    ///
    /// The caller records the returned token in the session's ledger.
    pub fn acquire(
        &self,
        session: &SessionContext,
        node: &NodeId,
        deep: bool,
        session_scoped: bool,
        timeout: LockTimeout,
        owner_info: Option<&str>,
    ) -> Result<LockDescriptor> {
        if !self.tree.is_lockable(node) {
            return Err(LockError::NotLockable(self.tree.describe(node)));
        }
        if self.tree.has_pending_changes(session, node) {
            return Err(LockError::PendingChanges(self.tree.describe(node)));
        }

        let owner = owner_info.unwrap_or(&session.user_id);
        let expires_at = timeout.expiry_from(Utc::now(), self.default_lock_age);
        let lock = LockDescriptor::new(session, node, owner, deep, session_scoped, expires_at);

        if deep && let Some(locked) = self.find_locked_at_or_below(node)? {
            return Err(LockError::AlreadyLocked(self.tree.describe(&locked)));
        }

        match self.locks.entry(node.clone()) {
            Entry::Occupied(_) => {
                return Err(LockError::AlreadyLocked(self.tree.describe(node)));
            }
            Entry::Vacant(slot) => {
                slot.insert(lock.clone());
            }
        }

        if let Err(e) = self.store.store_lock(session, &lock) {
            // Only undo our own insert; a remote add may have replaced it.
            self.locks
                .remove_if(node, |_, current| current.token() == lock.token());
            if e.is_conflict() {
                // Another process got there first and we haven't heard yet
                debug!(node = %node, "store rejected lock; rolled back");
                return Err(LockError::AlreadyLocked(self.tree.describe(node)));
            }
            return Err(match e {
                LockError::PersistenceFailure(msg) => LockError::PersistenceFailure(msg),
                other => LockError::PersistenceFailure(other.to_string()),
            });
        }

        debug!(
            node = %node,
            deep,
            session_scoped,
            owner,
            "lock acquired"
        );
        Ok(lock)
    }

    /// Unlock `node`, returning the released token.
    pub fn release(&self, session: &SessionContext, node: &NodeId) -> Result<String> {
        let Some((_, lock)) = self.locks.remove(node) else {
            return Err(LockError::NotLocked(self.tree.describe(node)));
        };

        if let Err(e) = self.store.remove_lock(&lock) {
            // Keep memory in line with the store; the lock is still persisted.
            if let Entry::Vacant(slot) = self.locks.entry(node.clone()) {
                slot.insert(lock);
            }
            return Err(match e {
                LockError::PersistenceFailure(msg) => LockError::PersistenceFailure(msg),
                other => LockError::PersistenceFailure(other.to_string()),
            });
        }

        debug!(node = %node, session = %session.session_id, "lock released");
        Ok(lock.token().to_string())
    }

    /// Mark the lock with `token` as held (or not) by some session.
    ///
    /// Returns `false` if no persisted lock has that token.
    pub fn set_token_held(&self, session: &SessionContext, token: &str, held: bool) -> Result<bool> {
        let changed = self.store.set_token_held(token, held)?;
        debug!(session = %session.session_id, held, changed, "lock token hold flag updated");
        Ok(changed)
    }

    /// The nearest lock covering `node`: a lock on the node itself, or a deep
    /// lock on its closest locked ancestor.
    pub fn find_lock_covering(&self, node: &NodeId) -> Option<LockDescriptor> {
        let mut current = node.clone();
        loop {
            if let Some(lock) = self.locks.get(&current)
                && (current == *node || lock.is_deep())
            {
                return Some(lock.clone());
            }
            current = self
                .tree
                .parent(&current)
                .or_else(|| self.tree.persisted_parent(&current))?;
        }
    }

    /// The lock placed exactly on `node`, if any.
    pub fn lock_for(&self, node: &NodeId) -> Option<LockDescriptor> {
        self.locks.get(node).map(|lock| lock.clone())
    }

    pub fn is_locked(&self, node: &NodeId) -> bool {
        self.locks.contains_key(node)
    }

    /// The lock whose token is `token`, if any. Linear in the number of locks.
    pub fn lock_by_token(&self, token: &str) -> Option<LockDescriptor> {
        self.locks
            .iter()
            .find(|entry| entry.value().token() == token)
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of every known lock.
    pub fn all_locks(&self) -> Vec<LockDescriptor> {
        self.locks.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Locks whose recorded expiry lies before `now`.
    ///
    /// Expiry is advisory: nothing here removes them. An external sweeper can
    /// use this listing to decide what to reclaim.
    pub fn expired_locks(&self, now: DateTime<Utc>) -> Vec<LockDescriptor> {
        self.locks
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Release every session-scoped lock whose token is in `tokens`.
    ///
    /// Returns the tokens that were released. A lock whose store removal fails
    /// stays registered and is logged.
    pub fn clean_session_locks(
        &self,
        session: &SessionContext,
        tokens: &HashSet<String>,
    ) -> HashSet<String> {
        let doomed: Vec<NodeId> = self
            .locks
            .iter()
            .filter(|entry| {
                let lock = entry.value();
                lock.is_session_scoped() && tokens.contains(lock.token())
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut cleaned = HashSet::new();
        for node in doomed {
            match self.release(session, &node) {
                Ok(token) => {
                    cleaned.insert(token);
                }
                // Released concurrently by another thread or a remote change
                Err(LockError::NotLocked(_)) => continue,
                Err(e) => {
                    warn!(node = %node, error = %e, "failed to clean session-scoped lock");
                }
            }
        }
        cleaned
    }

    /// Rebuild the registry from every persisted lock record.
    ///
    /// Records that cannot be materialized are logged and skipped. Returns the
    /// number of locks loaded.
    pub fn resync(&self) -> Result<usize> {
        let records = self.store.all_lock_records()?;

        let mut loaded = Vec::with_capacity(records.len());
        for record in records {
            match record.descriptor() {
                Ok(lock) => loaded.push(lock),
                Err(e) => {
                    warn!(lock = %record.lock_id, error = %e, "skipping unreadable lock record");
                }
            }
        }

        self.locks.clear();
        let count = loaded.len();
        for lock in loaded {
            self.locks.insert(lock.locked_node().clone(), lock);
        }

        debug!(count, "lock registry resynced from store");
        Ok(count)
    }

    /// Absorb a committed change batch from the change feed.
    ///
    /// Batches from other workspaces and batches this process wrote itself are
    /// ignored. Failures are logged, never returned: the feed is a background
    /// path. Returns the number of lock changes applied.
    pub fn on_change_batch(&self, batch: &ChangeBatch) -> usize {
        if batch.workspace != self.system_workspace {
            return 0;
        }
        if batch.origin == self.process_id {
            return 0;
        }

        let mut applied = 0;
        for change in &batch.changes {
            if !self.locks_path.is_ancestor_of(&change.path) {
                continue;
            }
            let lock_id = match LockId::parse(&change.node_id) {
                Ok(id) => id,
                Err(e) => {
                    error!(origin = %batch.origin, error = %e, "ignoring change with bad lock id");
                    continue;
                }
            };

            match change.kind {
                ChangeKind::Added => {
                    match LockDescriptor::from_properties(&lock_id, &change.properties) {
                        Ok(lock) => {
                            debug!(lock = %lock_id, origin = %batch.origin, "absorbed remote lock");
                            self.locks.insert(lock.locked_node().clone(), lock);
                            applied += 1;
                        }
                        Err(e) => {
                            error!(lock = %lock_id, error = %e, "failed to absorb remote lock");
                        }
                    }
                }
                ChangeKind::Removed => {
                    let node = lock_id.locked_node();
                    if self.locks.remove(&node).is_some() {
                        debug!(lock = %lock_id, origin = %batch.origin, "absorbed remote unlock");
                    }
                    applied += 1;
                }
            }
        }
        applied
    }

    /// First known lock on `node` or one of its descendants, by path.
    ///
    /// Read-only, and not atomic with any later insert.
    fn find_locked_at_or_below(&self, node: &NodeId) -> Result<Option<NodeId>> {
        let path = self.tree.path(node).ok_or_else(|| {
            LockError::PersistenceFailure(format!("no path known for node '{}'", node))
        })?;

        for entry in self.locks.iter() {
            let Some(locked_path) = self.tree.path(entry.key()) else {
                continue;
            };
            if locked_path.is_at_or_below(&path) {
                return Ok(Some(entry.key().clone()));
            }
        }
        Ok(None)
    }
}

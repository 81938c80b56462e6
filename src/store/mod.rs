//! Durable lock store.
//!
//! The store is the shared, persisted side of the lock subsystem: every process
//! writes its lock records here synchronously and reads all of them back at
//! startup. It is also the authoritative conflict detector: a store refuses to
//! persist a second lock on a node that already has one, even when the calling
//! process's registry had not yet heard of the first.
//!
//! # Implementations
//!
//! - [`FsLockStore`]: records as JSON files in a shared directory, with
//!   exclusive-create node flags and an NDJSON change journal.

mod atomic;
mod fs;
pub mod journal;


use crate::context::SessionContext;
use crate::descriptor::{LockDescriptor, LockProperties, PROP_HELD_BY_SESSION};
use crate::error::Result;
use crate::node::{LockId, NodePath};
use serde_json::Value;

pub use fs::{ClearedLock, FsLockStore, NodeFlag, OrphanFlag};
pub use journal::ChangeJournal;

/// Path of the system subtree holding lock records. Change-feed entries at or
/// below this path describe locks.
pub fn locks_path() -> NodePath {
    NodePath::root().child("system").child("locks")
}

/// One persisted lock record as read back from the store.
#[derive(Debug, Clone)]
pub struct LockRecord {
    pub lock_id: LockId,
    pub properties: LockProperties,
}

impl LockRecord {
    /// Whether some session currently holds this record's token.
    pub fn is_held_by_session(&self) -> bool {
        matches!(
            self.properties.get(PROP_HELD_BY_SESSION),
            Some(Value::Bool(true))
        )
    }

    /// Materialize the descriptor this record describes.
    pub fn descriptor(&self) -> Result<LockDescriptor> {
        LockDescriptor::from_properties(&self.lock_id, &self.properties)
    }
}

/// The persisted representation of all active locks.
pub trait LockStore: Send + Sync {
    /// Persist a new lock record and set the durable lock flag on the locked
    /// node, as one unit. The descriptor carries the expiry.
    ///
    /// Fails with `AlreadyLocked` when the store already holds a lock for the
    /// node, and with `PersistenceFailure` for anything else. Nothing is left
    /// behind on failure.
    fn store_lock(&self, session: &SessionContext, lock: &LockDescriptor) -> Result<()>;

    /// Delete the lock record and clear the node's lock flag. A record or
    /// flag that already belongs to a newer lock on the node is left alone.
    fn remove_lock(&self, lock: &LockDescriptor) -> Result<()>;

    /// Set the "held by some session" flag on the record with `token`.
    /// Returns `false` if no live lock has that token, including when the
    /// lock is removed while the flag is being written.
    fn set_token_held(&self, token: &str, held: bool) -> Result<bool>;

    /// Every persisted lock record.
    fn all_lock_records(&self) -> Result<Vec<LockRecord>>;
}

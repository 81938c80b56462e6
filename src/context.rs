//! Process identity, session context and durable store layout.
//!
//! Every registry tags the changes it writes with its [`ProcessId`] so that it
//! can recognise (and skip) its own writes when they come back through the
//! change feed. The [`StoreLayout`] resolves the fixed directory structure of a
//! file-backed lock store from its root.

use crate::error::{LockError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Directory holding one JSON record per lock.
pub const LOCKS_DIR: &str = "locks";

/// Directory holding the durable per-node lock flags.
pub const NODES_DIR: &str = "nodes";

/// Directory holding the change journal.
pub const JOURNAL_DIR: &str = "journal";

/// Identity of one repository process sharing the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(String);

impl ProcessId {
    /// Generate an identity unique to this process instance.
    ///
    /// Format: `user@host:pid:nonce`. The nonce keeps two registries inside
    /// one OS process distinct.
    pub fn generate() -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}:{}:{}",
            get_owner_string(),
            std::process::id(),
            &nonce[..8]
        ))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the session on whose behalf a lock operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Unique id of the session (recorded on the lock as the locking session).
    pub session_id: String,

    /// The authenticated user; the default lock owner.
    pub user_id: String,

    /// Workspace the session is bound to.
    pub workspace: String,
}

impl SessionContext {
    /// Create a context for a new session with a fresh session id.
    pub fn new(user_id: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            workspace: workspace.into(),
        }
    }
}

/// Resolved paths of a file-backed lock store.
///
/// All paths are absolute when the root is.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    /// Root of the store, shared by every process.
    pub root: PathBuf,

    /// `{root}/locks/`: one `<lock-id>.json` record per lock.
    pub locks_dir: PathBuf,

    /// `{root}/nodes/`: one `<node-id>.lock` flag per locked node.
    pub nodes_dir: PathBuf,

    /// `{root}/journal/`: the change journal.
    pub journal_dir: PathBuf,
}

impl StoreLayout {
    /// Resolve the layout under `root`. Nothing is created on disk.
    pub fn resolve<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            locks_dir: root.join(LOCKS_DIR),
            nodes_dir: root.join(NODES_DIR),
            journal_dir: root.join(JOURNAL_DIR),
            root,
        }
    }

    /// Resolve a store directory relative to the current working directory.
    pub fn resolve_from_cwd<P: AsRef<Path>>(store_dir: P) -> Result<Self> {
        let store_dir = store_dir.as_ref();
        if store_dir.is_absolute() {
            return Ok(Self::resolve(store_dir));
        }
        let cwd = std::env::current_dir().map_err(|e| {
            LockError::UserError(format!("failed to get current working directory: {}", e))
        })?;
        Ok(Self::resolve(cwd.join(store_dir)))
    }

    /// Path of the record file for a lock id.
    pub fn lock_record_path(&self, lock_id: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.json", lock_id))
    }

    /// Path of the durable lock flag for a node.
    pub fn node_flag_path(&self, node_id: &str) -> PathBuf {
        self.nodes_dir.join(format!("{}.lock", node_id))
    }

    /// Path of the NDJSON change journal.
    pub fn journal_path(&self) -> PathBuf {
        self.journal_dir.join("changes.ndjson")
    }
}

/// Owner string for the local process (`user@HOST`).
pub(crate) fn get_owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_process_ids_are_unique() {
        let a = ProcessId::generate();
        let b = ProcessId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().contains('@'));
        assert!(a.as_str().contains(&std::process::id().to_string()));
    }

    #[test]
    fn layout_paths() {
        let layout = StoreLayout::resolve("/srv/locks");
        assert_eq!(layout.locks_dir, PathBuf::from("/srv/locks/locks"));
        assert_eq!(
            layout.lock_record_path("lock-n1"),
            PathBuf::from("/srv/locks/locks/lock-n1.json")
        );
        assert_eq!(
            layout.node_flag_path("n1"),
            PathBuf::from("/srv/locks/nodes/n1.lock")
        );
        assert_eq!(
            layout.journal_path(),
            PathBuf::from("/srv/locks/journal/changes.ndjson")
        );
    }

    #[test]
    fn session_contexts_get_distinct_ids() {
        let a = SessionContext::new("alice", "default");
        let b = SessionContext::new("alice", "default");
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.user_id, "alice");
    }
}

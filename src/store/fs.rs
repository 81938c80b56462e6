//! File-backed lock store.
//!
//! Layout under the store root (see [`StoreLayout`]):
//! - `locks/<lock-id>.json`: the lock record (a JSON property map)
//! - `nodes/<node-id>.lock`: the durable lock flag on the locked node
//! - `journal/changes.ndjson`: the change journal
//!
//! Node flags are created with **create_new** semantics (exclusive create).
//! That is what makes the store the authoritative conflict detector: two
//! processes racing to lock the same node can both pass their in-memory
//! checks, but only one of them can create the flag.
//!
//! The flag also carries the lock token. A record rewrite checks it after the
//! rename and drops the rewritten record when the lock was removed meanwhile,
//! and removal deletes the record once more after the flag is gone. Whatever
//! order the two run in, a removed lock never comes back as a record without
//! a flag.

use super::atomic::atomic_write;
use super::journal::append_batch;
use super::{LockRecord, LockStore, locks_path};
use crate::context::{ProcessId, SessionContext, StoreLayout};
use crate::descriptor::{LockDescriptor, LockProperties, PROP_HELD_BY_SESSION, PROP_TOKEN};
use crate::error::{LockError, Result};
use crate::feed::ChangeBatch;
use crate::node::{LockId, NodeId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Contents of a node's durable lock flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFlag {
    pub lock_id: LockId,
    pub token: String,
    pub owner: String,
    pub deep: bool,
    pub session_scoped: bool,
    pub process: ProcessId,
    pub created_at: DateTime<Utc>,
}

/// Lock store keeping its records in a directory shared by all processes.
#[derive(Debug)]
pub struct FsLockStore {
    layout: StoreLayout,
    process_id: ProcessId,
    system_workspace: String,
    /// Token to lock id, filled as records are written or read.
    tokens: DashMap<String, LockId>,
    /// Serializes record writes and removals within this process.
    writes: Mutex<()>,
}

/// What [`FsLockStore::clear_lock`] removed.
#[derive(Debug, Clone)]
pub struct ClearedLock {
    pub node: NodeId,
    /// `None` when only the node flag was left.
    pub record: Option<LockRecord>,
    /// `None` when the flag was missing or unreadable.
    pub flag: Option<NodeFlag>,
}

/// A node flag with no lock record behind it.
#[derive(Debug, Clone)]
pub struct OrphanFlag {
    pub node: NodeId,
    /// `None` when the flag file could not be parsed.
    pub flag: Option<NodeFlag>,
}

impl FsLockStore {
    /// Open (and if needed create) a store at `layout`.
    ///
    /// `process_id` and `system_workspace` tag every journaled change.
    pub fn open(
        layout: StoreLayout,
        process_id: ProcessId,
        system_workspace: impl Into<String>,
    ) -> Result<Self> {
        for dir in [&layout.locks_dir, &layout.nodes_dir, &layout.journal_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                LockError::PersistenceFailure(format!(
                    "failed to create store directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            layout,
            process_id,
            system_workspace: system_workspace.into(),
            tokens: DashMap::new(),
            writes: Mutex::new(()),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    /// Read the record for one lock id, if present.
    pub fn read_record(&self, lock_id: &LockId) -> Result<Option<LockRecord>> {
        let path = self.layout.lock_record_path(lock_id.as_str());
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(LockRecord {
                lock_id: lock_id.clone(),
                properties: parse_properties(&path, &content)?,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::PersistenceFailure(format!(
                "failed to read lock record '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    /// Read a node's durable lock flag, if present.
    pub fn read_node_flag(&self, node: &NodeId) -> Result<Option<NodeFlag>> {
        let path = self.layout.node_flag_path(node.canonical_form());
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                LockError::PersistenceFailure(format!(
                    "failed to parse node flag '{}': {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::PersistenceFailure(format!(
                "failed to read node flag '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    /// Forcibly remove the lock on `node`, whoever holds it.
    ///
    /// Removes the record and the node flag, whichever of them exist, so a
    /// flag left without its record can be repaired too. The removal is
    /// journaled so live registries evict the lock. The caller is responsible
    /// for deciding that breaking the lock is appropriate.
    pub fn clear_lock(&self, node: &NodeId) -> Result<ClearedLock> {
        let _guard = self.writes.lock();
        let lock_id = node.lock_id();
        let record_path = self.layout.lock_record_path(lock_id.as_str());
        let flag_path = self.layout.node_flag_path(node.canonical_form());

        if !record_path.exists() && !flag_path.exists() {
            return Err(LockError::NotLocked(node.to_string()));
        }

        let record = self.read_record(&lock_id).unwrap_or_else(|e| {
            warn!(lock = %lock_id, error = %e, "clearing unreadable lock record");
            None
        });
        let flag = self.read_node_flag(node).unwrap_or_else(|e| {
            warn!(node = %node, error = %e, "clearing unreadable node flag");
            None
        });

        remove_if_present(&record_path)?;
        remove_if_present(&flag_path)?;
        self.tokens.retain(|_, id| *id != lock_id);
        self.journal_removed(&lock_id)?;

        if record.is_none() {
            warn!(node = %node, "cleared node flag that had no lock record");
        }
        Ok(ClearedLock {
            node: node.clone(),
            record,
            flag,
        })
    }

    /// Node flags with no lock record behind them.
    ///
    /// A flag is orphaned when a process stops between writing the flag and
    /// the record, or when a removal fails after the record is gone. Such a
    /// node cannot be locked again until the flag is cleared. A lock that is
    /// being stored right now can show up here for a moment.
    pub fn orphan_flags(&self) -> Result<Vec<OrphanFlag>> {
        let mut orphans = Vec::new();

        if !self.layout.nodes_dir.exists() {
            return Ok(orphans);
        }

        let entries = fs::read_dir(&self.layout.nodes_dir).map_err(|e| {
            LockError::PersistenceFailure(format!(
                "failed to read nodes directory '{}': {}",
                self.layout.nodes_dir.display(),
                e
            ))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                LockError::PersistenceFailure(format!(
                    "failed to read nodes directory entry: {}",
                    e
                ))
            })?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let node = match NodeId::parse(stem) {
                Ok(node) => node,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping stray file in nodes directory");
                    continue;
                }
            };
            if self.layout.lock_record_path(node.lock_id().as_str()).exists() {
                continue;
            }

            let flag = match self.read_node_flag(&node) {
                Ok(Some(flag)) => Some(flag),
                // Removed between read_dir and read
                Ok(None) => continue,
                Err(e) => {
                    warn!(node = %node, error = %e, "node flag is unreadable");
                    None
                }
            };
            orphans.push(OrphanFlag { node, flag });
        }

        orphans.sort_by(|a, b| a.node.cmp(&b.node));
        Ok(orphans)
    }

    /// Find the record carrying `token`, trying the token index before
    /// scanning the locks directory.
    fn find_record_by_token(&self, token: &str) -> Result<Option<LockRecord>> {
        let indexed = self.tokens.get(token).map(|id| id.value().clone());
        if let Some(lock_id) = indexed {
            if let Some(record) = self.read_record(&lock_id)?
                && record_token(&record) == Some(token)
            {
                return Ok(Some(record));
            }
            self.tokens.remove(token);
        }

        // Stored by another process, or not seen yet
        Ok(self
            .all_lock_records()?
            .into_iter()
            .find(|record| record_token(record) == Some(token)))
    }

    /// Whether `node` is flagged by the lock with `token`.
    fn flag_matches(&self, node: &NodeId, token: &str) -> Result<bool> {
        Ok(self
            .read_node_flag(node)?
            .is_some_and(|flag| flag.token == token))
    }

    /// Delete the record for `lock_id` if it still carries `token`.
    fn discard_record(&self, lock_id: &LockId, token: &str) -> Result<bool> {
        match self.read_record(lock_id)? {
            Some(record) if record_token(&record) == Some(token) => {
                remove_if_present(&self.layout.lock_record_path(lock_id.as_str()))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn journal_added(&self, lock_id: &LockId, properties: LockProperties) -> Result<()> {
        let batch = ChangeBatch::new(self.system_workspace.clone(), self.process_id.clone())
            .added(locks_path().child(lock_id.as_str()), lock_id.as_str(), properties);
        append_batch(&self.layout, &batch)
    }

    fn journal_removed(&self, lock_id: &LockId) -> Result<()> {
        let batch = ChangeBatch::new(self.system_workspace.clone(), self.process_id.clone())
            .removed(locks_path().child(lock_id.as_str()), lock_id.as_str());
        append_batch(&self.layout, &batch)
    }

    fn write_node_flag(&self, lock: &LockDescriptor) -> Result<()> {
        let flag = NodeFlag {
            lock_id: lock.lock_id().clone(),
            token: lock.token().to_string(),
            owner: lock.owner().to_string(),
            deep: lock.is_deep(),
            session_scoped: lock.is_session_scoped(),
            process: self.process_id.clone(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&flag).map_err(|e| {
            LockError::PersistenceFailure(format!("failed to serialize node flag: {}", e))
        })?;
        let path = self
            .layout
            .node_flag_path(lock.locked_node().canonical_form());
        create_exclusive(&path, json.as_bytes())
            .map_err(|e| conflict_or_failure(e, lock.locked_node()))
    }
}

impl LockStore for FsLockStore {
    fn store_lock(&self, session: &SessionContext, lock: &LockDescriptor) -> Result<()> {
        let node = lock.locked_node();
        let flag_path = self.layout.node_flag_path(node.canonical_form());
        let record_path = self.layout.lock_record_path(lock.lock_id().as_str());
        let _guard = self.writes.lock();

        // The flag goes first: it is the cross-process conflict check.
        self.write_node_flag(lock)?;

        let mut properties = lock.to_properties();
        properties.insert(PROP_HELD_BY_SESSION.into(), Value::Bool(false));
        let json = serde_json::to_string_pretty(&properties).map_err(|e| {
            let _ = fs::remove_file(&flag_path);
            LockError::PersistenceFailure(format!("failed to serialize lock record: {}", e))
        })?;

        if let Err(e) = create_exclusive(&record_path, json.as_bytes()) {
            let _ = fs::remove_file(&flag_path);
            return Err(conflict_or_failure(e, node));
        }

        if let Err(e) = self.journal_added(lock.lock_id(), properties) {
            let _ = fs::remove_file(&record_path);
            let _ = fs::remove_file(&flag_path);
            return Err(e);
        }
        self.tokens
            .insert(lock.token().to_string(), lock.lock_id().clone());

        debug!(
            lock = %lock.lock_id(),
            session = %session.session_id,
            "lock record stored"
        );
        Ok(())
    }

    fn remove_lock(&self, lock: &LockDescriptor) -> Result<()> {
        let _guard = self.writes.lock();
        let lock_id = lock.lock_id();
        let node = lock.locked_node();

        match self.read_record(lock_id)? {
            None => {
                debug!(lock = %lock_id, "lock record already gone");
            }
            Some(record) if record_token(&record) != Some(lock.token()) => {
                // The record now belongs to a newer lock on the same node.
                warn!(
                    lock = %lock_id,
                    "lock record was replaced by another lock; leaving it in place"
                );
                return Ok(());
            }
            Some(_) => {
                remove_if_present(&self.layout.lock_record_path(lock_id.as_str()))?;
            }
        }
        self.tokens.remove(lock.token());

        if let Some(flag) = self.read_node_flag(node)?
            && flag.token != lock.token()
        {
            warn!(
                lock = %lock_id,
                "node flag belongs to another lock; leaving it in place"
            );
            return Ok(());
        }
        remove_if_present(&self.layout.node_flag_path(node.canonical_form()))?;

        // A hold-flag rewrite from another process may have renamed the
        // record back in before the flag went away.
        if self.discard_record(lock_id, lock.token())? {
            debug!(lock = %lock_id, "removed lock record rewritten during removal");
        }
        self.journal_removed(lock_id)
    }

    fn set_token_held(&self, token: &str, held: bool) -> Result<bool> {
        let _guard = self.writes.lock();
        let Some(mut record) = self.find_record_by_token(token)? else {
            return Ok(false);
        };
        let node = record.lock_id.locked_node();
        if !self.flag_matches(&node, token)? {
            debug!(lock = %record.lock_id, "lock record has no matching node flag");
            return Ok(false);
        }

        record
            .properties
            .insert(PROP_HELD_BY_SESSION.into(), Value::Bool(held));
        let json = serde_json::to_string_pretty(&record.properties).map_err(|e| {
            LockError::PersistenceFailure(format!("failed to serialize lock record: {}", e))
        })?;
        atomic_write(
            &self.layout.lock_record_path(record.lock_id.as_str()),
            json.as_bytes(),
        )?;

        // The rename above can put back a record another process just removed.
        if !self.flag_matches(&node, token)? {
            self.discard_record(&record.lock_id, token)?;
            self.tokens.remove(token);
            warn!(
                lock = %record.lock_id,
                "lock was removed while its hold flag was being updated"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn all_lock_records(&self) -> Result<Vec<LockRecord>> {
        let mut records = Vec::new();

        if !self.layout.locks_dir.exists() {
            return Ok(records);
        }

        let entries = fs::read_dir(&self.layout.locks_dir).map_err(|e| {
            LockError::PersistenceFailure(format!(
                "failed to read locks directory '{}': {}",
                self.layout.locks_dir.display(),
                e
            ))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                LockError::PersistenceFailure(format!(
                    "failed to read locks directory entry: {}",
                    e
                ))
            })?;
            let path = entry.path();

            // Skip temp files and anything that isn't a record
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let lock_id = match LockId::parse(stem) {
                Ok(id) => id,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping stray file in locks directory");
                    continue;
                }
            };

            match self.read_record(&lock_id) {
                Ok(Some(record)) => {
                    if let Some(token) = record_token(&record) {
                        self.tokens.insert(token.to_string(), lock_id.clone());
                    }
                    records.push(record);
                }
                // Removed between read_dir and read
                Ok(None) => continue,
                Err(e) => warn!(lock = %lock_id, error = %e, "skipping unreadable lock record"),
            }
        }

        records.sort_by(|a, b| a.lock_id.as_str().cmp(b.lock_id.as_str()));
        Ok(records)
    }
}

fn record_token(record: &LockRecord) -> Option<&str> {
    record.properties.get(PROP_TOKEN).and_then(Value::as_str)
}

/// Create a file that must not exist yet, write it and sync it.
fn create_exclusive(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;

    let written = file.write_all(content).and_then(|_| file.sync_all());
    if written.is_err() {
        // Clean up so the half-written file doesn't read as a held lock
        let _ = fs::remove_file(path);
    }
    written
}

fn conflict_or_failure(e: std::io::Error, node: &NodeId) -> LockError {
    if e.kind() == ErrorKind::AlreadyExists {
        LockError::AlreadyLocked(node.to_string())
    } else {
        LockError::PersistenceFailure(format!("failed to persist lock on '{}': {}", node, e))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::PersistenceFailure(format!(
            "failed to remove '{}': {}",
            path.display(),
            e
        ))),
    }
}

fn parse_properties(path: &Path, content: &str) -> Result<LockProperties> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(LockError::PersistenceFailure(format!(
            "lock record '{}' is not a JSON object",
            path.display()
        ))),
        Err(e) => Err(LockError::PersistenceFailure(format!(
            "failed to parse lock record '{}': {}",
            path.display(),
            e
        ))),
    }
}

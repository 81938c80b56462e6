//! Shared fixtures for unit tests.

use crate::context::SessionContext;
use crate::descriptor::{LockDescriptor, LockProperties, PROP_HELD_BY_SESSION, PROP_TOKEN};
use crate::error::{LockError, Result};
use crate::node::{LockId, NodeId, NodePath};
use crate::store::{LockRecord, LockStore};
use crate::tree::ContentTree;
use parking_lot::{Mutex as PlMutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};

static CWD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub(crate) struct DirGuard {
    original: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl DirGuard {
    pub(crate) fn new(new_dir: &Path) -> Self {
        // The working directory is process-global; serialize even without #[serial].
        let lock = CWD_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(new_dir).unwrap();
        Self {
            original,
            _lock: lock,
        }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.original);
    }
}

pub(crate) fn node(id: &str) -> NodeId {
    NodeId::parse(id).unwrap()
}

#[derive(Debug, Clone)]
struct MemoryNode {
    name: String,
    parent: Option<NodeId>,
    persisted_parent: Option<NodeId>,
    lockable: bool,
}

/// In-memory content tree rooted at node `root` (path `/`).
pub(crate) struct MemoryTree {
    nodes: RwLock<HashMap<NodeId, MemoryNode>>,
    pending: RwLock<HashSet<(String, NodeId)>>,
}

impl MemoryTree {
    pub(crate) fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            node("root"),
            MemoryNode {
                name: String::new(),
                parent: None,
                persisted_parent: None,
                lockable: true,
            },
        );
        Self {
            nodes: RwLock::new(nodes),
            pending: RwLock::new(HashSet::new()),
        }
    }

    /// Add a lockable child `id` named `name` under `parent`.
    pub(crate) fn add(&self, parent: &str, id: &str, name: &str) -> NodeId {
        self.insert(parent, id, name, true)
    }

    pub(crate) fn add_unlockable(&self, parent: &str, id: &str, name: &str) -> NodeId {
        self.insert(parent, id, name, false)
    }

    /// Drop a node from the working view while keeping its persisted parent.
    pub(crate) fn detach(&self, id: &str) {
        if let Some(entry) = self.nodes.write().get_mut(&node(id)) {
            entry.parent = None;
        }
    }

    pub(crate) fn mark_pending(&self, session: &SessionContext, id: &str) {
        self.pending
            .write()
            .insert((session.session_id.clone(), node(id)));
    }

    fn insert(&self, parent: &str, id: &str, name: &str, lockable: bool) -> NodeId {
        let id = node(id);
        let parent = node(parent);
        self.nodes.write().insert(
            id.clone(),
            MemoryNode {
                name: name.to_string(),
                parent: Some(parent.clone()),
                persisted_parent: Some(parent),
                lockable,
            },
        );
        id
    }
}

impl ContentTree for MemoryTree {
    fn path(&self, node: &NodeId) -> Option<NodePath> {
        let nodes = self.nodes.read();
        let mut names = Vec::new();
        let mut current = nodes.get(node)?;
        while let Some(parent) = &current.parent {
            names.push(current.name.clone());
            current = nodes.get(parent)?;
        }
        // Only nodes still attached to the root have a path.
        if !current.name.is_empty() {
            return None;
        }
        let mut path = NodePath::root();
        for name in names.iter().rev() {
            path = path.child(name);
        }
        Some(path)
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.nodes.read().get(node)?.parent.clone()
    }

    fn persisted_parent(&self, node: &NodeId) -> Option<NodeId> {
        self.nodes.read().get(node)?.persisted_parent.clone()
    }

    fn is_lockable(&self, node: &NodeId) -> bool {
        self.nodes.read().get(node).is_some_and(|n| n.lockable)
    }

    fn has_pending_changes(&self, session: &SessionContext, node: &NodeId) -> bool {
        self.pending
            .read()
            .contains(&(session.session_id.clone(), node.clone()))
    }
}

/// Lock store kept in memory, with switches to make writes fail.
#[derive(Default)]
pub(crate) struct MemoryStore {
    records: PlMutex<BTreeMap<String, LockProperties>>,
    fail_store: AtomicBool,
    fail_remove: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Put a record in place as if another process had written it.
    pub(crate) fn insert_record(&self, lock: &LockDescriptor) {
        self.records
            .lock()
            .insert(lock.lock_id().as_str().to_string(), lock.to_properties());
    }

    pub(crate) fn insert_raw(&self, lock_id: &str, properties: LockProperties) {
        self.records.lock().insert(lock_id.to_string(), properties);
    }

    pub(crate) fn contains(&self, lock_id: &str) -> bool {
        self.records.lock().contains_key(lock_id)
    }

    pub(crate) fn is_held(&self, lock_id: &str) -> bool {
        self.records
            .lock()
            .get(lock_id)
            .and_then(|props| props.get(PROP_HELD_BY_SESSION))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl LockStore for MemoryStore {
    fn store_lock(&self, _session: &SessionContext, lock: &LockDescriptor) -> Result<()> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(LockError::PersistenceFailure("store offline".to_string()));
        }
        let mut records = self.records.lock();
        let key = lock.lock_id().as_str().to_string();
        if records.contains_key(&key) {
            return Err(LockError::AlreadyLocked(lock.locked_node().to_string()));
        }
        let mut props = lock.to_properties();
        props.insert(PROP_HELD_BY_SESSION.into(), Value::Bool(false));
        records.insert(key, props);
        Ok(())
    }

    fn remove_lock(&self, lock: &LockDescriptor) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(LockError::PersistenceFailure("store offline".to_string()));
        }
        self.records.lock().remove(lock.lock_id().as_str());
        Ok(())
    }

    fn set_token_held(&self, token: &str, held: bool) -> Result<bool> {
        let mut records = self.records.lock();
        for props in records.values_mut() {
            if props.get(PROP_TOKEN).and_then(Value::as_str) == Some(token) {
                props.insert(PROP_HELD_BY_SESSION.into(), Value::Bool(held));
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn all_lock_records(&self) -> Result<Vec<LockRecord>> {
        let records = self.records.lock();
        let mut out = Vec::new();
        for (key, props) in records.iter() {
            // Raw test records may carry ids that don't parse
            if let Ok(lock_id) = LockId::parse(key) {
                out.push(LockRecord {
                    lock_id,
                    properties: props.clone(),
                });
            }
        }
        Ok(out)
    }
}

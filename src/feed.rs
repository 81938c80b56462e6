//! Change feed plumbing.
//!
//! Committed mutation batches from the shared store reach a registry through a
//! bounded channel. A dedicated drain thread owns the receiving end and hands
//! each batch to [`LockRegistry::on_change_batch`], so publishers never wait on
//! registry work and the registry never runs on a publisher's thread.
//!
//! Delivery is at-least-once and only ordered per origin process; the registry
//! tolerates duplicates (adds are last-writer-wins, removes are idempotent).

use crate::context::ProcessId;
use crate::descriptor::LockProperties;
use crate::error::{LockError, Result};
use crate::node::NodePath;
use crate::registry::LockRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender};
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Kind of a committed node change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
}

/// One committed node change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,

    /// Path of the changed node.
    pub path: NodePath,

    /// Key of the changed node. For lock records this is the lock id.
    pub node_id: String,

    /// Properties of an added node; empty for removals.
    #[serde(default)]
    pub properties: LockProperties,
}

/// A batch of changes committed together by one process in one workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub workspace: String,
    pub origin: ProcessId,
    pub changes: Vec<Change>,
}

impl ChangeBatch {
    pub fn new(workspace: impl Into<String>, origin: ProcessId) -> Self {
        Self {
            workspace: workspace.into(),
            origin,
            changes: Vec::new(),
        }
    }

    /// Add a node-added change.
    pub fn added(mut self, path: NodePath, node_id: &str, properties: LockProperties) -> Self {
        self.changes.push(Change {
            kind: ChangeKind::Added,
            path,
            node_id: node_id.to_string(),
            properties,
        });
        self
    }

    /// Add a node-removed change.
    pub fn removed(mut self, path: NodePath, node_id: &str) -> Self {
        self.changes.push(Change {
            kind: ChangeKind::Removed,
            path,
            node_id: node_id.to_string(),
            properties: LockProperties::new(),
        });
        self
    }
}

/// Messages understood by the drain thread.
pub(crate) enum FeedMessage {
    Batch(ChangeBatch),
    /// Acknowledged once every message queued before it has been applied.
    Flush(SyncSender<()>),
    Shutdown,
}

/// Publishing end of a registry's change feed. Cheap to clone.
#[derive(Clone)]
pub struct FeedSender {
    sender: SyncSender<FeedMessage>,
}

impl FeedSender {
    /// Queue a batch for the registry. Blocks while the channel is full.
    pub fn publish(&self, batch: ChangeBatch) -> Result<()> {
        self.sender
            .send(FeedMessage::Batch(batch))
            .map_err(|_| LockError::PersistenceFailure("change feed is closed".to_string()))
    }

    /// Wait until every batch published before this call has been applied.
    pub fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);
        self.sender
            .send(FeedMessage::Flush(done_tx))
            .map_err(|_| LockError::PersistenceFailure("change feed is closed".to_string()))?;
        done_rx
            .recv()
            .map_err(|_| LockError::PersistenceFailure("change feed stopped".to_string()))
    }

    pub(crate) fn shutdown(&self) {
        // A closed channel means the drain thread is already gone.
        let _ = self.sender.send(FeedMessage::Shutdown);
    }
}

/// Spawn the drain thread for `registry`.
pub(crate) fn spawn_feed_loop(
    registry: Arc<LockRegistry>,
    capacity: usize,
) -> Result<(FeedSender, JoinHandle<()>)> {
    let (tx, rx) = std::sync::mpsc::sync_channel(capacity);
    let handle = std::thread::Builder::new()
        .name("treelock-feed".to_string())
        .spawn(move || feed_loop(rx, registry))
        .map_err(|e| {
            LockError::PersistenceFailure(format!("failed to spawn change feed thread: {}", e))
        })?;
    Ok((FeedSender { sender: tx }, handle))
}

fn feed_loop(rx: Receiver<FeedMessage>, registry: Arc<LockRegistry>) {
    debug!("change feed loop started");
    while let Ok(msg) = rx.recv() {
        match msg {
            FeedMessage::Batch(batch) => {
                let applied = registry.on_change_batch(&batch);
                debug!(
                    origin = %batch.origin,
                    changes = batch.changes.len(),
                    applied,
                    "change batch processed"
                );
            }
            FeedMessage::Flush(done) => {
                if done.send(()).is_err() {
                    error!("change feed flush waiter went away");
                }
            }
            FeedMessage::Shutdown => break,
        }
    }
    debug!("change feed loop stopped");
}

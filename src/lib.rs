//! treelock: cross-process lock coordination for a hierarchical content
//! repository.
//!
//! Sessions lock nodes of a content tree, either the node alone (shallow) or
//! the node with its whole subtree (deep), and either for the life of the
//! session or until explicitly unlocked. Every repository process keeps a
//! [`LockRegistry`] of the locks it knows about, persists its own locks to a
//! shared [`LockStore`], and learns about other processes' locks from a change
//! feed.
//!
//! # Consistency
//!
//! **This is a best-effort, eventually-consistent coordinator, not a
//! linearizable lock service.** Locks taken in this process are visible to its
//! threads immediately. Locks taken elsewhere become visible only when their
//! change batch arrives, and the deep-lock subtree check runs against whatever
//! this process has seen so far. The store's per-node conflict check is the
//! only cross-process guarantee, and it covers one node, not a subtree.
//!
//! # Layout
//!
//! - [`registry`]: the per-process lock index
//! - [`session`]: token ledger, lock views and session-facing lock operations
//! - [`store`]: the durable store trait and its file-backed implementation
//! - [`feed`]: change batches and the registry's feed thread
//! - [`coordinator`]: startup and shutdown of the whole subsystem

pub mod access;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod exit_codes;
pub mod feed;
pub mod node;
pub mod registry;
pub mod session;
pub mod store;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_support;

pub use access::{AccessControl, AllowAll, Permission};
pub use config::Config;
pub use context::{ProcessId, SessionContext, StoreLayout};
pub use coordinator::LockCoordinator;
pub use descriptor::LockDescriptor;
pub use error::{LockError, Result};
pub use feed::{Change, ChangeBatch, ChangeKind, FeedSender};
pub use node::{LockId, NodeId, NodePath};
pub use registry::{LockRegistry, LockTimeout};
pub use session::{LockView, SessionLocks, TokenLedger};
pub use store::{ChangeJournal, ClearedLock, FsLockStore, LockRecord, LockStore, OrphanFlag};
pub use tree::ContentTree;

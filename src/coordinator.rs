//! Lock subsystem lifecycle.
//!
//! A [`LockCoordinator`] owns one process's [`LockRegistry`] together with the
//! drain thread of its change feed. Repositories build one at startup with
//! [`LockCoordinator::init`] and tear it down on shutdown; there is no global
//! instance.

use crate::access::{AccessControl, AllowAll};
use crate::config::Config;
use crate::context::SessionContext;
use crate::error::Result;
use crate::feed::{FeedSender, spawn_feed_loop};
use crate::registry::LockRegistry;
use crate::session::SessionLocks;
use crate::store::LockStore;
use crate::tree::ContentTree;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

/// A running lock subsystem.
pub struct LockCoordinator {
    registry: Arc<LockRegistry>,
    access: Arc<dyn AccessControl>,
    feed: FeedSender,
    feed_thread: Option<JoinHandle<()>>,
}

impl LockCoordinator {
    /// Build the registry, load every persisted lock, and start the change feed.
    pub fn init(
        config: &Config,
        store: Arc<dyn LockStore>,
        tree: Arc<dyn ContentTree>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(LockRegistry::new(
            store,
            tree,
            config.resolve_process_id(),
            config.system_workspace.clone(),
            config.default_lock_age(),
        ));
        let loaded = registry.resync()?;

        let (feed, feed_thread) =
            spawn_feed_loop(Arc::clone(&registry), config.feed_channel_capacity)?;

        info!(
            process = %registry.process_id(),
            locks = loaded,
            "lock coordinator started"
        );

        Ok(Self {
            registry,
            access: Arc::new(AllowAll),
            feed,
            feed_thread: Some(feed_thread),
        })
    }

    /// Use `access` for permission checks in sessions opened from now on.
    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// Publishing end of the registry's change feed.
    pub fn feed(&self) -> &FeedSender {
        &self.feed
    }

    /// Lock operations for a new session.
    pub fn open_session(&self, session: SessionContext) -> SessionLocks {
        SessionLocks::new(
            session,
            Arc::clone(&self.registry),
            Arc::clone(&self.access),
        )
    }

    /// Stop the change feed and wait for its thread to finish.
    ///
    /// Batches queued before the call are still applied.
    pub fn teardown(mut self) {
        self.stop_feed();
    }

    fn stop_feed(&mut self) {
        let Some(handle) = self.feed_thread.take() else {
            return;
        };
        self.feed.shutdown();
        if handle.join().is_err() {
            error!("change feed thread panicked");
        }
        info!(process = %self.registry.process_id(), "lock coordinator stopped");
    }
}

impl Drop for LockCoordinator {
    fn drop(&mut self) {
        self.stop_feed();
    }
}

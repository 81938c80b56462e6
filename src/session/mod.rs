//! Session-facing lock management.
//!
//! [`SessionLocks`] is what a repository session uses to lock and unlock
//! nodes. It layers the session's concerns on top of the shared
//! [`LockRegistry`]: permission checks, the token ledger, and the rule that a
//! node already covered by a deep ancestor lock cannot be locked again.

pub mod ledger;
pub mod view;

#[cfg(test)]
mod tests;

pub use ledger::TokenLedger;
pub use view::LockView;

use crate::access::{AccessControl, Permission};
use crate::context::SessionContext;
use crate::descriptor::LockDescriptor;
use crate::error::{LockError, Result};
use crate::node::NodeId;
use crate::registry::{LockRegistry, LockTimeout};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lock operations on behalf of one session.
pub struct SessionLocks {
    session: SessionContext,
    registry: Arc<LockRegistry>,
    ledger: Arc<TokenLedger>,
    access: Arc<dyn AccessControl>,
}

impl SessionLocks {
    pub fn new(
        session: SessionContext,
        registry: Arc<LockRegistry>,
        access: Arc<dyn AccessControl>,
    ) -> Self {
        let ledger = Arc::new(TokenLedger::new(session.clone(), Arc::clone(&registry)));
        Self {
            session,
            registry,
            ledger,
            access,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// Lock `node` and take its token.
    pub fn lock(
        &self,
        node: &NodeId,
        deep: bool,
        session_scoped: bool,
        timeout: LockTimeout,
        owner_info: Option<&str>,
    ) -> Result<LockView> {
        self.access
            .check_permission(&self.session, node, Permission::LockManagement)?;

        if let Some(existing) = self.registry.find_lock_covering(node) {
            return Err(LockError::AlreadyLocked(
                self.registry.tree().describe(existing.locked_node()),
            ));
        }

        let lock = self.registry.acquire(
            &self.session,
            node,
            deep,
            session_scoped,
            timeout,
            owner_info,
        )?;

        if let Err(e) = self.ledger.remember(lock.token()) {
            // A lock nobody holds the token for could never be unlocked
            if let Err(release_err) = self.registry.release(&self.session, node) {
                warn!(
                    node = %node,
                    error = %release_err,
                    "failed to release lock after token could not be remembered"
                );
            }
            return Err(e);
        }

        Ok(self.view(lock))
    }

    /// Unlock the lock placed exactly on `node`.
    pub fn unlock(&self, node: &NodeId) -> Result<()> {
        self.access
            .check_permission(&self.session, node, Permission::LockManagement)?;

        let lock = self
            .registry
            .lock_for(node)
            .ok_or_else(|| LockError::NotLocked(self.registry.tree().describe(node)))?;

        if !self.ledger.owns(lock.token()) {
            return Err(LockError::InvalidToken(format!(
                "session does not hold the lock token for {}",
                self.registry.tree().describe(node)
            )));
        }

        let token = self.registry.release(&self.session, node)?;
        self.ledger.discard(&token);
        Ok(())
    }

    /// The lock covering `node`.
    pub fn get_lock(&self, node: &NodeId) -> Result<LockView> {
        self.registry
            .find_lock_covering(node)
            .map(|lock| self.view(lock))
            .ok_or_else(|| LockError::NotLocked(self.registry.tree().describe(node)))
    }

    /// Whether any lock covers `node`.
    pub fn is_locked(&self, node: &NodeId) -> bool {
        self.registry.find_lock_covering(node).is_some()
    }

    /// Whether a lock is placed exactly on `node`.
    pub fn holds_lock(&self, node: &NodeId) -> bool {
        self.registry.is_locked(node)
    }

    pub fn add_lock_token(&self, token: &str) -> Result<()> {
        self.ledger.remember(token)
    }

    pub fn remove_lock_token(&self, token: &str) -> Result<()> {
        self.ledger.forget(token)
    }

    pub fn lock_tokens(&self) -> HashSet<String> {
        self.ledger.tokens()
    }

    /// Fail with `AlreadyLocked` if a lock this session doesn't hold covers
    /// `node`.
    pub fn check_can_modify(&self, node: &NodeId) -> Result<()> {
        match self.registry.find_lock_covering(node) {
            Some(lock) if !self.ledger.owns(lock.token()) => Err(LockError::AlreadyLocked(
                self.registry.tree().describe(lock.locked_node()),
            )),
            _ => Ok(()),
        }
    }

    /// End the session's hold on its locks.
    ///
    /// Session-scoped locks are released. Open-scoped locks stay in place with
    /// their tokens marked unheld so another session can take them over.
    /// Returns the tokens of the released locks.
    pub fn logout(&self) -> Result<HashSet<String>> {
        let tokens = self.ledger.tokens();
        let cleaned = self.registry.clean_session_locks(&self.session, &tokens);

        for token in tokens.difference(&cleaned) {
            if let Err(e) = self.registry.set_token_held(&self.session, token, false) {
                warn!(error = %e, "failed to mark lock token unheld at logout");
            }
        }

        self.ledger.clear();
        debug!(
            session = %self.session.session_id,
            released = cleaned.len(),
            "session logged out"
        );
        Ok(cleaned)
    }

    fn view(&self, lock: LockDescriptor) -> LockView {
        LockView::new(lock, Arc::clone(&self.registry), Arc::clone(&self.ledger))
    }
}

//! Per-session record of held lock tokens.

use crate::context::SessionContext;
use crate::error::{LockError, Result};
use crate::registry::LockRegistry;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// The set of lock tokens one session currently holds.
///
/// Holding a token is what lets a session unlock a lock or modify a locked
/// node. Tokens move between sessions through [`remember`](Self::remember) and
/// [`forget`](Self::forget); the store's held flag tracks whether any session
/// holds a given token.
pub struct TokenLedger {
    session: SessionContext,
    registry: Arc<LockRegistry>,
    tokens: Mutex<HashSet<String>>,
}

impl TokenLedger {
    pub fn new(session: SessionContext, registry: Arc<LockRegistry>) -> Self {
        Self {
            session,
            registry,
            tokens: Mutex::new(HashSet::new()),
        }
    }

    /// Record that this session holds `token`. Idempotent.
    ///
    /// Fails with `InvalidToken` when no persisted lock has the token. On any
    /// failure the token is not remembered.
    pub fn remember(&self, token: &str) -> Result<()> {
        if self.owns(token) {
            return Ok(());
        }

        if !self.registry.set_token_held(&self.session, token, true)? {
            return Err(LockError::InvalidToken(token.to_string()));
        }

        self.tokens.lock().insert(token.to_string());
        debug!(session = %self.session.session_id, "lock token remembered");
        Ok(())
    }

    /// Give up `token` so another session can take it over.
    ///
    /// Fails with `InvalidToken` unless this session holds the token. The token
    /// is dropped locally even when the store update fails; that failure is
    /// still returned.
    pub fn forget(&self, token: &str) -> Result<()> {
        if !self.owns(token) {
            return Err(LockError::InvalidToken(token.to_string()));
        }

        let result = self.registry.set_token_held(&self.session, token, false);
        self.tokens.lock().remove(token);
        debug!(session = %self.session.session_id, "lock token forgotten");
        result.map(|_| ())
    }

    pub fn owns(&self, token: &str) -> bool {
        self.tokens.lock().contains(token)
    }

    /// Snapshot of the held tokens.
    pub fn tokens(&self) -> HashSet<String> {
        self.tokens.lock().clone()
    }

    /// Drop a token locally without touching the store, e.g. after its lock
    /// was released.
    pub(crate) fn discard(&self, token: &str) -> bool {
        self.tokens.lock().remove(token)
    }

    /// Drop every token locally, returning what was held.
    pub(crate) fn clear(&self) -> HashSet<String> {
        std::mem::take(&mut *self.tokens.lock())
    }
}

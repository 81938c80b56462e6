//! Error types for treelock.
//!
//! Uses thiserror for derive macros. Every lock operation returns one of these
//! variants so callers can tell a conflict from a missing lock from a storage
//! problem without parsing messages.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for lock coordination.
///
/// Each variant maps to a specific exit code for the admin CLI.
#[derive(Error, Debug)]
pub enum LockError {
    /// The node's type does not allow locking.
    #[error("node '{0}' is not lockable")]
    NotLockable(String),

    /// The node has unsaved modifications in the requesting session.
    #[error("node '{0}' has pending changes and cannot be locked")]
    PendingChanges(String),

    /// The node (or a node the lock would cover) is already locked.
    #[error("node '{0}' is already locked")]
    AlreadyLocked(String),

    /// There is no lock to release or refresh.
    #[error("node '{0}' is not locked")]
    NotLocked(String),

    /// The session does not hold the lock token, or the token is unknown.
    #[error("invalid lock token: {0}")]
    InvalidToken(String),

    /// The access-control collaborator refused the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The durable store or change feed failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Bad configuration or command-line input.
    #[error("{0}")]
    UserError(String),
}

impl LockError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockError::UserError(_) => exit_codes::USER_ERROR,
            LockError::NotLockable(_)
            | LockError::PendingChanges(_)
            | LockError::AlreadyLocked(_)
            | LockError::NotLocked(_)
            | LockError::InvalidToken(_) => exit_codes::LOCK_FAILURE,
            LockError::AccessDenied(_) => exit_codes::ACCESS_DENIED,
            LockError::PersistenceFailure(_) => exit_codes::PERSISTENCE_FAILURE,
        }
    }

    /// Whether this is a lock conflict raised by the registry or the store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LockError::AlreadyLocked(_))
    }
}

/// Result type alias for treelock operations.
pub type Result<T> = std::result::Result<T, LockError>;

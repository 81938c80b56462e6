//! Exit code constants for the treelock admin CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 4: Lock failure (conflict, missing lock, bad token)
//! - 5: Access denied
//! - 6: Persistence failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// Lock failure: the lock state did not allow the operation.
pub const LOCK_FAILURE: i32 = 4;

/// The permission collaborator refused the operation.
pub const ACCESS_DENIED: i32 = 5;

/// The durable lock store could not be read or written.
pub const PERSISTENCE_FAILURE: i32 = 6;

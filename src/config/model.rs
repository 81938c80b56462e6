//! Config struct definition and default implementation.

use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "treelock.yaml";

/// Configuration for a lock coordinator and the admin CLI.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Store settings
    // =========================================================================
    /// Directory of the shared file store, relative to the working directory
    /// unless absolute (default: ".treelock").
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Workspace whose change batches carry lock records (default: "system").
    #[serde(default = "default_system_workspace")]
    pub system_workspace: String,

    // =========================================================================
    // Process settings
    // =========================================================================
    /// Fixed process id. Generated from user, host and pid when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,

    /// Capacity of the change feed channel, in batches.
    #[serde(default = "default_feed_channel_capacity")]
    pub feed_channel_capacity: usize,

    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Interval of the external lock garbage collector, in minutes.
    ///
    /// Locks without a requested timeout expire 10 minutes before the next
    /// collection would run.
    #[serde(default = "default_lock_gc_interval_minutes")]
    pub lock_gc_interval_minutes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            system_workspace: default_system_workspace(),
            process_id: None,
            feed_channel_capacity: default_feed_channel_capacity(),
            lock_gc_interval_minutes: default_lock_gc_interval_minutes(),
        }
    }
}

fn default_store_dir() -> String {
    ".treelock".to_string()
}

fn default_system_workspace() -> String {
    "system".to_string()
}

fn default_feed_channel_capacity() -> usize {
    1024
}

fn default_lock_gc_interval_minutes() -> u32 {
    24 * 60
}

//! Command implementations for treelock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations, and the store opening shared by all of them.

mod journal;
mod locks;

use crate::cli::{Command, GlobalArgs};
use crate::config::{CONFIG_FILE_NAME, Config};
use crate::context::StoreLayout;
use crate::error::{LockError, Result};
use crate::store::FsLockStore;
use tracing::debug;

/// Dispatch a command to its implementation.
pub fn dispatch(global: GlobalArgs, command: Command) -> Result<()> {
    match command {
        Command::List => locks::cmd_list(&global),
        Command::Show(args) => locks::cmd_show(&global, args),
        Command::Clear(args) => locks::cmd_clear(&global, args),
        Command::Expired => locks::cmd_expired(&global),
        Command::TruncateJournal(args) => journal::cmd_truncate_journal(&global, args),
    }
}

/// Load the config named by `--config`, or `./treelock.yaml` if present.
fn load_config(global: &GlobalArgs) -> Result<Config> {
    match &global.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(CONFIG_FILE_NAME),
    }
}

/// Open the file store the command operates on.
///
/// The store must already exist; the admin commands never create one.
fn open_store(global: &GlobalArgs) -> Result<(Config, FsLockStore)> {
    let config = load_config(global)?;
    let layout = match &global.store {
        Some(dir) => StoreLayout::resolve_from_cwd(dir)?,
        None => config.store_layout()?,
    };

    if !layout.root.is_dir() {
        return Err(LockError::UserError(format!(
            "lock store not found at '{}'.\n\n\
             Pass --store <dir> or set store_dir in {}.",
            layout.root.display(),
            CONFIG_FILE_NAME
        )));
    }

    debug!(store = %layout.root.display(), "opening lock store");
    let store = FsLockStore::open(
        layout,
        config.resolve_process_id(),
        config.system_workspace.clone(),
    )?;
    Ok((config, store))
}

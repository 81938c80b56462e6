//! CLI argument parsing for treelock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// treelock: inspect and repair the shared lock store of a content repository.
///
/// Locks are normally taken and released by repository processes. These
/// commands read the shared store directly:
/// - list and show active locks
/// - find locks past their advisory expiry
/// - break a lock whose holder has crashed
/// - reclaim the space held by the change journal
#[derive(Parser, Debug)]
#[command(name = "treelock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Lock store directory. Overrides `store_dir` from the config file.
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Config file (default: ./treelock.yaml if present).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available commands for treelock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all active locks.
    ///
    /// Shows owner, scope and expiry of every persisted lock.
    List,

    /// Show the lock on one node.
    Show(ShowArgs),

    /// Clear the lock on one node.
    ///
    /// Requires --force flag to prevent accidental clearing. The removal is
    /// journaled so running processes drop the lock too.
    Clear(ClearArgs),

    /// List locks past their advisory expiry.
    Expired,

    /// Drop the change journal's history.
    ///
    /// Requires --force. Processes that are running while the journal is
    /// truncated may miss changes and should resync.
    TruncateJournal(TruncateJournalArgs),
}

/// Arguments for the `show` command.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Id of the locked node.
    pub node_id: String,
}

/// Arguments for the `clear` command.
#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Id of the node whose lock should be cleared.
    pub node_id: String,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `truncate-journal` command.
#[derive(Parser, Debug)]
pub struct TruncateJournalArgs {
    /// Force truncation (required for safety).
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

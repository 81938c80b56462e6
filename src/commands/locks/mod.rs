//! Lock inspection and repair commands.

mod display;


use super::open_store;
use crate::cli::{ClearArgs, GlobalArgs, ShowArgs};
use crate::descriptor::LockDescriptor;
use crate::error::{LockError, Result};
use crate::node::NodeId;
use crate::store::{FsLockStore, LockStore, NodeFlag, OrphanFlag};
use chrono::{DateTime, Utc};
use tracing::warn;

/// One persisted lock as the admin commands see it.
#[derive(Debug, Clone)]
pub struct LockSummary {
    pub lock: LockDescriptor,
    pub held: bool,
    pub flag: Option<NodeFlag>,
}

impl LockSummary {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lock.is_expired(now)
    }
}

/// Read every lock in the store. Records that don't describe a lock are
/// logged and left out.
pub fn collect_locks(store: &FsLockStore) -> Result<Vec<LockSummary>> {
    let mut summaries = Vec::new();
    for record in store.all_lock_records()? {
        let lock = match record.descriptor() {
            Ok(lock) => lock,
            Err(e) => {
                warn!(lock = %record.lock_id, error = %e, "skipping unreadable lock record");
                continue;
            }
        };
        let flag = store.read_node_flag(lock.locked_node()).unwrap_or_else(|e| {
            warn!(lock = %record.lock_id, error = %e, "failed to read node flag");
            None
        });
        summaries.push(LockSummary {
            held: record.is_held_by_session(),
            lock,
            flag,
        });
    }
    Ok(summaries)
}

/// The lock on `node`.
pub fn find_lock(store: &FsLockStore, node: &NodeId) -> Result<LockSummary> {
    let record = store
        .read_record(&node.lock_id())?
        .ok_or_else(|| LockError::NotLocked(node.to_string()))?;
    Ok(LockSummary {
        held: record.is_held_by_session(),
        lock: record.descriptor()?,
        flag: store.read_node_flag(node)?,
    })
}

/// Node flags left without a lock record. These block their node for good.
pub fn collect_orphan_flags(store: &FsLockStore) -> Result<Vec<OrphanFlag>> {
    store.orphan_flags()
}

pub fn cmd_list(global: &GlobalArgs) -> Result<()> {
    let (_, store) = open_store(global)?;
    let locks = collect_locks(&store)?;
    let orphans = collect_orphan_flags(&store)?;
    let now = Utc::now();

    if locks.is_empty() && orphans.is_empty() {
        println!("No active locks.");
        return Ok(());
    }

    if !locks.is_empty() {
        println!("Active locks ({}):", locks.len());
        println!();
        for summary in &locks {
            display::print_lock(summary, now);
            println!();
        }

        let expired = locks.iter().filter(|l| l.is_expired(now)).count();
        if expired > 0 {
            println!(
                "Note: {} lock(s) are past their expiry. Use `treelock clear <node-id> --force` to clear.",
                expired
            );
        }
    }

    if !orphans.is_empty() {
        println!("Orphaned node flags ({}):", orphans.len());
        println!();
        for orphan in &orphans {
            display::print_orphan(orphan);
            println!();
        }
        println!(
            "Note: these nodes cannot be locked until the flag is removed. Use `treelock clear <node-id> --force` to clear."
        );
    }
    Ok(())
}

pub fn cmd_show(global: &GlobalArgs, args: ShowArgs) -> Result<()> {
    let node = NodeId::parse(&args.node_id)?;
    let (_, store) = open_store(global)?;
    let summary = find_lock(&store, &node)?;
    display::print_lock(&summary, Utc::now());
    Ok(())
}

pub fn cmd_clear(global: &GlobalArgs, args: ClearArgs) -> Result<()> {
    if !args.force {
        return Err(LockError::UserError(format!(
            "refusing to clear lock without --force flag.\n\n\
             Clearing a lock another session still relies on breaks its exclusivity.\n\
             Only clear locks if you are certain the holder has crashed.\n\n\
             To clear the lock, run:\n  treelock clear {} --force",
            args.node_id
        )));
    }

    let node = NodeId::parse(&args.node_id)?;
    let (_, store) = open_store(global)?;
    let cleared = store.clear_lock(&node)?;

    println!("Cleared lock: {}", node.lock_id());
    let Some(record) = cleared.record else {
        println!("No lock record was present; removed the orphaned node flag.");
        return Ok(());
    };
    match record.descriptor() {
        Ok(lock) => {
            println!();
            println!("Lock details:");
            display::print_details(&lock, "  ");
        }
        Err(e) => warn!(lock = %record.lock_id, error = %e, "cleared lock record was unreadable"),
    }
    Ok(())
}

pub fn cmd_expired(global: &GlobalArgs) -> Result<()> {
    let (config, store) = open_store(global)?;
    let now = Utc::now();
    let expired: Vec<_> = collect_locks(&store)?
        .into_iter()
        .filter(|l| l.is_expired(now))
        .collect();

    if expired.is_empty() {
        println!("No expired locks.");
        return Ok(());
    }

    println!("Expired locks ({}):", expired.len());
    println!();
    for summary in &expired {
        display::print_lock(summary, now);
        println!();
    }
    println!(
        "Note: still-held locks would normally be extended by {} minutes.",
        config.lock_extension_interval().num_minutes()
    );
    Ok(())
}

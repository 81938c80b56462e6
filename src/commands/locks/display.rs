//! Console rendering for lock commands.

use super::LockSummary;
use crate::store::OrphanFlag;
use crate::descriptor::LockDescriptor;
use chrono::{DateTime, Utc};

pub(super) fn print_lock(summary: &LockSummary, now: DateTime<Utc>) {
    let lock = &summary.lock;
    println!("  {} ({}):", lock.locked_node(), scope_label(lock));
    print_details(lock, "    ");
    println!(
        "    Held:       {}",
        if summary.held { "yes" } else { "no" }
    );
    if let Some(flag) = &summary.flag {
        println!("    Process:    {}", flag.process);
        println!(
            "    Created:    {}",
            flag.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    } else {
        println!("    Flag:       MISSING");
    }
    if summary.is_expired(now) {
        println!("    Status:     EXPIRED");
    }
}

pub(super) fn print_orphan(orphan: &OrphanFlag) {
    println!("  {}:", orphan.node);
    match &orphan.flag {
        Some(flag) => {
            println!("    Lock:       {}", flag.lock_id);
            println!("    Owner:      {}", flag.owner);
            println!("    Process:    {}", flag.process);
            println!(
                "    Created:    {}",
                flag.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => println!("    Flag:       UNREADABLE"),
    }
    println!("    Record:     MISSING");
}

pub(super) fn print_details(lock: &LockDescriptor, indent: &str) {
    println!("{}Lock:       {}", indent, lock.lock_id());
    println!("{}Owner:      {}", indent, lock.owner());
    println!("{}Workspace:  {}", indent, lock.workspace());
    if let Some(session) = lock.locking_session() {
        println!("{}Session:    {}", indent, session);
    }
    match lock.expires_at() {
        Some(at) => println!("{}Expires:    {}", indent, at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("{}Expires:    never", indent),
    }
}

pub(super) fn scope_label(lock: &LockDescriptor) -> &'static str {
    match (lock.is_deep(), lock.is_session_scoped()) {
        (true, true) => "deep, session",
        (true, false) => "deep, open",
        (false, true) => "shallow, session",
        (false, false) => "shallow, open",
    }
}

//! Change journal maintenance.

use super::open_store;
use crate::cli::{GlobalArgs, TruncateJournalArgs};
use crate::error::{LockError, Result};
use crate::store::journal;
use tracing::info;

pub fn cmd_truncate_journal(global: &GlobalArgs, args: TruncateJournalArgs) -> Result<()> {
    if !args.force {
        return Err(LockError::UserError(
            "refusing to truncate the change journal without --force flag.\n\n\
             Running processes lose any change they have not read yet and should\n\
             resync afterwards. Prefer truncating while no process is running.\n\n\
             To truncate the journal, run:\n  treelock truncate-journal --force"
                .to_string(),
        ));
    }

    let (_, store) = open_store(global)?;
    let dropped = journal::truncate(store.layout())?;
    info!(store = %store.layout().root.display(), bytes = dropped, "change journal truncated");
    println!("Truncated change journal ({} bytes removed).", dropped);
    Ok(())
}

//! Change journal for a file-backed lock store.
//!
//! Every committed store mutation is appended to `journal/changes.ndjson` as a
//! single JSON line holding one [`ChangeBatch`]. Processes sharing the store
//! tail this file with a [`ChangeJournal`] and forward what they read to their
//! registry's change feed.
//!
//! # Format
//!
//! Each line is a serialized `ChangeBatch`:
//! - `workspace`: the system workspace of the writing store
//! - `origin`: process id of the writer
//! - `changes`: `[{kind, path, node_id, properties}]`
//!
//! Lines are appended with a single write so concurrent writers do not
//! interleave. A reader only consumes complete (newline-terminated) lines, so
//! a line that is still being written is picked up by the next poll.
//!
//! # Retention
//!
//! The journal is never rotated by the store itself. It only matters to
//! readers that are tailing it: a process starting up resyncs from the lock
//! records and tails from [`ChangeJournal::from_end`], so old history is
//! never needed. Operators reclaim the space with [`truncate`] (the
//! `truncate-journal` command), preferably while no repository process is
//! running. A reader whose offset lies past the end of a truncated journal
//! starts over from the beginning; batches written between its last poll and
//! the truncation are lost to it, so running processes should resync their
//! registry afterwards.

use crate::context::StoreLayout;
use crate::error::{LockError, Result};
use crate::feed::{ChangeBatch, FeedSender};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::warn;

/// Append a batch to the journal, creating the journal if needed.
pub fn append_batch(layout: &StoreLayout, batch: &ChangeBatch) -> Result<()> {
    let journal_path = layout.journal_path();

    let mut line = serde_json::to_string(batch).map_err(|e| {
        LockError::PersistenceFailure(format!("failed to serialize change batch: {}", e))
    })?;
    line.push('\n');

    if !layout.journal_dir.exists() {
        fs::create_dir_all(&layout.journal_dir).map_err(|e| {
            LockError::PersistenceFailure(format!(
                "failed to create journal directory '{}': {}",
                layout.journal_dir.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&journal_path)
        .map_err(|e| {
            LockError::PersistenceFailure(format!(
                "failed to open journal '{}': {}",
                journal_path.display(),
                e
            ))
        })?;

    file.write_all(line.as_bytes()).map_err(|e| {
        LockError::PersistenceFailure(format!(
            "failed to append to journal '{}': {}",
            journal_path.display(),
            e
        ))
    })?;

    file.sync_all().map_err(|e| {
        LockError::PersistenceFailure(format!(
            "failed to sync journal '{}': {}",
            journal_path.display(),
            e
        ))
    })
}

/// Drop the whole journal history. Returns the number of bytes removed.
pub fn truncate(layout: &StoreLayout) -> Result<u64> {
    let journal_path = layout.journal_path();
    let file = match OpenOptions::new().write(true).open(&journal_path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(LockError::PersistenceFailure(format!(
                "failed to open journal '{}': {}",
                journal_path.display(),
                e
            )));
        }
    };

    let dropped = file.metadata().map(|m| m.len()).map_err(|e| {
        LockError::PersistenceFailure(format!(
            "failed to stat journal '{}': {}",
            journal_path.display(),
            e
        ))
    })?;
    file.set_len(0)
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            LockError::PersistenceFailure(format!(
                "failed to truncate journal '{}': {}",
                journal_path.display(),
                e
            ))
        })?;
    Ok(dropped)
}

/// Reader that tails the journal from a byte offset.
#[derive(Debug)]
pub struct ChangeJournal {
    path: PathBuf,
    offset: u64,
}

impl ChangeJournal {
    /// Tail from the beginning: every batch ever journaled is replayed.
    pub fn from_start(layout: &StoreLayout) -> Self {
        Self {
            path: layout.journal_path(),
            offset: 0,
        }
    }

    /// Tail from the current end: only batches appended from now on are read.
    ///
    /// Open this before resyncing a registry so nothing committed in between
    /// is missed; replaying a change the resync already saw is harmless.
    pub fn from_end(layout: &StoreLayout) -> Result<Self> {
        let path = layout.journal_path();
        let offset = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(LockError::PersistenceFailure(format!(
                    "failed to stat journal '{}': {}",
                    path.display(),
                    e
                )));
            }
        };
        Ok(Self { path, offset })
    }

    /// Byte offset of the next unread line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read every complete batch appended since the last poll.
    ///
    /// Lines that fail to parse are logged and skipped. If the journal has
    /// shrunk below the read offset it was truncated, and reading restarts
    /// from the beginning.
    pub fn poll(&mut self) -> Result<Vec<ChangeBatch>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LockError::PersistenceFailure(format!(
                    "failed to open journal '{}': {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let len = file.metadata().map(|m| m.len()).map_err(|e| {
            LockError::PersistenceFailure(format!("failed to stat journal: {}", e))
        })?;
        if len < self.offset {
            warn!(
                journal = %self.path.display(),
                offset = self.offset,
                len,
                "journal was truncated; reading from the start"
            );
            self.offset = 0;
        }

        file.seek(SeekFrom::Start(self.offset)).map_err(|e| {
            LockError::PersistenceFailure(format!("failed to seek journal: {}", e))
        })?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| {
            LockError::PersistenceFailure(format!("failed to read journal: {}", e))
        })?;

        // Only consume up to the last newline.
        let Some(end) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &buf[..=end];
        self.offset += complete.len() as u64;

        let mut batches = Vec::new();
        for line in complete.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
            match serde_json::from_slice::<ChangeBatch>(line) {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!(
                    journal = %self.path.display(),
                    error = %e,
                    "skipping unreadable journal line"
                ),
            }
        }
        Ok(batches)
    }

    /// Forward every new batch to a registry's change feed.
    pub fn pump(&mut self, feed: &FeedSender) -> Result<usize> {
        let batches = self.poll()?;
        let count = batches.len();
        for batch in batches {
            feed.publish(batch)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessId;
    use crate::node::NodePath;
    use tempfile::TempDir;

    fn batch(origin: &str, lock_id: &str) -> ChangeBatch {
        ChangeBatch::new("system", ProcessId::new(origin)).removed(
            NodePath::parse(&format!("/system/locks/{}", lock_id)).unwrap(),
            lock_id,
        )
    }

    #[test]
    fn poll_reads_appended_batches_once() {
        let temp_dir = TempDir::new().unwrap();
        let layout = StoreLayout::resolve(temp_dir.path());
        let mut journal = ChangeJournal::from_start(&layout);

        assert!(journal.poll().unwrap().is_empty());

        append_batch(&layout, &batch("p1", "lock-a")).unwrap();
        append_batch(&layout, &batch("p2", "lock-b")).unwrap();

        let read = journal.poll().unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].origin.as_str(), "p1");
        assert_eq!(read[1].changes[0].node_id, "lock-b");

        assert!(journal.poll().unwrap().is_empty());
    }

    #[test]
    fn from_end_skips_history() {
        let temp_dir = TempDir::new().unwrap();
        let layout = StoreLayout::resolve(temp_dir.path());
        append_batch(&layout, &batch("p1", "lock-a")).unwrap();

        let mut journal = ChangeJournal::from_end(&layout).unwrap();
        assert!(journal.offset() > 0);
        assert!(journal.poll().unwrap().is_empty());

        append_batch(&layout, &batch("p1", "lock-c")).unwrap();
        let read = journal.poll().unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].changes[0].node_id, "lock-c");
    }

    #[test]
    fn partial_and_garbage_lines_are_not_consumed_as_batches() {
        let temp_dir = TempDir::new().unwrap();
        let layout = StoreLayout::resolve(temp_dir.path());
        append_batch(&layout, &batch("p1", "lock-a")).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(layout.journal_path())
            .unwrap();
        file.write_all(b"not json\n{\"workspace\":").unwrap();

        let mut journal = ChangeJournal::from_start(&layout);
        let read = journal.poll().unwrap();
        assert_eq!(read.len(), 1);

        // The unterminated tail stays unread.
        let len = fs::metadata(layout.journal_path()).unwrap().len();
        assert!(journal.offset() < len);
    }

    #[test]
    fn reader_restarts_after_truncation() {
        let temp_dir = TempDir::new().unwrap();
        let layout = StoreLayout::resolve(temp_dir.path());
        let mut journal = ChangeJournal::from_start(&layout);
        append_batch(&layout, &batch("p1", "lock-a")).unwrap();
        append_batch(&layout, &batch("p1", "lock-b")).unwrap();
        assert_eq!(journal.poll().unwrap().len(), 2);

        let dropped = truncate(&layout).unwrap();
        assert_eq!(dropped, journal.offset());
        assert_eq!(fs::metadata(layout.journal_path()).unwrap().len(), 0);

        append_batch(&layout, &batch("p2", "lock-c")).unwrap();
        let read = journal.poll().unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].changes[0].node_id, "lock-c");
    }

    #[test]
    fn truncating_missing_journal_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let layout = StoreLayout::resolve(temp_dir.path());
        assert_eq!(truncate(&layout).unwrap(), 0);
        assert!(!layout.journal_path().exists());
    }
}

/// Rollback journal: append-only record of every completed mutation.
///
/// Workers append under a mutex; rollback replays the journal in strict
/// reverse order. A failed undo is logged and the rollback carries on.
use super::fs_ops;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalEntry {
    /// A file moved from `src` to `dst`.
    MovedFile { dst: PathBuf, src: PathBuf },
    /// A whole directory renamed from `src` to `dst`.
    MovedDir { dst: PathBuf, src: PathBuf },
    /// A file copied to a previously empty `dst`.
    CopiedFile { dst: PathBuf },
    /// A directory created by this run.
    CreatedDir { path: PathBuf },
    /// An overwritten destination parked at `backup`.
    BackedUp { original: PathBuf, backup: PathBuf },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct RollbackJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl RollbackJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: JournalEntry) {
        self.entries.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Delete the parked copies of overwritten destinations once the run
    /// is final, and empty the journal.
    pub fn discard_backups(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in entries {
            if let JournalEntry::BackedUp { backup, .. } = entry {
                if let Err(e) = std::fs::remove_file(&backup) {
                    warn!("Failed to remove backup {}: {}", backup.display(), e);
                }
            }
        }
    }

    /// Undo every recorded entry, newest first, and empty the journal.
    pub fn rollback(&self) -> RollbackReport {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut report = RollbackReport::default();
        info!("Rolling back {} recorded operations", entries.len());
        for entry in entries.iter().rev() {
            match undo(entry) {
                Ok(()) => report.restored += 1,
                // Shared parents are recorded once per creator; only the last
                // removal can succeed.
                Err(e) if matches!(entry, JournalEntry::CreatedDir { .. }) => {
                    debug!("Left directory in place during rollback: {:?} ({})", entry, e);
                }
                Err(e) => {
                    warn!("Rollback failed for {:?}: {}", entry, e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "Rollback finished: {} restored, {} failed",
            report.restored, report.failed
        );
        report
    }
}

fn undo(entry: &JournalEntry) -> io::Result<()> {
    match entry {
        JournalEntry::MovedFile { dst, src } => {
            if !dst.exists() {
                return Err(io::Error::new(io::ErrorKind::NotFound, "destination vanished"));
            }
            ensure_parent(src)?;
            let same = src.parent().is_some_and(|p| fs_ops::same_device(dst, p));
            fs_ops::move_file(dst, src, same)
        }
        JournalEntry::MovedDir { dst, src } => {
            if !dst.exists() {
                return Err(io::Error::new(io::ErrorKind::NotFound, "destination vanished"));
            }
            ensure_parent(src)?;
            match std::fs::rename(dst, src) {
                Ok(()) => Ok(()),
                Err(_) => fs_ops::move_dir_merge(dst, src, None),
            }
        }
        JournalEntry::CopiedFile { dst } => std::fs::remove_file(dst),
        JournalEntry::BackedUp { original, backup } => {
            if original.exists() {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "original path occupied"));
            }
            std::fs::rename(backup, original)
        }
        JournalEntry::CreatedDir { path } => std::fs::remove_dir(path),
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn undoes_in_reverse_order() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let out = dir.path().join("out");
        let dst = out.join("src.txt");
        fs::write(&src, b"payload").unwrap();

        let journal = RollbackJournal::new();
        fs::create_dir(&out).unwrap();
        journal.record(JournalEntry::CreatedDir { path: out.clone() });
        fs::rename(&src, &dst).unwrap();
        journal.record(JournalEntry::MovedFile {
            dst: dst.clone(),
            src: src.clone(),
        });

        let report = journal.rollback();
        assert_eq!(report, RollbackReport { restored: 2, failed: 0 });
        assert_eq!(fs::read(&src).unwrap(), b"payload");
        assert!(!out.exists());
        assert!(journal.is_empty());
    }

    #[test]
    fn discarding_backups_keeps_results() {
        let dir = tempfile::tempdir().unwrap();
        let result = dir.path().join("k.spc");
        let backup = dir.path().join(".k.spc.nirmatch-bak");
        fs::write(&result, b"new").unwrap();
        fs::write(&backup, b"old").unwrap();

        let journal = RollbackJournal::new();
        journal.record(JournalEntry::BackedUp {
            original: result.clone(),
            backup: backup.clone(),
        });
        journal.discard_backups();
        assert!(!backup.exists());
        assert_eq!(fs::read(&result).unwrap(), b"new");
        assert!(journal.is_empty());
    }

    #[test]
    fn failures_do_not_stop_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let copied = dir.path().join("copied.bin");
        fs::write(&copied, b"x").unwrap();

        let journal = RollbackJournal::new();
        journal.record(JournalEntry::CopiedFile { dst: copied.clone() });
        journal.record(JournalEntry::MovedFile {
            dst: dir.path().join("never-existed"),
            src: dir.path().join("src"),
        });

        let report = journal.rollback();
        assert_eq!(report, RollbackReport { restored: 1, failed: 1 });
        assert!(!copied.exists());
    }
}

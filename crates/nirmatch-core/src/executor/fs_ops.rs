/// Filesystem primitives shared by the executor, rollback, and disposal.
use super::journal::{JournalEntry, RollbackJournal};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry on permission failures (files briefly locked by a scanner
/// or the acquisition software).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Run `op`, retrying permission failures with a fixed backoff. Any other
/// error fails immediately. The final failure is logged with the attempt
/// count.
pub fn with_retry<T>(
    action: &str,
    path: &Path,
    policy: RetryPolicy,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && attempt < attempts => {
                debug!(
                    "{} {} denied (attempt {}/{}), retrying",
                    action,
                    path.display(),
                    attempt,
                    attempts
                );
                std::thread::sleep(policy.backoff);
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{} failed for {} after {} attempt(s): {}",
                    action,
                    path.display(),
                    attempt,
                    e
                );
                return Err(e);
            }
        }
    }
}

/// Whether `a` and `b` live on the same filesystem, so a rename is atomic.
#[cfg(unix)]
pub fn same_device(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev(),
        _ => false,
    }
}

/// Whether `a` and `b` share a volume prefix (drive letter or UNC share).
#[cfg(not(unix))]
pub fn same_device(a: &Path, b: &Path) -> bool {
    use std::path::Component;
    let prefix = |p: &Path| {
        std::path::absolute(p)
            .ok()
            .and_then(|abs| match abs.components().next() {
                Some(Component::Prefix(pre)) => Some(pre.as_os_str().to_ascii_lowercase()),
                _ => None,
            })
    };
    match (prefix(a), prefix(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Create `dir` and any missing ancestors, journaling each directory this
/// call created (outermost first).
pub fn create_dir_tracked(dir: &Path, journal: Option<&RollbackJournal>) -> io::Result<()> {
    let mut missing: Vec<PathBuf> = Vec::new();
    let mut cur = Some(dir);
    while let Some(p) = cur {
        if p.exists() {
            break;
        }
        missing.push(p.to_path_buf());
        cur = p.parent();
    }
    std::fs::create_dir_all(dir)?;
    if let Some(journal) = journal {
        for path in missing.into_iter().rev() {
            journal.record(JournalEntry::CreatedDir { path });
        }
    }
    Ok(())
}

/// Copy a file and carry its modification time over.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::copy(src, dst)?;
    if let Ok(modified) = std::fs::metadata(src).and_then(|m| m.modified()) {
        if let Ok(file) = std::fs::OpenOptions::new().write(true).open(dst) {
            let _ = file.set_modified(modified);
        }
    }
    Ok(())
}

/// Rename when on the same filesystem, else copy then delete the source.
pub fn move_file(src: &Path, dst: &Path, same_device: bool) -> io::Result<()> {
    if same_device {
        std::fs::rename(src, dst)
    } else {
        copy_file(src, dst)?;
        std::fs::remove_file(src)
    }
}

/// Suffix of the hidden sibling an overwritten destination is parked in
/// until the run completes or rolls back.
pub const BACKUP_SUFFIX: &str = "nirmatch-bak";

/// Rename an existing `path` to a hidden sibling and return the new path.
pub fn back_up(path: &Path) -> io::Result<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let backup = unique_destination(dir, &format!(".{name}.{BACKUP_SUFFIX}"));
    std::fs::rename(path, &backup)?;
    Ok(backup)
}

/// Run `write`, which puts a file at `dst`. With a journal, an existing
/// `dst` is set aside first and journaled so rollback restores it; a failed
/// write puts it straight back.
pub fn overwrite_guarded(
    dst: &Path,
    journal: Option<&RollbackJournal>,
    write: impl FnOnce() -> io::Result<()>,
) -> io::Result<()> {
    let backup = match journal {
        Some(_) if dst.exists() => Some(back_up(dst)?),
        _ => None,
    };
    match write() {
        Ok(()) => {
            if let (Some(journal), Some(backup)) = (journal, backup) {
                journal.record(JournalEntry::BackedUp {
                    original: dst.to_path_buf(),
                    backup,
                });
            }
            Ok(())
        }
        Err(e) => {
            if let Some(backup) = backup {
                let _ = std::fs::remove_file(dst);
                if let Err(re) = std::fs::rename(&backup, dst) {
                    warn!("Could not restore {} from {}: {}", dst.display(), backup.display(), re);
                }
            }
            Err(e)
        }
    }
}

/// Move a file, falling back to copy + delete if the rename is refused.
pub fn relocate_file(src: &Path, dst: &Path) -> io::Result<()> {
    let same = dst.parent().is_some_and(|p| same_device(src, p));
    match move_file(src, dst, same) {
        Err(e) if same && e.kind() != io::ErrorKind::NotFound => move_file(src, dst, false),
        other => other,
    }
}

/// Recursively copy `src` into `dst`, merging with whatever is there.
/// Copied files, overwritten files, and new directories are journaled.
/// Returns the number of files copied.
pub fn copy_dir_merge(src: &Path, dst: &Path, journal: Option<&RollbackJournal>) -> io::Result<usize> {
    create_dir_tracked(dst, journal)?;
    let mut copied = 0;
    for (rel, is_dir) in walk(src)? {
        let target = dst.join(&rel);
        if is_dir {
            create_dir_tracked(&target, journal)?;
            continue;
        }
        overwrite_guarded(&target, journal, || copy_file(&src.join(&rel), &target))?;
        copied += 1;
        if let Some(journal) = journal {
            journal.record(JournalEntry::CopiedFile { dst: target });
        }
    }
    Ok(copied)
}

/// Recursively move `src` into `dst`, merging with whatever is there, then
/// remove the emptied source directories. Each moved file is journaled.
pub fn move_dir_merge(src: &Path, dst: &Path, journal: Option<&RollbackJournal>) -> io::Result<()> {
    create_dir_tracked(dst, journal)?;
    let same = same_device(src, dst);
    let entries = walk(src)?;
    for (rel, is_dir) in &entries {
        let target = dst.join(rel);
        if *is_dir {
            create_dir_tracked(&target, journal)?;
            continue;
        }
        let from = src.join(rel);
        overwrite_guarded(&target, journal, || move_file(&from, &target, same))?;
        if let Some(journal) = journal {
            journal.record(JournalEntry::MovedFile {
                dst: target,
                src: from,
            });
        }
    }
    // Deepest first so parents are empty when reached.
    let mut dirs: Vec<&PathBuf> = entries.iter().filter(|(_, d)| *d).map(|(p, _)| p).collect();
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for rel in dirs {
        let _ = std::fs::remove_dir(src.join(rel));
    }
    if let Err(e) = std::fs::remove_dir(src) {
        debug!("Source directory {} not removed: {}", src.display(), e);
    }
    Ok(())
}

/// Relative paths under `root` (excluding `root`), sorted, with a
/// directory flag.
fn walk(root: &Path) -> io::Result<Vec<(PathBuf, bool)>> {
    let mut out = Vec::new();
    let walker = jwalk::WalkDir::new(root)
        .sort(true)
        .skip_hidden(false)
        .follow_links(false)
        .parallelism(jwalk::Parallelism::Serial);
    for entry in walker {
        let entry = entry.map_err(|e| io::Error::other(e.to_string()))?;
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?
            .to_path_buf();
        out.push((rel, entry.file_type().is_dir()));
    }
    Ok(out)
}

/// First free path for `name` in `dir`: `name`, then `stem_1.ext`,
/// `stem_2.ext`, ...
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    unique_destination_by(dir, name, |p| p.exists())
}

/// Like [`unique_destination`], with the caller deciding which paths are
/// taken.
pub fn unique_destination_by(dir: &Path, name: &str, mut taken: impl FnMut(&Path) -> bool) -> PathBuf {
    let candidate = dir.join(name);
    if !taken(&candidate) {
        return candidate;
    }
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_owned());
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem}_{n}{ext}"));
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn retry_stops_after_policy_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let result: io::Result<()> = with_retry("copy", Path::new("x"), policy, || {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn retry_does_not_repeat_other_errors() {
        let calls = AtomicU32::new(0);
        let result: io::Result<()> = with_retry("copy", Path::new("x"), RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(io::Error::from(io::ErrorKind::NotFound))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn retry_recovers() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let result = with_retry("move", Path::new("x"), policy, || {
            if calls.fetch_add(1, Ordering::Relaxed) == 0 {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn unique_destination_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.jpg"), dir.path().join("a.jpg"));
        fs::write(dir.path().join("a.jpg"), b"").unwrap();
        fs::write(dir.path().join("a_1.jpg"), b"").unwrap();
        assert_eq!(unique_destination(dir.path(), "a.jpg"), dir.path().join("a_2.jpg"));
        fs::create_dir(dir.path().join("C1")).unwrap();
        assert_eq!(unique_destination(dir.path(), "C1"), dir.path().join("C1_1"));
    }

    #[test]
    fn guarded_overwrite_rolls_back_to_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("new.spc");
        let dst = dir.path().join("k.spc");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();

        let journal = RollbackJournal::new();
        overwrite_guarded(&dst, Some(&journal), || copy_file(&src, &dst)).unwrap();
        journal.record(JournalEntry::CopiedFile { dst: dst.clone() });
        assert_eq!(fs::read(&dst).unwrap(), b"new");

        journal.rollback();
        assert_eq!(fs::read(&dst).unwrap(), b"old");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_guarded_write_restores_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("k.spc");
        fs::write(&dst, b"old").unwrap();

        let journal = RollbackJournal::new();
        let result = overwrite_guarded(&dst, Some(&journal), || {
            copy_file(&dir.path().join("missing"), &dst)
        });
        assert!(result.is_err());
        assert_eq!(fs::read(&dst).unwrap(), b"old");
        assert!(journal.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn move_merge_into_existing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();
        fs::write(src.join("sub/b.txt"), b"b").unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("keep.txt"), b"k").unwrap();

        let journal = RollbackJournal::new();
        move_dir_merge(&src, &dst, Some(&journal)).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("sub/b.txt")).unwrap(), b"b");
        assert!(dst.join("keep.txt").exists());

        journal.rollback();
        assert_eq!(fs::read(src.join("a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(src.join("sub/b.txt")).unwrap(), b"b");
        assert!(dst.join("keep.txt").exists());
        assert!(!dst.join("sub").exists());
    }

    #[test]
    fn copy_merge_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("x")).unwrap();
        fs::write(src.join("x/1"), b"1").unwrap();
        fs::write(src.join("2"), b"2").unwrap();
        let copied = copy_dir_merge(&src, &dir.path().join("dst"), None).unwrap();
        assert_eq!(copied, 2);
        assert!(src.join("x/1").exists());
    }
}

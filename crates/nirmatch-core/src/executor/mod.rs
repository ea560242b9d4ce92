/// Bucketed executor: runs a [`MovePlan`] on a bounded worker pool.
///
/// Order of work:
/// 1. Create every destination directory, in parallel.
/// 2. Conflict-check directory operations, then run them in parallel.
/// 3. Conflict-check every file operation, then run buckets (file ops that
///    share a source and destination directory) in parallel, files within a
///    bucket sequentially.
/// 4. On cancellation, replay the rollback journal in reverse.
///
/// Cancellation is cooperative: the token is checked before each operation,
/// and a copy that has started always completes.
pub mod conflict;
pub mod fs_ops;
pub mod journal;

pub use conflict::{auto_respond, conflict_channel, ConflictRequest, ConflictResponse};
pub use fs_ops::RetryPolicy;
pub use journal::{JournalEntry, RollbackJournal, RollbackReport};

use crate::config::Settings;
use crate::error::ExecError;
use crate::plan::{DirOp, FileOp, MovePlan, TransferMode};
use conflict::{ConflictGate, Decision};
use crossbeam_channel::Sender;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Log a bucket's progress every this many files.
const PROGRESS_LOG_EVERY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Worker pool width.
    pub workers: usize,
    pub retry: RetryPolicy,
    pub conflict_timeout: Duration,
}

impl ExecutorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            workers: settings.workers,
            retry: RetryPolicy::default(),
            conflict_timeout: settings.conflict_timeout(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-operation progress, reported from worker threads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecProgress {
    DirDone { src: PathBuf, dst: PathBuf, ok: bool },
    FileDone { src: PathBuf, dst: PathBuf, ok: bool },
    BucketDone { folder: String, ok: usize, failed: usize, total: usize },
}

pub type ProgressObserver = Arc<dyn Fn(&ExecProgress) + Send + Sync>;

/// Terminal status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Completed { failures: usize },
    CancelledRolledBack,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed { failures: 0 } => f.write_str("completed"),
            RunStatus::Completed { failures } => write!(f, "completed with {failures} failures"),
            RunStatus::CancelledRolledBack => f.write_str("cancelled and rolled back"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub dirs_ok: usize,
    pub dirs_failed: usize,
    pub files_ok: usize,
    pub files_failed: usize,
    pub cancelled: bool,
    pub rollback: Option<RollbackReport>,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn total_ok(&self) -> usize {
        self.dirs_ok + self.files_ok
    }

    pub fn total_failed(&self) -> usize {
        self.dirs_failed + self.files_failed
    }

    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::CancelledRolledBack
        } else {
            RunStatus::Completed {
                failures: self.total_failed(),
            }
        }
    }
}

/// File operations sharing `(source dir, destination dir)`.
struct Bucket<'a> {
    src_dir: PathBuf,
    dst_dir: PathBuf,
    ops: Vec<&'a FileOp>,
}

/// Group file ops into buckets, keeping first-seen bucket order.
fn bucketize<'a>(ops: &[&'a FileOp]) -> Vec<Bucket<'a>> {
    let mut index: HashMap<(PathBuf, PathBuf), usize> = HashMap::new();
    let mut buckets: Vec<Bucket<'a>> = Vec::new();
    for op in ops {
        let src_dir = parent_of(&op.src);
        let dst_dir = parent_of(&op.dst);
        let i = *index
            .entry((src_dir.clone(), dst_dir.clone()))
            .or_insert_with(|| {
                buckets.push(Bucket {
                    src_dir,
                    dst_dir,
                    ops: Vec::new(),
                });
                buckets.len() - 1
            });
        buckets[i].ops.push(op);
    }
    buckets
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// State that lives for exactly one run.
struct Run {
    gate: ConflictGate,
    journal: RollbackJournal,
}

pub struct Executor {
    mode: TransferMode,
    config: ExecutorConfig,
    conflicts: Sender<ConflictRequest>,
    cancel: CancelToken,
    observer: Option<ProgressObserver>,
}

impl Executor {
    pub fn new(mode: TransferMode, config: ExecutorConfig, conflicts: Sender<ConflictRequest>) -> Self {
        Self {
            mode,
            config,
            conflicts,
            cancel: CancelToken::new(),
            observer: None,
        }
    }

    /// Called from worker threads after every operation and bucket.
    pub fn with_observer(mut self, observer: impl Fn(&ExecProgress) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Run `plan` to completion or cancellation.
    ///
    /// Only a failure to build the worker pool is an error; per-operation
    /// failures are counted in the report.
    pub fn execute(&self, plan: &MovePlan) -> Result<ExecutionReport, ExecError> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("nirmatch-exec-{i}"))
            .build()
            .map_err(|e| ExecError::Pool(e.to_string()))?;
        let run = Run {
            gate: ConflictGate::new(self.conflicts.clone(), self.config.conflict_timeout),
            journal: RollbackJournal::new(),
        };

        let dir_ops = plan.dir_ops();
        let file_ops = plan.file_ops();
        info!(
            "Executing {} plan: {} directories, {} files, {} workers",
            self.mode,
            dir_ops.len(),
            file_ops.len(),
            self.config.workers
        );

        // 1. Destination directories. Directory ops need only their parent.
        let dest_dirs: BTreeSet<PathBuf> = dir_ops
            .iter()
            .map(|d| parent_of(&d.dst_dir))
            .chain(file_ops.iter().map(|f| parent_of(&f.dst)))
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        pool.install(|| {
            dest_dirs.par_iter().for_each(|dir| {
                if let Err(e) = fs_ops::create_dir_tracked(dir, Some(&run.journal)) {
                    warn!("Failed to create {}: {}", dir.display(), e);
                }
            })
        });

        let mut report = ExecutionReport::default();

        // 2. Directory operations.
        let mut cancelled = self.prompt_all(
            &run,
            dir_ops.iter().map(|d| (d.src_dir.as_path(), d.dst_dir.as_path())),
        );
        if !cancelled {
            let results: Vec<Option<bool>> =
                pool.install(|| dir_ops.par_iter().map(|d| self.process_dir(d, &run)).collect());
            for r in results.into_iter().flatten() {
                if r {
                    report.dirs_ok += 1;
                } else {
                    report.dirs_failed += 1;
                }
            }
        }

        // 3. File operations.
        if !cancelled {
            cancelled = self.prompt_all(
                &run,
                file_ops.iter().map(|f| (f.src.as_path(), f.dst.as_path())),
            );
        }
        if !cancelled {
            let buckets = bucketize(&file_ops);
            let results: Vec<(usize, usize)> =
                pool.install(|| buckets.par_iter().map(|b| self.process_bucket(b, &run)).collect());
            for (ok, failed) in results {
                report.files_ok += ok;
                report.files_failed += failed;
            }
        }

        // 4. Rollback on cancellation.
        cancelled |= self.cancel.is_cancelled();
        if cancelled {
            self.cancel.cancel();
            warn!("Run cancelled; rolling back");
            report.rollback = Some(run.journal.rollback());
        } else {
            run.journal.discard_backups();
        }
        report.cancelled = cancelled;
        report.elapsed = start.elapsed();

        info!(
            "Run {}: {} ok ({} dirs, {} files), {} failed ({} dirs, {} files) in {:.1?}",
            report.status(),
            report.total_ok(),
            report.dirs_ok,
            report.files_ok,
            report.total_failed(),
            report.dirs_failed,
            report.files_failed,
            report.elapsed
        );
        Ok(report)
    }

    /// Sequential conflict pre-check. Returns `true` if the run is cancelled.
    fn prompt_all<'a>(&self, run: &Run, pairs: impl Iterator<Item = (&'a Path, &'a Path)>) -> bool {
        for (src, dst) in pairs {
            if self.cancel.is_cancelled() {
                return true;
            }
            if dst.exists() && !run.gate.overwrite_all() && run.gate.check(src, dst) == Decision::Cancel {
                self.cancel.cancel();
                return true;
            }
        }
        self.cancel.is_cancelled()
    }

    /// `None` when skipped due to cancellation.
    fn process_dir(&self, op: &DirOp, run: &Run) -> Option<bool> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let result = match self.mode {
            TransferMode::Copy => fs_ops::copy_dir_merge(&op.src_dir, &op.dst_dir, Some(&run.journal)).map(|_| ()),
            TransferMode::Move => {
                let parent = parent_of(&op.dst_dir);
                if !op.dst_dir.exists() && fs_ops::same_device(&op.src_dir, &parent) {
                    std::fs::rename(&op.src_dir, &op.dst_dir).map(|()| {
                        run.journal.record(JournalEntry::MovedDir {
                            dst: op.dst_dir.clone(),
                            src: op.src_dir.clone(),
                        });
                    })
                } else {
                    fs_ops::move_dir_merge(&op.src_dir, &op.dst_dir, Some(&run.journal))
                }
            }
        };
        let ok = match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Directory {} {} -> {} failed: {}",
                    self.mode,
                    op.src_dir.display(),
                    op.dst_dir.display(),
                    e
                );
                false
            }
        };
        self.notify(&ExecProgress::DirDone {
            src: op.src_dir.clone(),
            dst: op.dst_dir.clone(),
            ok,
        });
        Some(ok)
    }

    /// Returns `(ok, failed)` for the bucket.
    fn process_bucket(&self, bucket: &Bucket<'_>, run: &Run) -> (usize, usize) {
        let folder = bucket
            .dst_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let same = fs_ops::same_device(&bucket.src_dir, &bucket.dst_dir);
        let total = bucket.ops.len();
        let (mut ok, mut failed) = (0, 0);

        for (idx, op) in bucket.ops.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let result = fs_ops::overwrite_guarded(&op.dst, Some(&run.journal), || match self.mode {
                TransferMode::Copy => fs_ops::with_retry("copy", &op.src, self.config.retry, || {
                    fs_ops::copy_file(&op.src, &op.dst)
                }),
                TransferMode::Move => fs_ops::with_retry("move", &op.src, self.config.retry, || {
                    fs_ops::move_file(&op.src, &op.dst, same)
                }),
            });
            let success = result.is_ok();
            if success {
                ok += 1;
                match self.mode {
                    TransferMode::Move => run.journal.record(JournalEntry::MovedFile {
                        dst: op.dst.clone(),
                        src: op.src.clone(),
                    }),
                    TransferMode::Copy => run.journal.record(JournalEntry::CopiedFile { dst: op.dst.clone() }),
                }
            } else {
                failed += 1;
            }
            self.notify(&ExecProgress::FileDone {
                src: op.src.clone(),
                dst: op.dst.clone(),
                ok: success,
            });
            let done = idx + 1;
            if done % PROGRESS_LOG_EVERY == 0 || done == total {
                info!("[{}] {}/{} {}", folder, done, total, self.mode);
            }
        }

        self.notify(&ExecProgress::BucketDone {
            folder,
            ok,
            failed,
            total,
        });
        (ok, failed)
    }

    fn notify(&self, progress: &ExecProgress) {
        if let Some(observer) = &self.observer {
            observer(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(src: &str, dst: &str) -> FileOp {
        FileOp {
            src: PathBuf::from(src),
            dst: PathBuf::from(dst),
        }
    }

    #[test]
    fn buckets_by_directory_pair_in_first_seen_order() {
        let ops = [
            op("/a/1", "/x/1"),
            op("/b/2", "/x/2"),
            op("/a/3", "/x/3"),
            op("/a/4", "/y/4"),
        ];
        let refs: Vec<&FileOp> = ops.iter().collect();
        let buckets = bucketize(&refs);
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].ops.len(), 2);
        assert_eq!(buckets[0].ops[1].src, PathBuf::from("/a/3"));
        assert_eq!(buckets[1].src_dir, PathBuf::from("/b"));
        assert_eq!(buckets[2].dst_dir, PathBuf::from("/y"));
    }

    #[test]
    fn status_text() {
        let mut report = ExecutionReport {
            files_failed: 2,
            ..Default::default()
        };
        assert_eq!(report.status().to_string(), "completed with 2 failures");
        report.cancelled = true;
        assert_eq!(report.status().to_string(), "cancelled and rolled back");
    }
}

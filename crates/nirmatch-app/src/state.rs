/// Application state management.
///
/// Centralises all mutable state a frontend reads and writes. The watcher
/// and the transfer thread communicate via channels; state updates happen
/// in [`AppState::tick`], which the frontend calls on a fixed cadence.
use anyhow::{bail, Context};
use crossbeam_channel::{bounded, Receiver};
use nirmatch_core::config::Settings;
use nirmatch_core::disposal::{collect_group_items, dispose_from_session, DisposalBin, DisposalReport};
use nirmatch_core::error::DisposalError;
use nirmatch_core::executor::{conflict_channel, CancelToken, ConflictRequest, ConflictResponse, ExecProgress, Executor, ExecutorConfig};
use nirmatch_core::plan::SubjectGroups;
use nirmatch_core::report::GroupsSnapshot;
use nirmatch_core::scheduler::{Scheduler, SchedulerConfig, Tick};
use nirmatch_core::selection::{self, PreparedTransfer, TransferRequest};
use nirmatch_core::session::Session;
use nirmatch_core::transfer::{run_transfer, settle_session, TransferOutcome};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

/// The current phase of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppPhase {
    /// Not watching, no transfer running.
    Idle,
    /// The scheduler is watching the role directories.
    Watching,
    /// A transfer thread is running.
    Transferring,
}

/// Capacity of the executor → frontend progress channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 4096;

/// Maximum progress messages drained per tick.
const MAX_PROGRESS_PER_TICK: usize = 300;

/// Maximum retained status lines.
const MAX_STATUS_LINES: usize = 500;

/// Live counters for the running transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub dirs_done: usize,
    pub files_done: usize,
    pub failures: usize,
    pub buckets_done: usize,
}

struct TransferHandle {
    thread: thread::JoinHandle<TransferOutcome>,
    cancel: CancelToken,
    progress_rx: Receiver<ExecProgress>,
    conflict_rx: Receiver<ConflictRequest>,
    subjects: Vec<SubjectGroups>,
    /// Phase to return to when the transfer ends.
    resume: AppPhase,
}

/// All application state.
pub struct AppState {
    pub phase: AppPhase,
    session: Session,
    scheduler: Scheduler,
    state_dir: PathBuf,
    snapshot: GroupsSnapshot,

    // ── Transfer ───────────────────────────────────────
    transfer: Option<TransferHandle>,
    pub progress: TransferProgress,
    /// Conflict waiting for [`AppState::answer_conflict`].
    pub pending_conflict: Option<ConflictRequest>,
    pub last_outcome: Option<TransferOutcome>,

    // ── Status ─────────────────────────────────────────
    /// The most recent status lines, oldest first.
    pub status: VecDeque<String>,
    /// Number of status lines ever pushed.
    status_seq: u64,
}

impl AppState {
    pub fn new(settings: Settings, state_dir: PathBuf) -> Self {
        let scheduler = Scheduler::new(SchedulerConfig::from_settings(&settings));
        Self {
            phase: AppPhase::Idle,
            session: Session::new(settings),
            scheduler,
            snapshot: GroupsSnapshot::new(&state_dir),
            state_dir,
            transfer: None,
            progress: TransferProgress::default(),
            pending_conflict: None,
            last_outcome: None,
            status: VecDeque::new(),
            status_seq: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sequence number of the next status line. Pass it back to
    /// [`AppState::status_since`] to read only newer lines.
    pub fn status_seq(&self) -> u64 {
        self.status_seq
    }

    /// Retained status lines pushed at or after sequence number `seen`.
    pub fn status_since(&self, seen: u64) -> impl Iterator<Item = &str> {
        let first = self.status_seq - self.status.len() as u64;
        let skip = seen.saturating_sub(first) as usize;
        self.status.iter().skip(skip).map(String::as_str)
    }

    pub fn is_watching(&self) -> bool {
        self.scheduler.is_watching()
    }

    pub fn is_transferring(&self) -> bool {
        self.transfer.is_some()
    }

    /// Replace settings. Refused while a transfer runs.
    pub fn apply_settings(&mut self, settings: Settings) -> anyhow::Result<()> {
        if self.is_transferring() {
            bail!("Settings cannot change while a transfer is running");
        }
        let was_watching = self.is_watching();
        if was_watching {
            self.stop_watching();
        }
        self.scheduler = Scheduler::new(SchedulerConfig::from_settings(&settings));
        self.session.set_settings(settings);
        if was_watching {
            self.start_watching(Instant::now())?;
        }
        Ok(())
    }

    /// One-shot scan without watching.
    pub fn rescan(&mut self) -> usize {
        let groups = self.session.full_rescan().len();
        self.persist_snapshot();
        self.push_status(format!("Rescan: {groups} groups"));
        groups
    }

    /// Start watching. Runs the cold scan first.
    pub fn start_watching(&mut self, now: Instant) -> anyhow::Result<usize> {
        let groups = self
            .scheduler
            .start(&mut self.session, now)
            .context("Failed to start watching")?;
        if self.phase == AppPhase::Idle {
            self.phase = AppPhase::Watching;
        }
        self.persist_snapshot();
        self.push_status(format!("Watching started: {groups} groups"));
        Ok(groups)
    }

    pub fn stop_watching(&mut self) {
        self.scheduler.stop();
        if self.phase == AppPhase::Watching {
            self.phase = AppPhase::Idle;
        }
        if let Some(t) = self.transfer.as_mut() {
            t.resume = AppPhase::Idle;
        }
        self.push_status("Watching stopped".into());
    }

    /// Advance timers and drain every channel. Returns `true` if anything
    /// changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;

        for tick in self.scheduler.pump(&mut self.session, now) {
            changed = true;
            let line = match tick {
                Tick::Incremental { events, groups } => format!("{events} changes folded, {groups} groups"),
                Tick::FullRescan { groups } => format!("Full rescan: {groups} groups"),
                Tick::WatcherRestarted => "Watcher restarted".to_owned(),
                Tick::WatcherDown(reason) => format!("Watcher down: {reason}"),
            };
            self.push_status(line);
        }
        if changed {
            self.persist_snapshot();
        }

        changed |= self.process_transfer_messages();
        changed
    }

    // ─── Transfer ────────────────────────────────────────

    /// Select, prune, and plan; then run the transfer on a background
    /// thread. NIR pruning is refused while watching.
    pub fn start_transfer(
        &mut self,
        request: TransferRequest,
        metadata_only: bool,
    ) -> anyhow::Result<PreparedTransfer> {
        if self.is_transferring() {
            bail!("A transfer is already running");
        }
        if request.nir_keep.is_some_and(|k| k > 0) && self.is_watching() {
            return Err(DisposalError::WatchingActive.into());
        }

        let now = chrono::Local::now().naive_local();
        let prepared = selection::prepare_transfer(&mut self.session, &request, &self.state_dir, now)?;
        for (subject, at) in &prepared.already_moved {
            self.push_status(format!("Warning: {subject} was already moved today at {at}"));
        }
        let Some(plan) = prepared.plan.clone() else {
            self.push_status("Nothing to transfer".into());
            return Ok(prepared);
        };

        let (conflict_tx, conflict_rx) = conflict_channel();
        let (progress_tx, progress_rx) = bounded(PROGRESS_CHANNEL_CAPACITY);
        let executor = Executor::new(
            request.mode,
            ExecutorConfig::from_settings(self.session.settings()),
            conflict_tx,
        )
        .with_observer(move |p| {
            let _ = progress_tx.try_send(p.clone());
        });
        let cancel = executor.cancel_token();
        let state_dir = self.state_dir.clone();

        let thread = thread::Builder::new()
            .name("nirmatch-transfer".into())
            .spawn(move || run_transfer(&executor, &plan, &state_dir, metadata_only))
            .context("Failed to spawn transfer thread")?;

        self.transfer = Some(TransferHandle {
            thread,
            cancel,
            progress_rx,
            conflict_rx,
            subjects: prepared.subjects.clone(),
            resume: self.phase,
        });
        self.phase = AppPhase::Transferring;
        self.progress = TransferProgress::default();
        self.last_outcome = None;
        self.push_status(format!("{} started", request.mode));
        Ok(prepared)
    }

    /// Answer the pending conflict, if any.
    pub fn answer_conflict(&mut self, response: ConflictResponse) -> bool {
        match self.pending_conflict.take() {
            Some(req) => {
                info!("Conflict on {} answered {:?}", req.dst.display(), response);
                req.respond(response);
                true
            }
            None => false,
        }
    }

    /// Request cooperative cancellation of the running transfer.
    pub fn cancel_transfer(&mut self) {
        if let Some(t) = &self.transfer {
            t.cancel.cancel();
            self.push_status("Cancelling transfer".into());
        }
        if let Some(req) = self.pending_conflict.take() {
            req.respond(ConflictResponse::Cancel);
        }
    }

    /// Drain progress and conflict channels and reap a finished thread.
    fn process_transfer_messages(&mut self) -> bool {
        let Some(handle) = &self.transfer else {
            return false;
        };
        let mut changed = false;

        let mut drained = 0usize;
        while drained < MAX_PROGRESS_PER_TICK {
            let Ok(msg) = handle.progress_rx.try_recv() else {
                break;
            };
            drained += 1;
            changed = true;
            match msg {
                ExecProgress::DirDone { ok, .. } => {
                    self.progress.dirs_done += 1;
                    if !ok {
                        self.progress.failures += 1;
                    }
                }
                ExecProgress::FileDone { ok, .. } => {
                    self.progress.files_done += 1;
                    if !ok {
                        self.progress.failures += 1;
                    }
                }
                ExecProgress::BucketDone { .. } => self.progress.buckets_done += 1,
            }
        }

        let incoming = if self.pending_conflict.is_none() {
            handle.conflict_rx.try_recv().ok()
        } else {
            None
        };
        // Reap only once every progress message has been counted.
        let finished = handle.thread.is_finished() && handle.progress_rx.is_empty();

        if let Some(req) = incoming {
            self.push_status(format!("Conflict: {} already exists", req.name));
            self.pending_conflict = Some(req);
            changed = true;
        }
        if finished {
            self.finish_transfer();
            changed = true;
        }
        changed
    }

    fn finish_transfer(&mut self) {
        let Some(handle) = self.transfer.take() else {
            return;
        };
        self.pending_conflict = None;
        let outcome = match handle.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Transfer thread panicked");
                TransferOutcome::Failed("transfer thread panicked".into())
            }
        };
        settle_session(&mut self.session, &handle.subjects, &outcome);
        self.phase = if self.is_watching() { AppPhase::Watching } else { handle.resume };
        self.push_status(format!("Transfer {}", outcome.summary()));
        self.persist_snapshot();
        self.last_outcome = Some(outcome);
    }

    // ─── Disposal ────────────────────────────────────────

    /// Move sources into the disposal tree. Each selector is either a group
    /// name (all of its sources) or the path of a single source.
    pub fn dispose_groups(&mut self, names: &[&str], subject: &str) -> anyhow::Result<DisposalReport> {
        if self.is_watching() {
            return Err(DisposalError::WatchingActive.into());
        }
        if self.is_transferring() {
            bail!("Disposal is not allowed while a transfer is running");
        }
        let bin = DisposalBin::from_settings(self.session.settings())?;
        let items: Vec<_> = self
            .session
            .groups()
            .iter()
            .flat_map(|g| {
                let whole = names.contains(&g.name.as_str());
                collect_group_items(g)
                    .into_iter()
                    .filter(move |item| whole || names.iter().any(|n| Path::new(n) == item.path))
            })
            .collect();
        let date = selection::disposal_date(chrono::Local::now().naive_local());
        let report = dispose_from_session(&mut self.session, &bin, &date, subject, items);
        self.push_status(format!(
            "Disposed {} items ({} already gone, {} failed)",
            report.moved_count(),
            report.vanished.len(),
            report.failed.len()
        ));
        self.persist_snapshot();
        Ok(report)
    }

    // ── Helpers ─────────────────────────────────────────

    fn persist_snapshot(&mut self) {
        if let Err(e) = self.snapshot.update(self.session.groups()) {
            warn!("Failed to write groups snapshot: {}", e);
        }
    }

    fn push_status(&mut self, line: String) {
        info!("{}", line);
        if self.status.len() >= MAX_STATUS_LINES {
            self.status.pop_front();
        }
        self.status.push_back(line);
        self.status_seq += 1;
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        if let Some(t) = &self.transfer {
            t.cancel.cancel();
        }
        if let Some(req) = self.pending_conflict.take() {
            req.respond(ConflictResponse::Cancel);
        }
    }
}

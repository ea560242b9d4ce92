/// Transfer orchestration: persist the plan, execute it, and record the
/// outcome in the movement log.
///
/// Runs entirely on the calling thread (the app runs it on a background
/// thread). Any fatal error is caught here, logged, and surfaced as
/// [`TransferOutcome::Failed`].
use crate::executor::{ExecutionReport, Executor};
use crate::movelog::MoveLog;
use crate::plan::{save_move_plan, MovePlan, SubjectGroups};
use crate::session::Session;
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Plan saved; nothing executed.
    MetadataOnly { plan_paths: BTreeMap<String, PathBuf> },
    /// Executor finished (possibly cancelled and rolled back).
    Finished {
        report: ExecutionReport,
        plan_paths: BTreeMap<String, PathBuf>,
    },
    /// A fatal error stopped the run.
    Failed(String),
}

impl TransferOutcome {
    /// One-line terminal status.
    pub fn summary(&self) -> String {
        match self {
            TransferOutcome::MetadataOnly { plan_paths } => {
                format!("plan saved for {} subject(s)", plan_paths.len())
            }
            TransferOutcome::Finished { report, .. } => report.status().to_string(),
            TransferOutcome::Failed(reason) => format!("failed: {reason}"),
        }
    }
}

pub fn run_transfer(
    executor: &Executor,
    plan: &MovePlan,
    state_dir: &Path,
    metadata_only: bool,
) -> TransferOutcome {
    let plan_paths = match save_move_plan(plan, state_dir) {
        Ok(paths) => paths,
        Err(e) => {
            error!("Transfer aborted: {}", e);
            return TransferOutcome::Failed(e.to_string());
        }
    };
    if metadata_only {
        info!("Metadata only: plan saved, no files touched");
        return TransferOutcome::MetadataOnly { plan_paths };
    }

    let report = match executor.execute(plan) {
        Ok(r) => r,
        Err(e) => {
            error!("Transfer aborted: {}", e);
            return TransferOutcome::Failed(e.to_string());
        }
    };

    if !report.cancelled {
        record_moves(plan, &plan_paths, &report, state_dir);
    }
    TransferOutcome::Finished { report, plan_paths }
}

/// Fold a finished transfer back into the session: the NIR keys of every
/// transferred group are consumed and the pool is rescanned. Cancelled or
/// failed runs leave the session untouched.
pub fn settle_session(session: &mut Session, subjects: &[SubjectGroups], outcome: &TransferOutcome) {
    let TransferOutcome::Finished { report, .. } = outcome else {
        return;
    };
    if report.cancelled {
        return;
    }
    session.consume_nir_keys(subjects.iter().flat_map(|sg| sg.groups.iter()));
    session.full_rescan();
}

fn record_moves(
    plan: &MovePlan,
    plan_paths: &BTreeMap<String, PathBuf>,
    report: &ExecutionReport,
    state_dir: &Path,
) {
    let log = MoveLog::new(state_dir);
    let at = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    for (date, subject, _) in plan.subjects() {
        let extra = serde_json::json!({
            "plan_path": plan_paths.get(subject),
            "stats": {
                "dirs_ok": report.dirs_ok,
                "dirs_fail": report.dirs_failed,
                "files_ok": report.files_ok,
                "files_fail": report.files_failed,
                "total_ok": report.total_ok(),
                "total_fail": report.total_failed(),
                "cancelled": report.cancelled,
            },
        });
        match log.record(date, subject, &at, plan.mode, Some(extra)) {
            Ok(()) => info!("Recorded transfer of {} on {}", subject, date),
            Err(e) => warn!("Failed to record transfer of {}: {}", subject, e),
        }
    }
}

/// Transfer selection: which groups go to which subject, and the plan
/// that results.
use crate::config::{LineMode, Settings};
use crate::disposal::{dispose_from_session, select_nir_prunes, DisposalBin, DisposalReport};
use crate::model::{Group, Line};
use crate::movelog::MoveLog;
use crate::plan::{build_move_plan, MovePlan, SubjectGroups, TransferMode};
use crate::session::Session;
use chrono::NaiveDateTime;
use std::path::Path;
use tracing::{info, warn};

/// Fallback subject names when none is configured.
pub const UNKNOWN_SUBJECT: &str = "UnknownFolder";
pub const UNKNOWN_SUBJECT2: &str = "UnknownFolder2";

/// Which lines a transfer covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineSelection {
    #[default]
    Both,
    Only(Line),
}

impl LineSelection {
    pub fn includes(self, line: Line) -> bool {
        match self {
            LineSelection::Both => true,
            LineSelection::Only(l) => l == line,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransferRequest {
    pub mode: TransferMode,
    pub lines: LineSelection,
    /// Earliest N groups per subject.
    pub limit: Option<usize>,
    /// Keep only the oldest N NIR bundles per subject; the rest are
    /// disposed of before planning.
    pub nir_keep: Option<usize>,
}

/// Everything decided before execution.
#[derive(Debug)]
pub struct PreparedTransfer {
    /// Plan date (`yyMMdd`).
    pub date: String,
    pub subjects: Vec<SubjectGroups>,
    pub plan: Option<MovePlan>,
    /// Groups dropped for missing slots.
    pub skipped: usize,
    /// NIR pruning outcome per subject.
    pub pruned: Vec<(String, DisposalReport)>,
    /// `(subject, last move time)` for subjects already moved today.
    pub already_moved: Vec<(String, String)>,
}

/// Date folder used for plans and the movement log.
pub fn plan_date(now: NaiveDateTime) -> String {
    now.format("%y%m%d").to_string()
}

/// Date folder used in the disposal tree.
pub fn disposal_date(now: NaiveDateTime) -> String {
    now.format("%Y%m%d").to_string()
}

/// Keep complete groups; log every other one with its missing slots.
pub fn filter_fully_matched(groups: &[Group]) -> (Vec<Group>, usize) {
    let mut kept = Vec::new();
    let mut skipped = 0;
    for g in groups {
        if g.is_complete() {
            kept.push(g.clone());
        } else {
            skipped += 1;
            let missing: Vec<String> = g.missing_slots().iter().map(|s| s.to_string()).collect();
            warn!(
                "[line {}] Skipping {}: missing {}",
                g.line,
                g.name,
                missing.join(", ")
            );
        }
    }
    (kept, skipped)
}

/// Earliest `limit` groups by timestamp.
pub fn limit_count(mut groups: Vec<Group>, limit: Option<usize>) -> Vec<Group> {
    groups.sort_by_key(|g| g.timestamp);
    if let Some(n) = limit.filter(|n| *n > 0) {
        if groups.len() > n {
            info!("Transferring {} of {} groups", n, groups.len());
            groups.truncate(n);
        }
    }
    groups
}

/// Subject folder for `line`.
pub fn subject_for(line: Line, settings: &Settings) -> String {
    let (name, fallback) = match (settings.line_mode, line) {
        (LineMode::Separated, Line::Two) => (&settings.subject_folder2, UNKNOWN_SUBJECT2),
        _ => (&settings.subject_folder, UNKNOWN_SUBJECT),
    };
    let name = name.trim();
    if name.is_empty() {
        fallback.to_owned()
    } else {
        name.to_owned()
    }
}

/// Split `groups` by destination subject, first-seen subject order.
pub fn assign_subjects(groups: Vec<Group>, settings: &Settings) -> Vec<SubjectGroups> {
    let mut out: Vec<SubjectGroups> = Vec::new();
    for g in groups {
        let subject = subject_for(g.line, settings);
        match out.iter_mut().find(|sg| sg.subject == subject) {
            Some(sg) => sg.groups.push(g),
            None => out.push(SubjectGroups {
                subject,
                groups: vec![g],
            }),
        }
    }
    out
}

/// In move mode, subjects already recorded in today's movement log with
/// their last move time.
pub fn previously_moved(
    log: &MoveLog,
    date: &str,
    subjects: &[SubjectGroups],
    mode: TransferMode,
) -> Vec<(String, String)> {
    if mode != TransferMode::Move {
        return Vec::new();
    }
    subjects
        .iter()
        .filter_map(|sg| {
            log.was_subject_moved(date, &sg.subject).map(|at| {
                warn!("{} was already moved today at {}", sg.subject, at);
                (sg.subject.clone(), at)
            })
        })
        .collect()
}

/// Select, prune, and plan a transfer from the session's current groups.
///
/// NIR pruning mutates the disk and the pool immediately; the caller must
/// not be watching.
pub fn prepare_transfer(
    session: &mut Session,
    request: &TransferRequest,
    state_dir: &Path,
    now: NaiveDateTime,
) -> crate::Result<PreparedTransfer> {
    let settings = session.settings().clone();
    let output = settings.output_root()?.to_path_buf();
    let date = plan_date(now);

    let (complete, skipped) = filter_fully_matched(session.groups());
    let selected: Vec<Group> = complete
        .into_iter()
        .filter(|g| request.lines.includes(g.line))
        .collect();

    let mut subjects = assign_subjects(selected, &settings);
    for sg in &mut subjects {
        sg.groups = limit_count(std::mem::take(&mut sg.groups), request.limit);
    }

    let mut pruned = Vec::new();
    if let Some(keep) = request.nir_keep.filter(|k| *k > 0) {
        let bin = DisposalBin::from_settings(&settings)?;
        let disposal_day = disposal_date(now);
        for sg in &mut subjects {
            let items = select_nir_prunes(&sg.groups, keep);
            if items.is_empty() {
                continue;
            }
            info!("Pruning {} NIR files for {} (keeping {})", items.len(), sg.subject, keep);
            let report = dispose_from_session(session, &bin, &disposal_day, &sg.subject, items);
            for (item, _) in &report.moved {
                for g in &mut sg.groups {
                    if g.nir.as_ref().is_some_and(|n| n.paths().contains(&item.path.as_path())) {
                        g.nir = None;
                    }
                }
            }
            pruned.push((sg.subject.clone(), report));
        }
    }

    let already_moved = previously_moved(&MoveLog::new(state_dir), &date, &subjects, request.mode);
    let plan = build_move_plan(&date, &subjects, &output, &settings.naming, request.mode, now);
    if plan.is_none() {
        info!("Nothing to transfer");
    }

    Ok(PreparedTransfer {
        date,
        subjects,
        plan,
        skipped,
        pruned,
        already_moved,
    })
}

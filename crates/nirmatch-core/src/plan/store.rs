/// Plan persistence: one `move_plan.json` per subject and date.
use super::MovePlan;
use crate::error::PlanError;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const PLAN_FILE: &str = "move_plan.json";

/// `<state_dir>/<date>/<subject>/move_plan.json`
pub fn plan_path(state_dir: &Path, date: &str, subject: &str) -> PathBuf {
    state_dir.join(date).join(subject).join(PLAN_FILE)
}

/// Write each subject's slice of `plan` to its own file.
///
/// Files are written to a temporary sibling, synced, and renamed into
/// place, so an interrupted write never leaves a truncated plan.
pub fn save_move_plan(plan: &MovePlan, state_dir: &Path) -> Result<BTreeMap<String, PathBuf>, PlanError> {
    let mut written = BTreeMap::new();
    for (date, subject, _) in plan.subjects() {
        let Some(slice) = plan.for_subject(date, subject) else {
            continue;
        };
        let path = plan_path(state_dir, date, subject);
        write_atomic(&path, &serde_json::to_vec_pretty(&slice)?).map_err(|source| PlanError::Write {
            path: path.clone(),
            source,
        })?;
        info!("Saved plan for {} to {}", subject, path.display());
        written.insert(subject.to_owned(), path);
    }
    Ok(written)
}

pub fn load_move_plan(path: &Path) -> Result<MovePlan, PlanError> {
    let bytes = std::fs::read(path).map_err(|source| PlanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write `bytes` to a synced temporary sibling and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)
}

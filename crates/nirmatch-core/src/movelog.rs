/// Movement log: which subjects were transferred on a work date.
///
/// One `moved_subjects.json` per date directory in the state dir. Used to
/// warn before the same subject is moved twice in a day.
use crate::executor::fs_ops;
use crate::plan::store::write_atomic;
use crate::plan::TransferMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MOVELOG_FILE: &str = "moved_subjects.json";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveLogMeta {
    pub date: String,
    pub app: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// ISO-8601 local time, seconds precision.
    pub at: String,
    pub mode: TransferMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveLogFile {
    pub meta: MoveLogMeta,
    #[serde(default)]
    pub subjects: BTreeMap<String, Vec<MoveRecord>>,
}

pub struct MoveLog {
    state_dir: PathBuf,
}

impl MoveLog {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn path(&self, date: &str) -> PathBuf {
        self.state_dir.join(date).join(MOVELOG_FILE)
    }

    fn empty(date: &str) -> MoveLogFile {
        MoveLogFile {
            meta: MoveLogMeta {
                date: date.to_owned(),
                app: crate::APP_NAME.to_owned(),
            },
            subjects: BTreeMap::new(),
        }
    }

    /// Load the log for `date`. A missing or unreadable file yields an
    /// empty log.
    pub fn load(&self, date: &str) -> MoveLogFile {
        let path = self.path(date);
        match read(&path) {
            Ok(Some(log)) => log,
            Ok(None) => Self::empty(date),
            Err(Unreadable::Corrupt(e)) => {
                warn!("Ignoring corrupt movement log {}: {}", path.display(), e);
                Self::empty(date)
            }
            Err(Unreadable::Io(e)) => {
                warn!("Failed to read movement log {}: {}", path.display(), e);
                Self::empty(date)
            }
        }
    }

    /// Append a record for `subject`. A corrupt log is renamed aside and a
    /// fresh one started; an unreadable one is an error.
    pub fn record(
        &self,
        date: &str,
        subject: &str,
        at: &str,
        mode: TransferMode,
        extra: Option<serde_json::Value>,
    ) -> crate::Result<()> {
        let path = self.path(date);
        let mut log = match read(&path) {
            Ok(Some(log)) => log,
            Ok(None) => Self::empty(date),
            Err(Unreadable::Corrupt(e)) => {
                let aside = set_aside(&path)?;
                warn!(
                    "Movement log {} is corrupt ({}); kept as {} and starting a new one",
                    path.display(),
                    e,
                    aside.display()
                );
                Self::empty(date)
            }
            Err(Unreadable::Io(e)) => return Err(e.into()),
        };
        log.subjects.entry(subject.to_owned()).or_default().push(MoveRecord {
            at: at.to_owned(),
            mode,
            extra,
        });
        write_atomic(&path, &serde_json::to_vec_pretty(&log)?)?;
        Ok(())
    }

    /// Timestamp of the latest record for `subject` on `date`, if any.
    pub fn was_subject_moved(&self, date: &str, subject: &str) -> Option<String> {
        self.load(date)
            .subjects
            .get(subject)
            .and_then(|records| records.last())
            .map(|r| r.at.clone())
    }
}

enum Unreadable {
    Io(std::io::Error),
    Corrupt(serde_json::Error),
}

/// `Ok(None)` when the file does not exist.
fn read(path: &Path) -> Result<Option<MoveLogFile>, Unreadable> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Unreadable::Io(e)),
    };
    serde_json::from_slice(&bytes).map(Some).map_err(Unreadable::Corrupt)
}

/// Rename a corrupt log to `moved_subjects.corrupt.json` (suffixed if taken).
fn set_aside(path: &Path) -> std::io::Result<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let aside = fs_ops::unique_destination(dir, "moved_subjects.corrupt.json");
    std::fs::rename(path, &aside)?;
    Ok(aside)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_and_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let log = MoveLog::new(dir.path());
        assert_eq!(log.was_subject_moved("240521", "S1"), None);

        log.record("240521", "S1", "2024-05-21T10:00:00", TransferMode::Move, None)
            .unwrap();
        log.record(
            "240521",
            "S1",
            "2024-05-21T11:00:00",
            TransferMode::Copy,
            Some(serde_json::json!({"stats": {"files_ok": 3}})),
        )
        .unwrap();

        assert_eq!(
            log.was_subject_moved("240521", "S1").as_deref(),
            Some("2024-05-21T11:00:00")
        );
        assert_eq!(log.was_subject_moved("240522", "S1"), None);

        let file = log.load("240521");
        assert_eq!(file.meta.app, "nirmatch");
        assert_eq!(file.subjects["S1"].len(), 2);
        let raw = std::fs::read_to_string(log.path("240521")).unwrap();
        assert_eq!(raw.matches("\"extra\"").count(), 1);
    }

    #[test]
    fn corrupt_log_is_kept_aside_before_a_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let log = MoveLog::new(dir.path());
        let day = dir.path().join("240521");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(log.path("240521"), b"{not json").unwrap();
        assert_eq!(log.was_subject_moved("240521", "S1"), None);

        log.record("240521", "S1", "t", TransferMode::Move, None).unwrap();
        assert_eq!(log.was_subject_moved("240521", "S1").as_deref(), Some("t"));
        assert_eq!(
            std::fs::read(day.join("moved_subjects.corrupt.json")).unwrap(),
            b"{not json"
        );
        assert!(!day.join("moved_subjects.json.tmp").exists());

        // A second corruption does not clobber the first one kept aside.
        std::fs::write(log.path("240521"), b"[").unwrap();
        log.record("240521", "S2", "u", TransferMode::Move, None).unwrap();
        assert!(day.join("moved_subjects.corrupt_1.json").is_file());
        assert_eq!(log.was_subject_moved("240521", "S2").as_deref(), Some("u"));
    }
}

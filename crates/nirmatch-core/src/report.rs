/// Reports: groups snapshot, CSV export, and the output inventory.
use crate::model::Group;
use chrono::Local;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const GROUPS_SNAPSHOT_FILE: &str = "groups_state.json";

// ─── Groups snapshot ────────────────────────────────────────────

#[derive(Serialize)]
struct SnapshotDoc<'a> {
    saved_at: String,
    groups: &'a [Group],
}

/// Writes `groups_state.json` whenever the group list actually changes.
pub struct GroupsSnapshot {
    path: PathBuf,
    last_hash: Option<u64>,
}

impl GroupsSnapshot {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(GROUPS_SNAPSHOT_FILE),
            last_hash: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot if `groups` differs from the last one written.
    /// Returns whether a write happened.
    pub fn update(&mut self, groups: &[Group]) -> crate::Result<bool> {
        let canonical = serde_json::to_vec(groups)?;
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        let hash = hasher.finish();
        if self.last_hash == Some(hash) {
            debug!("Groups unchanged, snapshot not rewritten");
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = SnapshotDoc {
            saved_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            groups,
        };
        std::fs::write(&self.path, serde_json::to_vec_pretty(&doc)?)?;
        self.last_hash = Some(hash);
        debug!("Wrote {} groups to {}", groups.len(), self.path.display());
        Ok(true)
    }
}

// ─── CSV export ─────────────────────────────────────────────────

/// Write one row per group.
pub fn export_groups_csv(groups: &[Group], path: &Path) -> crate::Result<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "name",
        "line",
        "timestamp",
        "completeness",
        "nir_key",
        "normal_folder",
        "camera_files",
    ])?;
    for g in groups {
        let completeness = if g.is_complete() { "complete" } else { "incomplete" };
        let cameras: Vec<String> = g
            .cams
            .iter()
            .flatten()
            .map(|slot| format!("{}:{}", slot.role, slot.file.name))
            .collect();
        writer.write_record([
            g.name.clone(),
            g.line.to_string(),
            g.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            completeness.to_owned(),
            g.nir.as_ref().map(|n| n.key.to_string()).unwrap_or_default(),
            g.normal
                .as_ref()
                .map(|n| n.folder.display().to_string())
                .unwrap_or_default(),
            cameras.join(";"),
        ])?;
    }
    writer.flush()?;
    info!("Exported {} groups to {}", groups.len(), path.display());
    Ok(groups.len())
}

// ─── Output inventory ───────────────────────────────────────────

/// Relative file names under each output subfolder of one subject, keyed by
/// the subfolder's path relative to the subject (`with NIR/Nir`, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SubjectInventory {
    pub date: String,
    pub subject: String,
    pub collected_at: String,
    pub file_count: usize,
    pub folders: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InventorySummary {
    pub date: String,
    pub total_files: usize,
    pub saved: Vec<PathBuf>,
}

/// Walk a work-date output folder and write
/// `collected_filenames_<subject>.json` next to each subject folder.
///
/// Only folders containing a `with NIR` or `without NIR` child count as
/// subjects.
pub fn collect_output_inventory(
    date_dir: &Path,
    with_nir: &str,
    without_nir: &str,
) -> crate::Result<InventorySummary> {
    let date = date_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let collected_at = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    let mut summary = InventorySummary {
        date: date.clone(),
        ..Default::default()
    };

    let mut subjects: Vec<PathBuf> = std::fs::read_dir(date_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && (p.join(with_nir).is_dir() || p.join(without_nir).is_dir()))
        .collect();
    subjects.sort();

    for subject_dir in subjects {
        let subject = subject_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let inventory = inventory_for(&subject_dir, &date, &subject, &collected_at, &[with_nir, without_nir]);
        let out = date_dir.join(format!("collected_filenames_{subject}.json"));
        match std::fs::write(&out, serde_json::to_vec_pretty(&inventory)?) {
            Ok(()) => {
                info!("{}: {} files -> {}", subject, inventory.file_count, out.display());
                summary.total_files += inventory.file_count;
                summary.saved.push(out);
            }
            Err(e) => warn!("Failed to write inventory {}: {}", out.display(), e),
        }
    }
    Ok(summary)
}

fn inventory_for(
    subject_dir: &Path,
    date: &str,
    subject: &str,
    collected_at: &str,
    branches: &[&str],
) -> SubjectInventory {
    let mut inv = SubjectInventory {
        date: date.to_owned(),
        subject: subject.to_owned(),
        collected_at: collected_at.to_owned(),
        ..Default::default()
    };
    for branch in branches {
        let root = subject_dir.join(branch);
        if !root.is_dir() {
            continue;
        }
        // Files are attributed to the folder two levels below the subject
        // (`with NIR/Nir`), or three for per-camera folders.
        for entry in jwalk::WalkDir::new(&root).sort(true).skip_hidden(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Inventory walk error under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Ok(rel) = path.strip_prefix(&root) else {
                continue;
            };
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if parts.len() < 2 {
                continue;
            }
            let depth = if parts.len() >= 3 && parts[1].starts_with("cam") { 2 } else { 1 };
            let folder = std::iter::once(branch.to_string())
                .chain(parts[..depth].iter().cloned())
                .collect::<Vec<_>>()
                .join("/");
            let name = parts[depth..].join("/");
            inv.folders.entry(folder).or_default().push(name);
            inv.file_count += 1;
        }
    }
    for names in inv.folders.values_mut() {
        names.sort();
    }
    inv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Line;
    use chrono::NaiveDate;
    use std::fs;

    fn group(name: &str) -> Group {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 21)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let mut g = Group::new(Line::One, ts);
        g.name = name.into();
        g
    }

    #[test]
    fn snapshot_only_rewrites_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = GroupsSnapshot::new(dir.path());
        let groups = vec![group("group_001")];
        assert!(snap.update(&groups).unwrap());
        assert!(!snap.update(&groups).unwrap());
        assert!(snap.update(&[group("group_001"), group("group_002")]).unwrap());
        let raw = fs::read_to_string(snap.path()).unwrap();
        assert!(raw.contains("group_002"));
    }

    #[test]
    fn csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("groups.csv");
        let n = export_groups_csv(&[group("group_001")], &out).unwrap();
        assert_eq!(n, 1);
        let raw = fs::read_to_string(&out).unwrap();
        let mut lines = raw.lines();
        assert!(lines.next().unwrap().starts_with("name,line,timestamp"));
        assert!(lines.next().unwrap().starts_with("group_001,1,2024-05-21 10:00:00,incomplete"));
    }

    #[test]
    fn inventory_per_subject() {
        let dir = tempfile::tempdir().unwrap();
        let date_dir = dir.path().join("240521");
        let s1 = date_dir.join("S1");
        fs::create_dir_all(s1.join("with NIR/Nir")).unwrap();
        fs::create_dir_all(s1.join("with NIR/복합 카메라/cam1")).unwrap();
        fs::create_dir_all(s1.join("with NIR/일반/C240521T100000")).unwrap();
        fs::write(s1.join("with NIR/Nir/k.spc"), b"").unwrap();
        fs::write(s1.join("with NIR/Nir/k.txt"), b"").unwrap();
        fs::write(s1.join("with NIR/복합 카메라/cam1/a.jpg"), b"").unwrap();
        fs::write(s1.join("with NIR/일반/C240521T100000/n.jpg"), b"").unwrap();
        // Not a subject.
        fs::create_dir_all(date_dir.join("plans")).unwrap();

        let summary = collect_output_inventory(&date_dir, "with NIR", "without NIR").unwrap();
        assert_eq!(summary.date, "240521");
        assert_eq!(summary.total_files, 4);
        assert_eq!(summary.saved.len(), 1);

        let raw = fs::read_to_string(&summary.saved[0]).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["subject"], "S1");
        assert_eq!(doc["folders"]["with NIR/Nir"], serde_json::json!(["k.spc", "k.txt"]));
        assert_eq!(doc["folders"]["with NIR/복합 카메라/cam1"], serde_json::json!(["a.jpg"]));
        assert_eq!(
            doc["folders"]["with NIR/일반"],
            serde_json::json!(["C240521T100000/n.jpg"])
        );
    }
}

/// Normal-camera reader: one record per timestamp-prefixed subfolder.
use super::timestamp::{is_image, normal_folder_timestamp, result_yml_timestamp};
use crate::model::{NormalRecord, Role};
use compact_str::CompactString;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Read every `C<timestamp>` subfolder of `dir`.
///
/// `suffix` restricts folders to names ending with it (`_0` / `_1`).
pub fn scan(dir: &Path, role: Role, suffix: Option<&str>) -> Vec<NormalRecord> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Skipping {} directory {}: {}", role, dir.display(), e);
            return Vec::new();
        }
    };
    let mut records = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if suffix.is_some_and(|s| !name.ends_with(s)) {
            continue;
        }
        if let Some(record) = read_folder(&path, role) {
            records.push(record);
        }
    }
    debug!("{}: {} folders in {}", role, records.len(), dir.display());
    records
}

/// Read one Normal folder. Returns `None` when the name does not start with
/// `C`, carries no parseable timestamp, or the folder has vanished.
pub fn read_folder(folder: &Path, role: Role) -> Option<NormalRecord> {
    let name = folder.file_name()?.to_string_lossy().into_owned();
    if !name.starts_with('C') {
        return None;
    }
    let Some(timestamp) = normal_folder_timestamp(&name) else {
        debug!("Skipping {} folder without timestamp: {}", role, name);
        return None;
    };
    let entries = match std::fs::read_dir(folder) {
        Ok(e) => e,
        Err(e) => {
            warn!("Skipping vanished {} folder {}: {}", role, folder.display(), e);
            return None;
        }
    };
    let mut images: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    images.sort();

    let mut files = BTreeMap::new();
    if let Some(first) = images.into_iter().next() {
        let file_name = first
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.insert(CompactString::new(file_name), first);
    }

    Some(NormalRecord {
        role,
        key: CompactString::new(&name),
        folder: folder.to_path_buf(),
        timestamp,
        extra_timestamp: result_yml_timestamp(folder),
        files,
    })
}

/// Camera reader: flat directory of images, keyed by directory label.
use super::timestamp::is_image;
use crate::model::{CamFile, CamRecord, Role};
use compact_str::CompactString;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Read all images in `dir` (non-recursive). `None` when the directory is
/// missing or holds no images.
pub fn scan(dir: &Path, role: Role) -> Option<CamRecord> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Skipping {} directory {}: {}", role, dir.display(), e);
            return None;
        }
    };
    let files: BTreeMap<_, _> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| is_image(p))
        .filter_map(|p| stat_file(&p))
        .map(|f| (f.name.clone(), f))
        .collect();
    debug!("{}: {} images in {}", role, files.len(), dir.display());
    if files.is_empty() {
        return None;
    }
    Some(CamRecord {
        role,
        label: label_of(dir),
        files,
    })
}

/// A single-file record for `file`, labelled by its parent directory.
pub fn read_file(file: &Path, role: Role) -> Option<CamRecord> {
    if !is_image(file) {
        return None;
    }
    let cam_file = stat_file(file)?;
    let label = label_of(file.parent()?);
    Some(CamRecord {
        role,
        label,
        files: BTreeMap::from([(cam_file.name.clone(), cam_file)]),
    })
}

fn stat_file(path: &Path) -> Option<CamFile> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    let name = path.file_name()?.to_string_lossy().into_owned();
    Some(CamFile {
        name: CompactString::new(name),
        path: path.to_path_buf(),
        modified: meta.modified().ok(),
        created: meta.created().ok(),
    })
}

fn label_of(dir: &Path) -> CompactString {
    dir.file_name()
        .map(|n| CompactString::new(n.to_string_lossy()))
        .unwrap_or_default()
}

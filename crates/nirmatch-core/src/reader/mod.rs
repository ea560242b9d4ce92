/// Stream readers: turn watched directories into typed records.
///
/// Readers never fail: structural problems (missing directory, unparseable
/// name, a file that vanished between listing and stat) are logged and the
/// entry is skipped.
pub mod camera;
pub mod nir;
pub mod normal;
pub mod timestamp;

use crate::config::Settings;
use crate::model::{Record, Role, RoleKind, UnmatchedPool};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Read every configured role directory into a fresh pool.
pub fn scan_all(settings: &Settings) -> UnmatchedPool {
    let mut pool = UnmatchedPool::new();
    for (role, dir) in &settings.directories {
        for record in scan_role(*role, dir, settings) {
            pool.insert(record);
        }
    }
    info!("Full scan read {} records", pool.len());
    pool
}

/// Read one role directory.
pub fn scan_role(role: Role, dir: &Path, settings: &Settings) -> Vec<Record> {
    match role.kind() {
        RoleKind::Normal => normal::scan(dir, role, settings.folder_suffix(role))
            .into_iter()
            .map(Record::Normal)
            .collect(),
        RoleKind::Nir => nir::scan(dir, role, settings.nir_mtime_fallback)
            .into_iter()
            .map(Record::Nir)
            .collect(),
        RoleKind::Camera => camera::scan(dir, role).map(Record::Cam).into_iter().collect(),
    }
}

/// Record for a created or moved-in path under a Normal or camera role.
///
/// For Normal roles the path may be the folder or any file inside it. NIR
/// paths go through [`nir::read_pair_for`] instead.
pub fn record_for_path(path: &Path, role: Role, settings: &Settings) -> Option<Record> {
    match role.kind() {
        RoleKind::Normal => {
            let folder = if path.is_dir() { path } else { path.parent()? };
            let name = folder.file_name()?.to_string_lossy().into_owned();
            if settings
                .folder_suffix(role)
                .is_some_and(|s| !name.ends_with(s))
            {
                return None;
            }
            normal::read_folder(folder, role).map(Record::Normal)
        }
        RoleKind::Camera => camera::read_file(path, role).map(Record::Cam),
        RoleKind::Nir => nir::read_pair_for(path, role, settings.nir_mtime_fallback).map(Record::Nir),
    }
}

/// Number of relevant files per configured role, for status display.
pub fn count_role_files(settings: &Settings) -> BTreeMap<Role, usize> {
    settings
        .directories
        .iter()
        .map(|(role, dir)| {
            let count = match role.kind() {
                RoleKind::Normal => normal::scan(dir, *role, settings.folder_suffix(*role)).len(),
                RoleKind::Nir => nir::scan(dir, *role, settings.nir_mtime_fallback).len() * 2,
                RoleKind::Camera => camera::scan(dir, *role).map_or(0, |r| r.files.len()),
            };
            (*role, count)
        })
        .collect()
}

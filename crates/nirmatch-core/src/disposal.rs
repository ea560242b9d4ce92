/// Disposal: relocate unwanted sources into the quarantine ("delete") tree.
///
/// Nothing is ever deleted permanently. Items land under
/// `<delete-root>/<YYYYMMDD>/<subject>/<with NIR|without NIR>/<role folder>`
/// with `_1`, `_2`, ... suffixes on collision.
use crate::config::{NamingRules, Settings};
use crate::error::DisposalError;
use crate::executor::fs_ops;
use crate::model::{Group, Role, RoleKind};
use crate::session::Session;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One file or folder to dispose of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisposalItem {
    pub path: PathBuf,
    pub role: Role,
    /// Decides the `with NIR` / `without NIR` branch.
    pub group_has_nir: bool,
}

/// What happened to each item.
#[derive(Clone, Debug, Default)]
pub struct DisposalReport {
    /// `(item, destination)` for every successful move.
    pub moved: Vec<(DisposalItem, PathBuf)>,
    pub vanished: Vec<DisposalItem>,
    pub failed: Vec<(DisposalItem, String)>,
}

impl DisposalReport {
    pub fn moved_count(&self) -> usize {
        self.moved.len()
    }
}

pub struct DisposalBin {
    root: PathBuf,
    naming: NamingRules,
    workers: usize,
    /// Destinations claimed by in-flight workers but not yet renamed into.
    reserved: Mutex<HashSet<PathBuf>>,
}

impl DisposalBin {
    pub fn new(root: impl Into<PathBuf>, naming: NamingRules, workers: usize) -> Self {
        Self {
            root: root.into(),
            naming,
            workers: workers.max(1),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, DisposalError> {
        let root = settings.delete.as_ref().ok_or(DisposalError::NoDeleteRoot)?;
        Ok(Self::new(root.clone(), settings.naming.clone(), settings.workers))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination folder for an item of `role`.
    pub fn bucket_dir(&self, date: &str, subject: &str, has_nir: bool, role: Role) -> PathBuf {
        let n = &self.naming;
        let subject_dir = self.root.join(date).join(subject);
        // NIR files only ever belong to a with-NIR group.
        let branch = if has_nir || role.kind() == RoleKind::Nir {
            subject_dir.join(&n.with_nir)
        } else {
            subject_dir.join(&n.without_nir)
        };
        match (role, has_nir) {
            (Role::Nir | Role::Nir2, _) => branch.join(&n.nir),
            (Role::Normal, true) => branch.join(&n.normal_with_nir),
            (Role::Normal2, true) => branch.join(&n.normal2_with_nir),
            (Role::Normal, false) => branch.join(&n.normal_without_nir),
            (Role::Normal2, false) => branch.join(&n.normal2_without_nir),
            (cam, _) => branch.join(&n.mixed_camera).join(cam.as_str()),
        }
    }

    /// Move `items` into the bin. Duplicate `(path, role)` pairs are
    /// disposed once; missing sources are logged and skipped.
    pub fn dispose(&self, date: &str, subject: &str, items: Vec<DisposalItem>) -> DisposalReport {
        let items = dedupe(items);
        let mut report = DisposalReport::default();
        if items.is_empty() {
            return report;
        }

        let threads = self.workers.min(items.len());
        let outcomes: Vec<(DisposalItem, Result<PathBuf, DisposalError>)> =
            match rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("nirmatch-dispose-{i}"))
                .build()
            {
                Ok(pool) => pool.install(|| {
                    items
                        .into_par_iter()
                        .map(|item| {
                            let res = self.dispose_one(date, subject, &item);
                            (item, res)
                        })
                        .collect()
                }),
                Err(e) => {
                    warn!("Disposal pool unavailable ({}); running serially", e);
                    items
                        .into_iter()
                        .map(|item| {
                            let res = self.dispose_one(date, subject, &item);
                            (item, res)
                        })
                        .collect()
                }
            };

        self.reserved.lock().clear();

        for (item, res) in outcomes {
            match res {
                Ok(dst) => report.moved.push((item, dst)),
                Err(DisposalError::Vanished(_)) => report.vanished.push(item),
                Err(e) => report.failed.push((item, e.to_string())),
            }
        }
        info!(
            "Disposal for {}: {} moved, {} already gone, {} failed",
            subject,
            report.moved.len(),
            report.vanished.len(),
            report.failed.len()
        );
        report
    }

    fn dispose_one(&self, date: &str, subject: &str, item: &DisposalItem) -> Result<PathBuf, DisposalError> {
        if !item.path.exists() {
            warn!("Disposal source already gone: {}", item.path.display());
            return Err(DisposalError::Vanished(item.path.clone()));
        }
        let dir = self.bucket_dir(date, subject, item.group_has_nir, item.role);
        std::fs::create_dir_all(&dir).map_err(|source| DisposalError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let name = item
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dst = self.reserve(&dir, &name);
        relocate(&item.path, &dst).map_err(|source| {
            warn!("Disposal move failed: {} -> {}: {}", item.path.display(), dst.display(), source);
            DisposalError::Move {
                src: item.path.clone(),
                dst: dst.clone(),
                source,
            }
        })?;
        info!("Disposed {} -> {}", item.path.display(), dst.display());
        Ok(dst)
    }

    /// Pick a free name in `dir` and claim it so no other worker picks it
    /// before the rename lands.
    fn reserve(&self, dir: &Path, name: &str) -> PathBuf {
        let mut reserved = self.reserved.lock();
        let dst = fs_ops::unique_destination_by(dir, name, |p| reserved.contains(p) || p.exists());
        reserved.insert(dst.clone());
        dst
    }
}

fn relocate(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        match std::fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(_) => fs_ops::move_dir_merge(src, dst, None),
        }
    } else {
        fs_ops::relocate_file(src, dst)
    }
}

fn dedupe(items: Vec<DisposalItem>) -> Vec<DisposalItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let key = std::fs::canonicalize(&item.path).unwrap_or_else(|_| item.path.clone());
            seen.insert((key, item.role))
        })
        .collect()
}

/// Every source a group references: the Normal folder, both NIR files, and
/// each camera file.
pub fn collect_group_items(group: &Group) -> Vec<DisposalItem> {
    let has_nir = group.has_nir();
    group
        .sources()
        .into_iter()
        .map(|(role, path)| DisposalItem {
            path: path.to_path_buf(),
            role,
            group_has_nir: has_nir,
        })
        .collect()
}

/// NIR files to prune so that only the oldest `keep` NIR bundles among
/// `groups` remain.
pub fn select_nir_prunes(groups: &[Group], keep: usize) -> Vec<DisposalItem> {
    let mut with_nir: Vec<&Group> = groups.iter().filter(|g| g.has_nir()).collect();
    with_nir.sort_by_key(|g| g.nir.as_ref().map(|n| n.timestamp));
    with_nir
        .into_iter()
        .skip(keep)
        .filter_map(|g| g.nir.as_ref())
        .flat_map(|nir| {
            nir.paths().into_iter().map(|p| DisposalItem {
                path: p.to_path_buf(),
                role: nir.role,
                group_has_nir: true,
            })
        })
        .collect()
}

/// Dispose `items` and drop each successfully moved source from the
/// session's pool, then rebuild once.
pub fn dispose_from_session(
    session: &mut Session,
    bin: &DisposalBin,
    date: &str,
    subject: &str,
    items: Vec<DisposalItem>,
) -> DisposalReport {
    let report = bin.dispose(date, subject, items);
    for (item, _) in &report.moved {
        session.remove_path(&item.path, item.role);
    }
    if !report.moved.is_empty() {
        session.rebuild();
    }
    report
}

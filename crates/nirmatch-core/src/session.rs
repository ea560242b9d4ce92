/// Session: the single owner of the unmatched pool, ConsumedKeys, and the
/// current group list.
///
/// Every mutation and every rebuild goes through `&mut Session`, so rebuilds
/// are serialised by construction. Only the coordination thread holds it;
/// watcher and executor threads communicate through channels.
use crate::config::Settings;
use crate::correlate::{build_all_groups, CorrelationConfig};
use crate::model::{ConsumedKeys, Group, LineStats, Record, Role, RoleKind, UnmatchedPool};
use crate::reader;
use crate::scheduler::{WatchEvent, WatchEventKind};
use chrono::Local;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

pub struct Session {
    settings: Settings,
    correlation: CorrelationConfig,
    pool: UnmatchedPool,
    consumed: ConsumedKeys,
    groups: Vec<Group>,
    rebuilds: u64,
}

impl Session {
    pub fn new(settings: Settings) -> Self {
        let correlation = CorrelationConfig::from_settings(&settings);
        Self {
            settings,
            correlation,
            pool: UnmatchedPool::new(),
            consumed: ConsumedKeys::new(),
            groups: Vec::new(),
            rebuilds: 0,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace settings. Takes effect at the next rebuild.
    pub fn set_settings(&mut self, settings: Settings) {
        self.correlation = CorrelationConfig::from_settings(&settings);
        self.settings = settings;
    }

    pub fn pool(&self) -> &UnmatchedPool {
        &self.pool
    }

    pub fn consumed(&self) -> &ConsumedKeys {
        &self.consumed
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn stats(&self) -> LineStats {
        LineStats::from_groups(&self.groups)
    }

    /// Number of rebuilds since the session was created.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Full reset: pool, ConsumedKeys, and groups are cleared.
    pub fn reset(&mut self) {
        self.pool.clear();
        self.consumed.clear();
        self.groups.clear();
        info!("Session state reset");
    }

    /// Re-read every role directory into a fresh pool and rebuild.
    /// ConsumedKeys survive.
    pub fn full_rescan(&mut self) -> &[Group] {
        let start = Instant::now();
        self.pool = reader::scan_all(&self.settings);
        self.rebuild();
        info!(
            "Full rescan: {} groups in {:.2?}",
            self.groups.len(),
            start.elapsed()
        );
        &self.groups
    }

    /// Rebuild groups from the current pool.
    pub fn rebuild(&mut self) -> &[Group] {
        let now = Local::now().naive_local();
        self.groups = build_all_groups(&self.pool, &self.consumed, &self.correlation, now);
        self.rebuilds += 1;
        &self.groups
    }

    /// Fold a drained event batch into the pool, then rebuild once.
    /// Returns the number of events that changed the pool.
    pub fn apply_events(&mut self, events: Vec<WatchEvent>) -> usize {
        let mut changed = 0;
        for event in events {
            let hit = match event.kind {
                WatchEventKind::Created | WatchEventKind::Moved => match event.role.kind() {
                    RoleKind::Nir => self.add_nir_pair_immediately(&event.path, event.role),
                    _ => self.add_or_update_from_path(&event.path, event.role),
                },
                WatchEventKind::Removed => self.remove_path(&event.path, event.role),
            };
            if hit {
                changed += 1;
            }
        }
        self.rebuild();
        debug!("Applied events: {} changed the pool", changed);
        changed
    }

    /// Read the record `path` belongs to and insert it.
    pub fn add_or_update_from_path(&mut self, path: &Path, role: Role) -> bool {
        match reader::record_for_path(path, role, &self.settings) {
            Some(record) => {
                self.pool.insert(record);
                true
            }
            None => false,
        }
    }

    /// Pair a NIR file with its partner and insert it without waiting for
    /// a tolerance window. Rejects consumed keys, keys already pooled, and
    /// files whose partner does not exist yet.
    pub fn add_nir_pair_immediately(&mut self, path: &Path, role: Role) -> bool {
        let Some(record) = reader::nir::read_pair_for(path, role, self.settings.nir_mtime_fallback)
        else {
            return false;
        };
        if self.consumed.contains(&record.key) || self.pool.contains_nir(role, &record.key) {
            return false;
        }
        info!("NIR pair {} added", record.key);
        self.pool.insert(Record::Nir(record));
        true
    }

    /// Drop whatever record `path` identifies. A file removed from a Normal
    /// folder that still exists re-reads the folder instead.
    pub fn remove_path(&mut self, path: &Path, role: Role) -> bool {
        if role.kind() == RoleKind::Normal && !path.is_dir() {
            if let Some(folder) = path.parent().filter(|p| p.is_dir()) {
                if reader::record_for_path(folder, role, &self.settings).is_some() {
                    return self.add_or_update_from_path(folder, role);
                }
            }
        }
        let removed = self.pool.remove_path(role, path);
        if removed {
            debug!("Removed {} entry for {}", role, path.display());
        }
        removed
    }

    /// Mark the NIR keys of `groups` as consumed.
    pub fn consume_nir_keys<'a>(&mut self, groups: impl IntoIterator<Item = &'a Group>) {
        let keys = groups
            .into_iter()
            .filter_map(|g| g.nir.as_ref().map(|n| n.key.clone()));
        self.consumed.extend(keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn settings_for(root: &Path) -> Settings {
        let mut settings = Settings::default();
        for role in [Role::Normal, Role::Nir, Role::Cam1] {
            let dir = root.join(role.as_str());
            fs::create_dir_all(&dir).unwrap();
            settings.directories.insert(role, dir);
        }
        settings
    }

    #[test]
    fn nir_immediate_rejects_duplicates_and_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        let nir_dir = settings.dir(Role::Nir).unwrap().to_path_buf();
        let mut session = Session::new(settings);

        let spc = nir_dir.join("k_20240101T000000.spc");
        fs::write(&spc, b"s").unwrap();
        assert!(!session.add_nir_pair_immediately(&spc, Role::Nir));
        fs::write(nir_dir.join("k_20240101T000000.txt"), b"t").unwrap();
        assert!(session.add_nir_pair_immediately(&spc, Role::Nir));
        assert!(!session.add_nir_pair_immediately(&spc, Role::Nir));

        session.rebuild();
        let groups = session.groups().to_vec();
        session.consume_nir_keys(&groups);
        session.pool.remove_nir(Role::Nir, "k_20240101T000000");
        assert!(!session.add_nir_pair_immediately(&spc, Role::Nir));
    }

    #[test]
    fn removing_file_from_live_normal_folder_rereads_it() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        let folder = settings.dir(Role::Normal).unwrap().join("C240101T000000");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("a.jpg"), b"a").unwrap();
        let mut session = Session::new(settings);
        session.full_rescan();
        assert!(session.groups()[0].normal.as_ref().unwrap().has_image());

        fs::remove_file(folder.join("a.jpg")).unwrap();
        session.apply_events(vec![WatchEvent {
            kind: WatchEventKind::Removed,
            path: folder.join("a.jpg"),
            role: Role::Normal,
        }]);
        assert_eq!(session.groups().len(), 1);
        assert!(!session.groups()[0].normal.as_ref().unwrap().has_image());

        fs::remove_dir(&folder).unwrap();
        session.apply_events(vec![WatchEvent {
            kind: WatchEventKind::Removed,
            path: folder.clone(),
            role: Role::Normal,
        }]);
        assert!(session.groups().is_empty());
    }

    #[test]
    fn reset_clears_consumed() {
        let mut session = Session::new(Settings::default());
        session.consumed.insert("x".into());
        session.reset();
        assert!(session.consumed().is_empty());
    }
}

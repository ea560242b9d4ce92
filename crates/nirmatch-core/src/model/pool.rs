/// The unmatched pool and the set of consumed NIR keys.
///
/// Both are plain owned values. The session owns exactly one of each and
/// passes them by reference to the correlation engine.
use super::record::{CamRecord, NirRecord, NormalRecord, Record};
use super::role::Role;
use compact_str::CompactString;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Per-role map from correlation key to the most recent record for that key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnmatchedPool {
    normal: BTreeMap<Role, BTreeMap<CompactString, NormalRecord>>,
    nir: BTreeMap<Role, BTreeMap<CompactString, NirRecord>>,
    cam: BTreeMap<Role, BTreeMap<CompactString, CamRecord>>,
}

impl UnmatchedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Normal and NIR records replace any previous record
    /// under the same key; camera files merge into the existing bucket.
    pub fn insert(&mut self, record: Record) {
        match record {
            Record::Normal(r) => {
                self.normal
                    .entry(r.role)
                    .or_default()
                    .insert(r.key.clone(), r);
            }
            Record::Nir(r) => {
                self.nir.entry(r.role).or_default().insert(r.key.clone(), r);
            }
            Record::Cam(r) => {
                let bucket = self.cam.entry(r.role).or_default();
                match bucket.get_mut(&r.label) {
                    Some(existing) => existing.files.extend(r.files),
                    None => {
                        bucket.insert(r.label.clone(), r);
                    }
                }
            }
        }
    }

    /// Normal records for `role`, ordered by key.
    pub fn normals(&self, role: Role) -> impl Iterator<Item = &NormalRecord> {
        self.normal.get(&role).into_iter().flat_map(|m| m.values())
    }

    pub fn nirs(&self, role: Role) -> impl Iterator<Item = &NirRecord> {
        self.nir.get(&role).into_iter().flat_map(|m| m.values())
    }

    pub fn cams(&self, role: Role) -> impl Iterator<Item = &CamRecord> {
        self.cam.get(&role).into_iter().flat_map(|m| m.values())
    }

    pub fn contains_nir(&self, role: Role, key: &str) -> bool {
        self.nir.get(&role).is_some_and(|m| m.contains_key(key))
    }

    pub fn remove_normal(&mut self, role: Role, key: &str) -> Option<NormalRecord> {
        self.normal.get_mut(&role)?.remove(key)
    }

    pub fn remove_nir(&mut self, role: Role, key: &str) -> Option<NirRecord> {
        self.nir.get_mut(&role)?.remove(key)
    }

    /// Remove one file from a camera bucket; an emptied bucket is dropped.
    pub fn remove_cam_file(&mut self, role: Role, label: &str, name: &str) -> bool {
        let Some(buckets) = self.cam.get_mut(&role) else {
            return false;
        };
        let Some(bucket) = buckets.get_mut(label) else {
            return false;
        };
        let removed = bucket.files.remove(name).is_some();
        if bucket.files.is_empty() {
            buckets.remove(label);
        }
        removed
    }

    /// Remove whatever record `path` identifies for `role`.
    ///
    /// For Normal roles `path` may be the folder itself or a file inside it.
    /// NIR keys are derived from the file name; camera files are addressed
    /// by `(parent label, file name)`, and a camera directory path drops the
    /// whole bucket.
    pub fn remove_path(&mut self, role: Role, path: &Path) -> bool {
        use super::role::RoleKind;
        let name = file_name(path);
        match role.kind() {
            RoleKind::Normal => {
                if self.remove_normal(role, &name).is_some() {
                    return true;
                }
                let parent = path.parent().map(file_name).unwrap_or_default();
                self.remove_normal(role, &parent).is_some()
            }
            RoleKind::Nir => {
                let key = crate::reader::timestamp::nir_key_from_name(&name);
                self.remove_nir(role, &key).is_some()
            }
            RoleKind::Camera => {
                let label = path.parent().map(file_name).unwrap_or_default();
                if self.remove_cam_file(role, &label, &name) {
                    return true;
                }
                self.cam
                    .get_mut(&role)
                    .is_some_and(|b| b.remove(name.as_str()).is_some())
            }
        }
    }

    /// Total number of records (camera files count individually).
    pub fn len(&self) -> usize {
        let normal: usize = self.normal.values().map(BTreeMap::len).sum();
        let nir: usize = self.nir.values().map(BTreeMap::len).sum();
        let cam: usize = self
            .cam
            .values()
            .flat_map(BTreeMap::values)
            .map(|r| r.files.len())
            .sum();
        normal + nir + cam
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.normal.clear();
        self.nir.clear();
        self.cam.clear();
    }
}

/// NIR keys already folded into a group. Append-only within a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumedKeys(BTreeSet<CompactString>);

impl ConsumedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn insert(&mut self, key: CompactString) -> bool {
        self.0.insert(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Only a full reset clears consumed keys.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompactString> {
        self.0.iter()
    }
}

impl Extend<CompactString> for ConsumedKeys {
    fn extend<T: IntoIterator<Item = CompactString>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

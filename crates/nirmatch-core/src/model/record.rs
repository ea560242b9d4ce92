/// Typed records produced by the stream readers.
///
/// Each role kind has its own record type; [`Record`] is the tagged union
/// the pool accepts. Camera records are keyed by folder label and accumulate
/// file entries, the others are replaced wholesale on re-observation.
use super::role::Role;
use chrono::NaiveDateTime;
use compact_str::CompactString;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A timestamp-prefixed Normal-camera folder.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalRecord {
    pub role: Role,
    /// Folder name.
    pub key: CompactString,
    pub folder: PathBuf,
    /// Parsed from the folder name.
    pub timestamp: NaiveDateTime,
    /// From the folder's `result.yml`, when present.
    pub extra_timestamp: Option<NaiveDateTime>,
    /// First image in the folder (sorted), if any.
    pub files: BTreeMap<CompactString, PathBuf>,
}

impl NormalRecord {
    /// An image-less folder still forms a group but never completes it.
    pub fn has_image(&self) -> bool {
        !self.files.is_empty()
    }
}

/// A `.spc` + `.txt` spectrometer pair sharing a key.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NirRecord {
    pub role: Role,
    /// Shared filename prefix, trailing capital letter stripped.
    pub key: CompactString,
    pub timestamp: NaiveDateTime,
    pub spc: PathBuf,
    pub txt: PathBuf,
}

impl NirRecord {
    pub fn paths(&self) -> [&Path; 2] {
        [&self.spc, &self.txt]
    }
}

/// One image file in a camera directory, with the stat data the engine
/// orders by. Captured at read time so correlation never touches the disk.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CamFile {
    pub name: CompactString,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

/// All image files seen in one camera directory.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CamRecord {
    pub role: Role,
    /// Directory basename.
    pub label: CompactString,
    pub files: BTreeMap<CompactString, CamFile>,
}

/// Tagged union over the three record kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Normal(NormalRecord),
    Nir(NirRecord),
    Cam(CamRecord),
}

impl Record {
    pub fn role(&self) -> Role {
        match self {
            Record::Normal(r) => r.role,
            Record::Nir(r) => r.role,
            Record::Cam(r) => r.role,
        }
    }
}

/// NIR reader: `.spc` + `.txt` pairs sharing a key.
use super::timestamp::{extension_lower, local_naive, nir_key_from_name, nir_key_timestamp};
use crate::model::{NirRecord, Role};
use chrono::NaiveDateTime;
use compact_str::CompactString;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Default)]
struct Pair {
    spc: Option<PathBuf>,
    txt: Option<PathBuf>,
}

/// Read every complete pair in `dir`. Unpaired files are ignored.
pub fn scan(dir: &Path, role: Role, mtime_fallback: bool) -> Vec<NirRecord> {
    let pairs = match collect_pairs(dir) {
        Ok(p) => p,
        Err(e) => {
            warn!("Skipping {} directory {}: {}", role, dir.display(), e);
            return Vec::new();
        }
    };
    let records: Vec<_> = pairs
        .into_iter()
        .filter_map(|(key, pair)| build(role, key, pair, mtime_fallback))
        .collect();
    debug!("{}: {} pairs in {}", role, records.len(), dir.display());
    records
}

/// Pair `file` with its partner in the same directory, if both exist.
pub fn read_pair_for(file: &Path, role: Role, mtime_fallback: bool) -> Option<NirRecord> {
    let name = file.file_name()?.to_string_lossy().into_owned();
    let key = nir_key_from_name(&name);
    let dir = file.parent()?;
    let mut pairs = collect_pairs(dir).ok()?;
    let pair = pairs.remove(&key)?;
    build(role, key, pair, mtime_fallback)
}

fn collect_pairs(dir: &Path) -> std::io::Result<BTreeMap<String, Pair>> {
    let mut pairs: BTreeMap<String, Pair> = BTreeMap::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let slot = match extension_lower(&path).as_deref() {
            Some("spc") => 0,
            Some("txt") => 1,
            _ => continue,
        };
        if !path.is_file() {
            continue;
        }
        let key = nir_key_from_name(&entry.file_name().to_string_lossy());
        let pair = pairs.entry(key).or_default();
        if slot == 0 {
            pair.spc = Some(path);
        } else {
            pair.txt = Some(path);
        }
    }
    Ok(pairs)
}

fn build(role: Role, key: String, pair: Pair, mtime_fallback: bool) -> Option<NirRecord> {
    let (spc, txt) = (pair.spc?, pair.txt?);
    let timestamp = match nir_key_timestamp(&key) {
        Some(ts) => ts,
        None if mtime_fallback => pair_mtime(&spc, &txt)?,
        None => {
            debug!("Skipping NIR pair without timestamp: {}", key);
            return None;
        }
    };
    Some(NirRecord {
        role,
        key: CompactString::new(key),
        timestamp,
        spc,
        txt,
    })
}

/// Earlier mtime of the two files.
fn pair_mtime(spc: &Path, txt: &Path) -> Option<NaiveDateTime> {
    let a = std::fs::metadata(spc).and_then(|m| m.modified());
    let b = std::fs::metadata(txt).and_then(|m| m.modified());
    match (a, b) {
        (Ok(a), Ok(b)) => Some(local_naive(a.min(b))),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Skipping vanished NIR pair {}: {}", spc.display(), e);
            None
        }
    }
}

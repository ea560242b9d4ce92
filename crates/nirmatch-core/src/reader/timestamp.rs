/// Timestamp and key extraction from file and folder names.
use chrono::{DateTime, Local, NaiveDateTime};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;
use std::time::SystemTime;
use tracing::warn;

/// `C<yyMMdd>T<HHmmss>` anywhere in a Normal folder name.
static NORMAL_FOLDER_TS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"C(\d{6}T\d{6})").expect("Invalid Normal folder regex"));

/// `<yyyyMMdd>T<HHmmss>` anywhere in a NIR key.
static NIR_KEY_TS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8}T\d{6})").expect("Invalid NIR key regex"));

/// Name of the optional metadata file inside a Normal folder.
pub const RESULT_YML: &str = "result.yml";

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Timestamp embedded in a Normal folder name, if it parses.
pub fn normal_folder_timestamp(name: &str) -> Option<NaiveDateTime> {
    let caps = NORMAL_FOLDER_TS.captures(name)?;
    NaiveDateTime::parse_from_str(&caps[1], "%y%m%dT%H%M%S").ok()
}

/// Timestamp embedded in a NIR key, if it parses.
pub fn nir_key_timestamp(key: &str) -> Option<NaiveDateTime> {
    let caps = NIR_KEY_TS.captures(key)?;
    NaiveDateTime::parse_from_str(&caps[1], "%Y%m%dT%H%M%S").ok()
}

/// Pairing key for a NIR file name: the stem with one trailing ASCII capital
/// stripped (`run_20240101T000000A.spc` → `run_20240101T000000`).
pub fn nir_key_from_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.chars().last() {
        Some(c) if c.is_ascii_uppercase() => stem[..stem.len() - 1].to_owned(),
        _ => stem,
    }
}

/// Lowercased extension of `path`, without the dot.
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

pub fn is_image(path: &Path) -> bool {
    extension_lower(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Local wall-clock time of a filesystem timestamp.
pub fn local_naive(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

#[derive(Deserialize)]
struct ResultYml {
    timestamp: Option<serde_yaml::Value>,
}

/// `timestamp: YYYYmmdd_HHMMSS` from `<folder>/result.yml`, if present and valid.
pub fn result_yml_timestamp(folder: &Path) -> Option<NaiveDateTime> {
    let path = folder.join(RESULT_YML);
    if !path.is_file() {
        return None;
    }
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    let doc: ResultYml = match serde_yaml::from_str(&text) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            return None;
        }
    };
    // An unquoted all-digit value would load as a number; only strings are valid.
    let raw = match doc.timestamp? {
        serde_yaml::Value::String(s) => s,
        other => {
            warn!("Unexpected timestamp in {}: {:?}", path.display(), other);
            return None;
        }
    };
    match NaiveDateTime::parse_from_str(&raw, "%Y%m%d_%H%M%S") {
        Ok(ts) => Some(ts),
        Err(e) => {
            warn!("Bad timestamp '{}' in {}: {}", raw, path.display(), e);
            None
        }
    }
}

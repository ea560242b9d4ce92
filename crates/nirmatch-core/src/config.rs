/// Persistent settings: role directories, destinations, and tuning knobs.
///
/// Stored as pretty JSON (`config.json`) in the state directory. A missing
/// file yields defaults; relative paths are resolved against the current
/// directory at load time so that every path handed to the readers and the
/// executor is absolute.
use crate::error::ConfigError;
use crate::model::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// File name of the settings document inside the state directory.
pub const SETTINGS_FILE: &str = "config.json";

/// Quiet period after the last event before a full rescan is forced.
pub const INACTIVITY_WINDOW: Duration = Duration::from_secs(10);

/// Interval between watcher liveness checks.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on waiting for the watch thread to exit.
pub const WATCH_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on executor worker threads.
pub const MAX_WORKERS: usize = 8;

/// How the two acquisition lines map onto output subjects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineMode {
    /// Both lines are written under `subject_folder`.
    #[default]
    Combined,
    /// Line 2 is written under `subject_folder2`.
    Separated,
}

/// Destination folder names used by the plan builder and the disposal tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingRules {
    pub with_nir: String,
    pub without_nir: String,
    pub nir: String,
    /// Normal folder parent when the group has NIR.
    pub normal_with_nir: String,
    /// Normal2 folder parent in the disposal tree when the group has NIR.
    pub normal2_with_nir: String,
    /// Normal folder parent when the group has no NIR.
    pub normal_without_nir: String,
    pub normal2_without_nir: String,
    /// Parent of the per-camera `camN` folders.
    pub mixed_camera: String,
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            with_nir: "with NIR".into(),
            without_nir: "without NIR".into(),
            nir: "Nir".into(),
            normal_with_nir: "일반".into(),
            normal2_with_nir: "일반2".into(),
            normal_without_nir: "일반 카메라".into(),
            normal2_without_nir: "일반2 카메라".into(),
            mixed_camera: "복합 카메라".into(),
        }
    }
}

/// User settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Watched directory per role. Roles without an entry are not read.
    pub directories: BTreeMap<Role, PathBuf>,
    /// Output root for transfers.
    pub output: Option<PathBuf>,
    /// Disposal ("delete") root.
    pub delete: Option<PathBuf>,
    /// Debounce interval in seconds.
    pub interval: f64,
    /// NIR attachment tolerance in seconds.
    pub nir_match_time_diff: f64,
    /// Keep only Normal folders ending in `_0` (line 1) or `_1` (line 2).
    pub use_folder_suffix: bool,
    pub line_mode: LineMode,
    pub subject_folder: String,
    pub subject_folder2: String,
    /// Executor pool width.
    pub workers: usize,
    /// Case-insensitive filename markers that flag a camera file as a copy.
    pub copy_markers: Vec<String>,
    /// Seconds a worker waits for a conflict decision before cancelling.
    pub conflict_timeout_secs: u64,
    /// Fall back to file mtime when a NIR key carries no timestamp.
    pub nir_mtime_fallback: bool,
    pub naming: NamingRules,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directories: BTreeMap::new(),
            output: None,
            delete: None,
            interval: 1.0,
            nir_match_time_diff: 1.0,
            use_folder_suffix: false,
            line_mode: LineMode::Combined,
            subject_folder: String::new(),
            subject_folder2: String::new(),
            workers: default_workers(),
            copy_markers: vec!["복사본".into(), "copy".into()],
            conflict_timeout_secs: 60,
            nir_mtime_fallback: true,
            naming: NamingRules::default(),
        }
    }
}

/// `min(8, logical CPUs)`, never zero.
pub fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

impl Settings {
    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Settings =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.absolutize();
        settings.validate()?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        std::fs::write(path, text).map_err(write_err)?;
        Ok(())
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "interval",
                reason: format!("must be a positive number of seconds, got {}", self.interval),
            });
        }
        if !(self.nir_match_time_diff.is_finite() && self.nir_match_time_diff >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "nir_match_time_diff",
                reason: format!("must be >= 0, got {}", self.nir_match_time_diff),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.conflict_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conflict_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Resolve every relative path against the current directory.
    pub fn absolutize(&mut self) {
        for dir in self.directories.values_mut() {
            *dir = absolute(dir);
        }
        if let Some(p) = self.output.as_mut() {
            *p = absolute(p);
        }
        if let Some(p) = self.delete.as_mut() {
            *p = absolute(p);
        }
    }

    /// Configured directory for `role`, if any.
    pub fn dir(&self, role: Role) -> Option<&Path> {
        self.directories.get(&role).map(PathBuf::as_path)
    }

    /// All configured `(role, directory)` pairs in role order.
    pub fn role_dirs(&self) -> Vec<(Role, PathBuf)> {
        self.directories
            .iter()
            .map(|(role, dir)| (*role, dir.clone()))
            .collect()
    }

    pub fn output_root(&self) -> Result<&Path, ConfigError> {
        self.output
            .as_deref()
            .ok_or(ConfigError::Missing { field: "output" })
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    pub fn conflict_timeout(&self) -> Duration {
        Duration::from_secs(self.conflict_timeout_secs)
    }

    /// Suffix a Normal folder name must carry for `role`, if the filter is on.
    pub fn folder_suffix(&self, role: Role) -> Option<&'static str> {
        if !self.use_folder_suffix {
            return None;
        }
        match role {
            Role::Normal => Some("_0"),
            Role::Normal2 => Some("_1"),
            _ => None,
        }
    }
}

/// Default state directory: `<data dir>/nirmatch`.
pub fn default_state_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|d| d.join(crate::APP_NAME))
        .ok_or(ConfigError::NoStateDir)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

//! Error types for nirmatch-core.
//!
//! Structural problems (a malformed timestamp, a vanished folder) are not
//! errors here: readers log and skip them. These types cover what a caller
//! has to act on.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the core crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Settings could not be loaded, saved, or validated
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plan could not be built or persisted
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Executor could not start
    #[error("Executor error: {0}")]
    Exec(#[from] ExecError),

    /// Disposal failed before any item was moved
    #[error("Disposal error: {0}")]
    Disposal(#[from] DisposalError),

    /// Filesystem watch could not be started
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Settings errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file exists but could not be read
    #[error("Failed to read settings '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid JSON for the settings schema
    #[error("Failed to parse settings '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Settings file could not be written
    #[error("Failed to write settings '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value is out of range or inconsistent
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// A required directory is not configured
    #[error("'{field}' is not configured")]
    Missing { field: &'static str },

    /// No per-user data directory could be resolved
    #[error("Could not determine a state directory; pass one explicitly")]
    NoStateDir,
}

/// Move-plan errors
#[derive(Error, Debug)]
pub enum PlanError {
    /// Plan file could not be written
    #[error("Failed to write plan '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plan file could not be read
    #[error("Failed to read plan '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plan JSON is malformed
    #[error("Plan JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Executor start-up errors. Per-operation failures are counted in the
/// execution report instead.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The bounded worker pool could not be created
    #[error("Failed to build worker pool: {0}")]
    Pool(String),
}

/// Disposal errors
#[derive(Error, Debug)]
pub enum DisposalError {
    /// No delete root configured
    #[error("Delete folder is not configured")]
    NoDeleteRoot,

    /// Disposal is refused while the scheduler is watching
    #[error("Disposal is not allowed while watching is active")]
    WatchingActive,

    /// Source no longer exists
    #[error("Source vanished: {0}")]
    Vanished(PathBuf),

    /// Bucket directory could not be created
    #[error("Failed to create '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Relocation failed
    #[error("Failed to move '{src}' to '{dst}': {source}")]
    Move {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Watch start-up errors
#[derive(Error, Debug)]
pub enum WatchError {
    /// No role directory is configured and present on disk
    #[error("No watchable role directories are configured")]
    NoDirectories,

    /// The platform watcher rejected a path or could not be created
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The watch thread could not be spawned
    #[error("Failed to spawn watch thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

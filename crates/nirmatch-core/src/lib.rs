/// nirmatch Core: correlation, scheduling, and bulk file operations.
///
/// This crate contains all business logic with zero frontend dependencies.
/// It is designed to be driven from a single coordination thread (CLI,
/// headless service, or a GUI event loop) that owns a [`session::Session`].
///
/// # Modules
///
/// - [`model`]: Roles, typed records, the unmatched pool and groups.
/// - [`reader`]: Stream readers that turn watched directories into records.
/// - [`correlate`]: Deterministic grouping engine.
/// - [`session`]: Coordinator that owns the pool and ConsumedKeys.
/// - [`scheduler`]: Filesystem watch, debounce, and forced rescans.
/// - [`plan`]: Move-plan model, builder, and persistence.
/// - [`executor`]: Bounded-pool executor with conflicts, retry, rollback.
/// - [`transfer`]: Plan → execute → movement-log orchestration.
/// - [`disposal`]: Quarantine ("delete") tree relocation.
/// - [`selection`]: Choosing which groups go to which subject.
/// - [`movelog`]: Per-date record of moved subjects.
/// - [`report`]: Group snapshots, CSV export, output inventory.
/// - [`config`]: Persistent settings.
pub mod config;
pub mod correlate;
pub mod disposal;
pub mod error;
pub mod executor;
pub mod model;
pub mod movelog;
pub mod plan;
pub mod reader;
pub mod report;
pub mod scheduler;
pub mod selection;
pub mod session;
pub mod transfer;

pub use error::{Error, Result};

/// Application name recorded in movement logs and used for the state dir.
pub const APP_NAME: &str = "nirmatch";

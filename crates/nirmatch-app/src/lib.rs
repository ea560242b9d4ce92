/// nirmatch App: headless frontend state.
///
/// Business logic lives in `nirmatch-core`. This crate owns the session,
/// the scheduler, and the background transfer, and drains their channels
/// once per tick from a single coordination thread.
pub mod state;

pub use state::{AppPhase, AppState, TransferProgress};

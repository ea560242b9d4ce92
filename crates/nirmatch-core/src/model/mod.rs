/// Data model: roles, typed records, the unmatched pool, and groups.
///
/// Records are the output of the stream readers and the only input to the
/// correlation engine. Groups are rebuilt from scratch on every rebuild and
/// carry clones of the records they were formed from.
pub mod group;
pub mod pool;
pub mod record;
pub mod role;

pub use group::{CamSlot, Completeness, Group, GroupStats, LineStats, Slot};
pub use pool::{ConsumedKeys, UnmatchedPool};
pub use record::{CamFile, CamRecord, NirRecord, NormalRecord, Record};
pub use role::{Line, Role, RoleKind};

/// Move plan: the serialisable description of one transfer.
///
/// A plan is keyed by work date and subject. Each subject carries its
/// output root and one entry per group: an optional directory operation for
/// the Normal folder (`카메라`) and file operations per camera slot and for
/// the NIR pair. Every path is absolute and lexically normalised.
///
/// The plan is persisted before the executor touches the filesystem, so a
/// run can always be reconstructed from its `move_plan.json`.
pub mod builder;
pub mod store;

pub use builder::{build_move_plan, SubjectGroups};
pub use store::{load_move_plan, plan_path, save_move_plan};

use crate::model::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const PLAN_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        })
    }
}

/// A single file relocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOp {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// A whole-directory relocation (the Normal folder).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirOp {
    pub src_dir: PathBuf,
    pub dst_dir: PathBuf,
    pub label: String,
}

/// Per-group file operation slot key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlanSlot {
    #[serde(rename = "cam1")]
    Cam1,
    #[serde(rename = "cam2")]
    Cam2,
    #[serde(rename = "cam3")]
    Cam3,
    #[serde(rename = "cam4")]
    Cam4,
    #[serde(rename = "cam5")]
    Cam5,
    #[serde(rename = "cam6")]
    Cam6,
    #[serde(rename = "NIR")]
    Nir,
}

impl PlanSlot {
    /// Slot for a camera or NIR role. Normal roles use the directory op.
    pub fn for_role(role: Role) -> Option<PlanSlot> {
        Some(match role {
            Role::Cam1 => PlanSlot::Cam1,
            Role::Cam2 => PlanSlot::Cam2,
            Role::Cam3 => PlanSlot::Cam3,
            Role::Cam4 => PlanSlot::Cam4,
            Role::Cam5 => PlanSlot::Cam5,
            Role::Cam6 => PlanSlot::Cam6,
            Role::Nir | Role::Nir2 => PlanSlot::Nir,
            Role::Normal | Role::Normal2 => return None,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPlan {
    #[serde(rename = "카메라", default, skip_serializing_if = "Option::is_none")]
    pub normal_dir: Option<DirOp>,
    #[serde(flatten)]
    pub files: BTreeMap<PlanSlot, Vec<FileOp>>,
}

impl GroupPlan {
    pub fn is_empty(&self) -> bool {
        self.normal_dir.is_none() && self.files.values().all(Vec::is_empty)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPlan {
    pub output_root: PathBuf,
    pub groups: Vec<GroupPlan>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePlan {
    pub schema_version: u32,
    /// ISO-8601 local time, seconds precision.
    pub created_at: String,
    pub mode: TransferMode,
    /// date → subject → subject plan
    pub plan: BTreeMap<String, BTreeMap<String, SubjectPlan>>,
}

impl MovePlan {
    pub fn subjects(&self) -> impl Iterator<Item = (&str, &str, &SubjectPlan)> {
        self.plan.iter().flat_map(|(date, subjects)| {
            subjects
                .iter()
                .map(move |(subject, sp)| (date.as_str(), subject.as_str(), sp))
        })
    }

    fn groups(&self) -> impl Iterator<Item = &GroupPlan> {
        self.subjects().flat_map(|(_, _, sp)| sp.groups.iter())
    }

    pub fn dir_ops(&self) -> Vec<&DirOp> {
        self.groups().filter_map(|g| g.normal_dir.as_ref()).collect()
    }

    /// File operations in plan order (subject, group, slot).
    pub fn file_ops(&self) -> Vec<&FileOp> {
        self.groups().flat_map(|g| g.files.values().flatten()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups().all(GroupPlan::is_empty)
    }

    /// A copy containing only one subject of one date.
    pub fn for_subject(&self, date: &str, subject: &str) -> Option<MovePlan> {
        let sp = self.plan.get(date)?.get(subject)?.clone();
        Some(MovePlan {
            schema_version: self.schema_version,
            created_at: self.created_at.clone(),
            mode: self.mode,
            plan: BTreeMap::from([(
                date.to_owned(),
                BTreeMap::from([(subject.to_owned(), sp)]),
            )]),
        })
    }
}

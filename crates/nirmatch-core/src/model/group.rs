/// Groups: one physical inspection event per line.
use super::record::{CamFile, NirRecord, NormalRecord};
use super::role::{Line, Role};
use chrono::NaiveDateTime;
use compact_str::CompactString;
use serde::Serialize;
use std::path::Path;

/// A camera file assigned to one of a group's three slots.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CamSlot {
    pub role: Role,
    /// Label of the directory the file came from.
    pub label: CompactString,
    pub file: CamFile,
}

/// A slot a complete group must fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Slot {
    /// Normal folder with at least one image.
    Normal(Role),
    Camera(Role),
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Normal(r) | Slot::Camera(r) => write!(f, "{r}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Incomplete,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Group {
    /// Positional name (`group_001`), reassigned on every rebuild.
    pub name: String,
    pub line: Line,
    pub timestamp: NaiveDateTime,
    pub completeness: Completeness,
    pub normal: Option<NormalRecord>,
    pub nir: Option<NirRecord>,
    pub cams: [Option<CamSlot>; 3],
}

impl Group {
    pub(crate) fn new(line: Line, timestamp: NaiveDateTime) -> Self {
        Self {
            name: String::new(),
            line,
            timestamp,
            completeness: Completeness::Incomplete,
            normal: None,
            nir: None,
            cams: [None, None, None],
        }
    }

    pub fn has_nir(&self) -> bool {
        self.nir.is_some()
    }

    /// Slots that keep this group from being complete. NIR never appears.
    pub fn missing_slots(&self) -> Vec<Slot> {
        let mut missing = Vec::new();
        if !self.normal.as_ref().is_some_and(NormalRecord::has_image) {
            missing.push(Slot::Normal(self.line.normal_role()));
        }
        for (slot, role) in self.cams.iter().zip(self.line.camera_roles()) {
            if slot.is_none() {
                missing.push(Slot::Camera(role));
            }
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    /// Recompute `completeness` from the slots.
    pub(crate) fn refresh_completeness(&mut self) {
        self.completeness = if self.missing_slots().is_empty() {
            Completeness::Complete
        } else {
            Completeness::Incomplete
        };
    }

    /// Every source path this group references, with its role.
    pub fn sources(&self) -> Vec<(Role, &Path)> {
        let mut out = Vec::new();
        if let Some(normal) = &self.normal {
            out.push((normal.role, normal.folder.as_path()));
        }
        if let Some(nir) = &self.nir {
            for p in nir.paths() {
                out.push((nir.role, p));
            }
        }
        for slot in self.cams.iter().flatten() {
            out.push((slot.role, slot.file.path.as_path()));
        }
        out
    }
}

/// Counters shown in status lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    /// Groups with a Normal record.
    pub total: usize,
    pub with_nir: usize,
    pub without_nir: usize,
    /// Incomplete groups or groups without a Normal record.
    pub failed: usize,
}

impl GroupStats {
    pub fn from_groups<'a>(groups: impl IntoIterator<Item = &'a Group>) -> Self {
        let mut stats = GroupStats::default();
        for g in groups {
            if g.normal.is_some() {
                stats.total += 1;
                if g.has_nir() {
                    stats.with_nir += 1;
                }
            }
            if !g.is_complete() || g.normal.is_none() {
                stats.failed += 1;
            }
        }
        stats.without_nir = stats.total.saturating_sub(stats.with_nir);
        stats
    }
}

/// Per-line and combined statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    pub line1: GroupStats,
    pub line2: GroupStats,
    pub combined: GroupStats,
}

impl LineStats {
    pub fn from_groups(groups: &[Group]) -> Self {
        Self {
            line1: GroupStats::from_groups(groups.iter().filter(|g| g.line == Line::One)),
            line2: GroupStats::from_groups(groups.iter().filter(|g| g.line == Line::Two)),
            combined: GroupStats::from_groups(groups),
        }
    }
}

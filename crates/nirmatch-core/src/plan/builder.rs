/// Pure `groups × naming rules → MovePlan` derivation.
use super::{DirOp, FileOp, GroupPlan, MovePlan, PlanSlot, SubjectPlan, TransferMode, PLAN_SCHEMA_VERSION};
use crate::config::NamingRules;
use crate::model::Group;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Groups destined for one subject folder.
#[derive(Clone, Debug, Default)]
pub struct SubjectGroups {
    pub subject: String,
    pub groups: Vec<Group>,
}

/// Output folders for one subject.
struct Layout {
    root: PathBuf,
    with_nir: PathBuf,
    with_normal: PathBuf,
    with_mixed: PathBuf,
    without_normal: PathBuf,
    without_mixed: PathBuf,
}

impl Layout {
    fn new(output: &Path, subject: &str, naming: &NamingRules) -> Self {
        let root = normalize(&output.join(subject));
        let with = root.join(&naming.with_nir);
        let without = root.join(&naming.without_nir);
        Self {
            with_nir: with.join(&naming.nir),
            with_normal: with.join(&naming.normal_with_nir),
            with_mixed: with.join(&naming.mixed_camera),
            without_normal: without.join(&naming.normal_without_nir),
            without_mixed: without.join(&naming.mixed_camera),
            root,
        }
    }
}

/// Derive the plan for `subjects` under `output`.
///
/// Returns `None` when no group yields any operation. Subjects whose groups
/// yield nothing are omitted.
pub fn build_move_plan(
    date: &str,
    subjects: &[SubjectGroups],
    output: &Path,
    naming: &NamingRules,
    mode: TransferMode,
    created_at: NaiveDateTime,
) -> Option<MovePlan> {
    let mut by_subject = BTreeMap::new();
    for sg in subjects {
        let layout = Layout::new(output, &sg.subject, naming);
        let groups: Vec<GroupPlan> = sg
            .groups
            .iter()
            .map(|g| group_plan(g, &layout))
            .filter(|gp| !gp.is_empty())
            .collect();
        if groups.is_empty() {
            continue;
        }
        // Two lines may map onto the same subject; merge their groups.
        by_subject
            .entry(sg.subject.clone())
            .or_insert_with(|| SubjectPlan {
                output_root: layout.root.clone(),
                groups: Vec::new(),
            })
            .groups
            .extend(groups);
    }
    if by_subject.is_empty() {
        return None;
    }
    Some(MovePlan {
        schema_version: PLAN_SCHEMA_VERSION,
        created_at: created_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        mode,
        plan: BTreeMap::from([(date.to_owned(), by_subject)]),
    })
}

fn group_plan(group: &Group, layout: &Layout) -> GroupPlan {
    let has_nir = group.has_nir();
    let (normal_parent, mixed_parent) = if has_nir {
        (&layout.with_normal, &layout.with_mixed)
    } else {
        (&layout.without_normal, &layout.without_mixed)
    };

    let mut plan = GroupPlan::default();

    if let Some(normal) = group.normal.as_ref().filter(|n| n.has_image()) {
        plan.normal_dir = Some(DirOp {
            src_dir: normalize(&normal.folder),
            dst_dir: normalize(&normal_parent.join(normal.key.as_str())),
            label: format!("일반카메라:{}", normal.key),
        });
    }

    for slot in group.cams.iter().flatten() {
        let Some(key) = PlanSlot::for_role(slot.role) else {
            continue;
        };
        let dst = mixed_parent.join(slot.role.as_str()).join(slot.file.name.as_str());
        plan.files.entry(key).or_default().push(FileOp {
            src: normalize(&slot.file.path),
            dst: normalize(&dst),
        });
    }

    if let Some(nir) = &group.nir {
        let ops = nir
            .paths()
            .into_iter()
            .filter_map(|src| {
                let name = src.file_name()?;
                Some(FileOp {
                    src: normalize(src),
                    dst: normalize(&layout.with_nir.join(name)),
                })
            })
            .collect();
        plan.files.insert(PlanSlot::Nir, ops);
    }

    plan
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

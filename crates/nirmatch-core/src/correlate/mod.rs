/// Correlation engine: pool snapshot + ConsumedKeys → ordered groups.
///
/// Pure and deterministic: the same pool, consumed set, configuration and
/// `now` always produce the same groups. Each line is built in isolation,
/// then both lines are merged, sorted by timestamp, and named positionally.
///
/// Per line:
/// 1. Flatten each camera role into a sorted [`CamQueue`].
/// 2. For each Normal record (timestamp ascending) create a group and pop
///    one entry from each of the line's three camera queues.
/// 3. Every leftover camera entry becomes its own group.
/// 4. Sort by timestamp.
/// 5. Attach each unconsumed NIR record to the NIR-less group with the
///    smallest `group.ts - nir.ts` inside `[0, tolerance]`, else create a
///    NIR-only group.
pub mod queue;

pub use queue::{looks_like_copy, CamQueue};

use crate::config::Settings;
use crate::model::{ConsumedKeys, Group, Line, NirRecord, UnmatchedPool};
use crate::reader::timestamp::local_naive;
use chrono::{NaiveDateTime, TimeDelta};
use tracing::debug;

/// Tuning for one rebuild.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationConfig {
    /// Maximum seconds a NIR pair may precede its group.
    pub tolerance: TimeDelta,
    pub copy_markers: Vec<String>,
}

impl CorrelationConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tolerance: seconds(settings.nir_match_time_diff),
            copy_markers: settings.copy_markers.clone(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Fractional seconds at microsecond resolution.
pub fn seconds(secs: f64) -> TimeDelta {
    TimeDelta::microseconds((secs * 1_000_000.0).round() as i64)
}

/// Build groups for both lines. `now` stamps camera entries with no mtime.
pub fn build_all_groups(
    pool: &UnmatchedPool,
    consumed: &ConsumedKeys,
    config: &CorrelationConfig,
    now: NaiveDateTime,
) -> Vec<Group> {
    let mut groups: Vec<Group> = Line::ALL
        .into_iter()
        .flat_map(|line| build_line_groups(pool, consumed, config, line, now))
        .collect();
    groups.sort_by_key(|g| g.timestamp);
    for (i, g) in groups.iter_mut().enumerate() {
        g.name = format!("group_{:03}", i + 1);
        g.refresh_completeness();
    }
    debug!("Rebuilt {} groups", groups.len());
    groups
}

/// Build one line's groups, unnamed.
pub fn build_line_groups(
    pool: &UnmatchedPool,
    consumed: &ConsumedKeys,
    config: &CorrelationConfig,
    line: Line,
    now: NaiveDateTime,
) -> Vec<Group> {
    let mut normals: Vec<_> = pool.normals(line.normal_role()).collect();
    normals.sort_by_key(|r| r.timestamp);

    let mut queues: Vec<CamQueue> = line
        .camera_roles()
        .into_iter()
        .map(|role| CamQueue::build(pool.cams(role), &config.copy_markers))
        .collect();

    let mut groups = Vec::with_capacity(normals.len());
    for normal in normals {
        let mut group = Group::new(line, normal.timestamp);
        group.normal = Some(normal.clone());
        for (slot, queue) in group.cams.iter_mut().zip(queues.iter_mut()) {
            *slot = queue.pop();
        }
        groups.push(group);
    }

    for (i, queue) in queues.into_iter().enumerate() {
        for entry in queue {
            let ts = entry.file.modified.map(local_naive).unwrap_or(now);
            let mut group = Group::new(line, ts);
            group.cams[i] = Some(entry);
            groups.push(group);
        }
    }

    groups.sort_by_key(|g| g.timestamp);

    let mut nirs: Vec<&NirRecord> = pool
        .nirs(line.nir_role())
        .filter(|r| !consumed.contains(&r.key))
        .collect();
    nirs.sort_by_key(|r| r.timestamp);

    for nir in nirs {
        match nearest_following(&groups, nir, config.tolerance) {
            Some(idx) => groups[idx].nir = Some(nir.clone()),
            None => {
                let mut group = Group::new(line, nir.timestamp);
                group.nir = Some(nir.clone());
                groups.push(group);
            }
        }
    }
    groups
}

/// Index of the NIR-less group minimising `group.ts - nir.ts` within
/// `[0, tolerance]`. Ties go to the earliest group.
fn nearest_following(groups: &[Group], nir: &NirRecord, tolerance: TimeDelta) -> Option<usize> {
    let mut best: Option<(usize, TimeDelta)> = None;
    for (i, g) in groups.iter().enumerate() {
        if g.has_nir() {
            continue;
        }
        let diff = g.timestamp - nir.timestamp;
        if diff < TimeDelta::zero() || diff > tolerance {
            continue;
        }
        if best.is_none_or(|(_, d)| diff < d) {
            best = Some((i, diff));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CamFile, CamRecord, Completeness, NormalRecord, Record, Role};
    use chrono::NaiveDate;
    use compact_str::CompactString;
    use std::collections::{BTreeMap, HashSet};
    use std::path::PathBuf;
    use std::time::{Duration, UNIX_EPOCH};

    // ── Helpers ──────────────────────────────────────────────────

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn at(secs: f64) -> NaiveDateTime {
        base() + seconds(secs)
    }

    fn normal(role: Role, name: &str, secs: f64, with_image: bool) -> Record {
        let folder = PathBuf::from(format!("/normal/{name}"));
        let mut files = BTreeMap::new();
        if with_image {
            files.insert(CompactString::new("0.jpg"), folder.join("0.jpg"));
        }
        Record::Normal(NormalRecord {
            role,
            key: CompactString::new(name),
            folder,
            timestamp: at(secs),
            extra_timestamp: None,
            files,
        })
    }

    fn nir(role: Role, key: &str, secs: f64) -> Record {
        Record::Nir(crate::model::NirRecord {
            role,
            key: CompactString::new(key),
            timestamp: at(secs),
            spc: PathBuf::from(format!("/nir/{key}.spc")),
            txt: PathBuf::from(format!("/nir/{key}.txt")),
        })
    }

    fn cams(role: Role, files: &[(&str, u64)]) -> Record {
        Record::Cam(CamRecord {
            role,
            label: CompactString::new(role.as_str()),
            files: files
                .iter()
                .map(|(name, mtime)| {
                    (
                        CompactString::new(name),
                        CamFile {
                            name: CompactString::new(name),
                            path: PathBuf::from(format!("/{role}/{name}")),
                            modified: Some(UNIX_EPOCH + Duration::from_secs(*mtime)),
                            created: None,
                        },
                    )
                })
                .collect(),
        })
    }

    fn pool_of(records: Vec<Record>) -> UnmatchedPool {
        let mut pool = UnmatchedPool::new();
        for r in records {
            pool.insert(r);
        }
        pool
    }

    fn build(pool: &UnmatchedPool) -> Vec<Group> {
        build_all_groups(pool, &ConsumedKeys::new(), &CorrelationConfig::default(), base())
    }

    // ── Tests ────────────────────────────────────────────────────

    #[test]
    fn tolerance_boundary() {
        let pool = pool_of(vec![
            normal(Role::Normal, "C1", 100.0, true),
            nir(Role::Nir, "late", 98.9),
        ]);
        let groups = build(&pool);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.normal.is_none() || g.nir.is_none()));

        let pool = pool_of(vec![
            normal(Role::Normal, "C1", 100.0, true),
            nir(Role::Nir, "edge", 99.0),
        ]);
        let groups = build(&pool);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].nir.as_ref().unwrap().key, "edge");
    }

    #[test]
    fn nir_after_group_never_attaches() {
        let pool = pool_of(vec![
            normal(Role::Normal, "C1", 100.0, true),
            nir(Role::Nir, "after", 100.5),
        ]);
        let groups = build(&pool);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].timestamp, at(100.5));
        assert!(groups[1].normal.is_none());
    }

    #[test]
    fn nir_picks_closest_group_without_nir() {
        let pool = pool_of(vec![
            normal(Role::Normal, "Ca", 10.0, true),
            normal(Role::Normal, "Cb", 10.4, true),
            nir(Role::Nir, "n1", 10.0),
            nir(Role::Nir, "n2", 10.1),
        ]);
        let groups = build(&pool);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].nir.as_ref().unwrap().key, "n1");
        assert_eq!(groups[1].nir.as_ref().unwrap().key, "n2");
    }

    #[test]
    fn camera_queue_fifo_fairness() {
        let pool = pool_of(vec![
            normal(Role::Normal, "C1", 1.0, true),
            normal(Role::Normal, "C2", 2.0, true),
            cams(Role::Cam1, &[("b.jpg", 20), ("a.jpg", 10), ("c.jpg", 30)]),
        ]);
        let groups = build(&pool);
        let picked: Vec<_> = groups
            .iter()
            .filter_map(|g| g.cams[0].as_ref().map(|s| s.file.name.to_string()))
            .collect();
        let with_normal: Vec<_> = groups.iter().filter(|g| g.normal.is_some()).collect();
        assert_eq!(with_normal[0].cams[0].as_ref().unwrap().file.name, "a.jpg");
        assert_eq!(with_normal[1].cams[0].as_ref().unwrap().file.name, "b.jpg");
        assert_eq!(picked.len(), 3);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn no_double_attachment() {
        let pool = pool_of(vec![
            normal(Role::Normal, "C1", 1.0, true),
            normal(Role::Normal2, "C2", 1.0, true),
            cams(Role::Cam1, &[("a.jpg", 1), ("b.jpg", 2)]),
            cams(Role::Cam5, &[("x.jpg", 1)]),
            nir(Role::Nir, "n1", 0.5),
            nir(Role::Nir, "n2", 0.6),
            nir(Role::Nir2, "m1", 0.9),
        ]);
        let groups = build(&pool);
        let mut seen = HashSet::new();
        for g in &groups {
            for (_, path) in g.sources() {
                assert!(seen.insert(path.to_path_buf()), "{} attached twice", path.display());
            }
        }
        assert_eq!(seen.len(), 2 + 3 + 6);
    }

    #[test]
    fn lines_are_isolated() {
        let pool = pool_of(vec![
            normal(Role::Normal2, "C2", 5.0, true),
            nir(Role::Nir, "line1", 5.0),
        ]);
        let groups = build(&pool);
        assert_eq!(groups.len(), 2);
        let line2 = groups.iter().find(|g| g.line == Line::Two).unwrap();
        assert!(line2.nir.is_none());
    }

    #[test]
    fn consumed_keys_are_skipped() {
        let pool = pool_of(vec![nir(Role::Nir, "done", 1.0), nir(Role::Nir, "fresh", 2.0)]);
        let mut consumed = ConsumedKeys::new();
        consumed.insert("done".into());
        let groups = build_all_groups(&pool, &consumed, &CorrelationConfig::default(), base());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].nir.as_ref().unwrap().key, "fresh");
    }

    #[test]
    fn completeness_ignores_nir() {
        let pool = pool_of(vec![
            normal(Role::Normal, "C1", 1.0, true),
            normal(Role::Normal, "C2", 2.0, false),
            cams(Role::Cam1, &[("a", 1), ("b", 2)]),
            cams(Role::Cam2, &[("a", 1), ("b", 2)]),
            cams(Role::Cam3, &[("a", 1), ("b", 2)]),
        ]);
        let groups: Vec<_> = build(&pool)
            .into_iter()
            .filter(|g| g.normal.is_some())
            .collect();
        assert_eq!(groups[0].completeness, Completeness::Complete);
        assert!(!groups[0].has_nir());
        assert_eq!(groups[1].completeness, Completeness::Incomplete);
        assert_eq!(groups[1].missing_slots().len(), 1);
    }

    #[test]
    fn deterministic_and_named_positionally() {
        let pool = pool_of(vec![
            normal(Role::Normal, "C1", 3.0, true),
            normal(Role::Normal2, "C2", 1.0, true),
            cams(Role::Cam4, &[("a", 1), ("b", 2), ("c", 3)]),
            nir(Role::Nir2, "k", 0.5),
        ]);
        let first = build(&pool);
        let second = build(&pool);
        assert_eq!(first, second);
        let names: Vec<_> = first.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["group_001", "group_002", "group_003", "group_004"]);
        assert!(first.iter().any(|g| g.line == Line::Two && g.has_nir()));
        assert!(first.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}

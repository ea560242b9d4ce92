/// End-to-end executor tests against a real temporary filesystem.
///
/// The executor spawns its own worker pool, prompts over a real conflict
/// channel, and renames/copies actual files, so these run in `tests/` with
/// `tempfile` rather than as unit tests with a mocked filesystem.
use nirmatch_core::executor::{
    auto_respond, conflict_channel, ConflictResponse, ExecProgress, Executor, ExecutorConfig, RetryPolicy,
    RunStatus,
};
use nirmatch_core::plan::{DirOp, FileOp, GroupPlan, MovePlan, PlanSlot, SubjectPlan, TransferMode};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Every entry under `root`: directories map to `None`, files to their bytes.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    fn visit(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let rel = path.strip_prefix(root).unwrap().to_path_buf();
            if path.is_dir() {
                out.insert(rel, None);
                visit(root, &path, out);
            } else {
                out.insert(rel, Some(fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    visit(root, root, &mut out);
    out
}

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    out: PathBuf,
    plan: MovePlan,
}

/// Three Normal folders (one image each) and ten camera/NIR files split
/// over two buckets.
///
/// ```text
/// root/
///   src/normal/C2405..._0/img.jpg   × 3
///   src/cam1/a0.jpg .. a4.jpg
///   src/nir/k0.spc .. k4.spc
///   out/
/// ```
fn fixture(mode: TransferMode) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let src = root.join("src");
    let out = root.join("out");
    fs::create_dir_all(&out).unwrap();

    let subject_root = out.join("S1");
    let mut groups = Vec::new();
    for i in 0..3 {
        let folder = src.join("normal").join(format!("C24052{i}T100000_0"));
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("img.jpg"), format!("normal-{i}")).unwrap();
        groups.push(GroupPlan {
            normal_dir: Some(DirOp {
                dst_dir: subject_root.join("with NIR/일반").join(folder.file_name().unwrap()),
                label: format!("일반카메라:{}", folder.file_name().unwrap().to_string_lossy()),
                src_dir: folder,
            }),
            files: BTreeMap::new(),
        });
    }

    let mut cam_ops = Vec::new();
    let mut nir_ops = Vec::new();
    fs::create_dir_all(src.join("cam1")).unwrap();
    fs::create_dir_all(src.join("nir")).unwrap();
    for i in 0..5 {
        let cam = src.join("cam1").join(format!("a{i}.jpg"));
        fs::write(&cam, format!("cam-{i}")).unwrap();
        cam_ops.push(FileOp {
            dst: subject_root.join("with NIR/복합 카메라/cam1").join(cam.file_name().unwrap()),
            src: cam,
        });
        let nir = src.join("nir").join(format!("k{i}.spc"));
        fs::write(&nir, format!("nir-{i}")).unwrap();
        nir_ops.push(FileOp {
            dst: subject_root.join("with NIR/Nir").join(nir.file_name().unwrap()),
            src: nir,
        });
    }
    groups[0].files.insert(PlanSlot::Cam1, cam_ops);
    groups[0].files.insert(PlanSlot::Nir, nir_ops);

    let plan = MovePlan {
        schema_version: 1,
        created_at: "2024-05-21T10:00:00".into(),
        mode,
        plan: BTreeMap::from([(
            "240521".to_owned(),
            BTreeMap::from([(
                "S1".to_owned(),
                SubjectPlan {
                    output_root: subject_root,
                    groups,
                },
            )]),
        )]),
    };
    Fixture {
        _tmp: tmp,
        root,
        out,
        plan,
    }
}

fn config(workers: usize) -> ExecutorConfig {
    ExecutorConfig {
        workers,
        retry: RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(10),
        },
        conflict_timeout: Duration::from_secs(5),
    }
}

/// Executor that cancels itself after `n` progress events matching `pick`.
fn cancelling_executor(
    mode: TransferMode,
    n: usize,
    pick: fn(&ExecProgress) -> bool,
) -> (Executor, crossbeam_channel::Receiver<nirmatch_core::executor::ConflictRequest>) {
    let (tx, rx) = conflict_channel();
    let exec = Executor::new(mode, config(1), tx);
    let token = exec.cancel_token();
    let seen = Arc::new(AtomicUsize::new(0));
    let exec = exec.with_observer(move |p| {
        if pick(p) && seen.fetch_add(1, Ordering::SeqCst) + 1 == n {
            token.cancel();
        }
    });
    (exec, rx)
}

// ── Rollback ─────────────────────────────────────────────────────────────────

#[test]
fn move_cancelled_after_six_files_restores_original_tree() {
    let fx = fixture(TransferMode::Move);
    let before = snapshot(&fx.root);

    let (exec, _rx) = cancelling_executor(TransferMode::Move, 6, |p| matches!(p, ExecProgress::FileDone { .. }));
    let report = exec.execute(&fx.plan).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.status(), RunStatus::CancelledRolledBack);
    assert_eq!(report.dirs_ok, 3);
    assert_eq!(report.files_ok, 6);
    assert_eq!(report.rollback.unwrap().failed, 0);
    assert_eq!(snapshot(&fx.root), before);
}

#[test]
fn move_cancelled_after_two_dirs_restores_original_tree() {
    let fx = fixture(TransferMode::Move);
    let before = snapshot(&fx.root);

    let (exec, _rx) = cancelling_executor(TransferMode::Move, 2, |p| matches!(p, ExecProgress::DirDone { .. }));
    let report = exec.execute(&fx.plan).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.dirs_ok, 2);
    assert_eq!(report.files_ok, 0);
    assert_eq!(snapshot(&fx.root), before);
}

#[test]
fn copy_cancelled_removes_every_new_file() {
    let fx = fixture(TransferMode::Copy);
    let before = snapshot(&fx.root);

    let (exec, _rx) = cancelling_executor(TransferMode::Copy, 6, |p| matches!(p, ExecProgress::FileDone { .. }));
    let report = exec.execute(&fx.plan).unwrap();

    assert!(report.cancelled);
    assert_eq!(snapshot(&fx.root), before);
}

// ── Normal completion ────────────────────────────────────────────────────────

#[test]
fn move_completes_with_counts() {
    let fx = fixture(TransferMode::Move);
    let (tx, _rx) = conflict_channel();
    let report = Executor::new(TransferMode::Move, config(4), tx)
        .execute(&fx.plan)
        .unwrap();

    assert_eq!(report.status(), RunStatus::Completed { failures: 0 });
    assert_eq!((report.dirs_ok, report.files_ok), (3, 10));
    let nir = fx.out.join("S1/with NIR/Nir");
    assert_eq!(fs::read_dir(&nir).unwrap().count(), 5);
    assert_eq!(fs::read_to_string(nir.join("k3.spc")).unwrap(), "nir-3");
    assert!(fx
        .out
        .join("S1/with NIR/일반/C240521T100000_0/img.jpg")
        .is_file());
    assert!(!fx.root.join("src/cam1/a0.jpg").exists());
    assert!(!fx.root.join("src/normal/C240520T100000_0").exists());
}

#[test]
fn copy_leaves_sources_in_place() {
    let fx = fixture(TransferMode::Copy);
    let (tx, _rx) = conflict_channel();
    let report = Executor::new(TransferMode::Copy, config(4), tx)
        .execute(&fx.plan)
        .unwrap();

    assert_eq!(report.total_ok(), 13);
    assert_eq!(report.total_failed(), 0);
    assert!(fx.root.join("src/cam1/a0.jpg").is_file());
    assert!(fx.out.join("S1/with NIR/복합 카메라/cam1/a0.jpg").is_file());
}

#[test]
fn missing_source_counts_as_failure_not_cancel() {
    let fx = fixture(TransferMode::Move);
    fs::remove_file(fx.root.join("src/nir/k2.spc")).unwrap();
    let (tx, _rx) = conflict_channel();
    let report = Executor::new(TransferMode::Move, config(2), tx)
        .execute(&fx.plan)
        .unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.status().to_string(), "completed with 1 failures");
}

// ── Conflicts ────────────────────────────────────────────────────────────────

fn seed_conflicts(fx: &Fixture) {
    let dst = fx.out.join("S1/with NIR/Nir");
    fs::create_dir_all(&dst).unwrap();
    for i in 0..3 {
        fs::write(dst.join(format!("k{i}.spc")), "old").unwrap();
    }
}

#[test]
fn overwrite_all_is_asked_once_and_persists() {
    let fx = fixture(TransferMode::Copy);
    seed_conflicts(&fx);

    let (tx, rx) = conflict_channel();
    let responder = auto_respond(rx, ConflictResponse::OverwriteAll);
    let report = Executor::new(TransferMode::Copy, config(4), tx)
        .execute(&fx.plan)
        .unwrap();
    let prompts = responder.join().unwrap();

    assert_eq!(prompts, 1);
    assert!(!report.cancelled);
    for i in 0..3 {
        let body = fs::read_to_string(fx.out.join(format!("S1/with NIR/Nir/k{i}.spc"))).unwrap();
        assert_eq!(body, format!("nir-{i}"));
    }
    // Parked copies of the overwritten files are gone once the run completes.
    assert_eq!(fs::read_dir(fx.out.join("S1/with NIR/Nir")).unwrap().count(), 5);
}

#[test]
fn cancel_after_overwrites_restores_overwritten_destinations() {
    for mode in [TransferMode::Move, TransferMode::Copy] {
        let fx = fixture(mode);
        seed_conflicts(&fx);
        let before = snapshot(&fx.root);

        let (exec, rx) = cancelling_executor(mode, 9, |p| matches!(p, ExecProgress::FileDone { .. }));
        let responder = auto_respond(rx, ConflictResponse::OverwriteAll);
        let report = exec.execute(&fx.plan).unwrap();
        drop(exec);
        responder.join().unwrap();

        assert!(report.cancelled, "{mode}");
        assert_eq!(report.files_ok, 9, "{mode}");
        assert_eq!(report.rollback.unwrap().failed, 0, "{mode}");
        assert_eq!(snapshot(&fx.root), before, "{mode}");
    }
}

#[test]
fn overwrite_is_asked_per_conflict() {
    let fx = fixture(TransferMode::Copy);
    seed_conflicts(&fx);

    let (tx, rx) = conflict_channel();
    let responder = auto_respond(rx, ConflictResponse::Overwrite);
    let report = Executor::new(TransferMode::Copy, config(4), tx)
        .execute(&fx.plan)
        .unwrap();

    assert_eq!(responder.join().unwrap(), 3);
    assert!(!report.cancelled);
}

#[test]
fn cancel_on_conflict_touches_nothing() {
    let fx = fixture(TransferMode::Move);
    seed_conflicts(&fx);
    let before = snapshot(&fx.root);

    let (tx, rx) = conflict_channel();
    let responder = auto_respond(rx, ConflictResponse::Cancel);
    let report = Executor::new(TransferMode::Move, config(4), tx)
        .execute(&fx.plan)
        .unwrap();
    responder.join().unwrap();

    assert!(report.cancelled);
    assert_eq!(report.files_ok, 0);
    // Directory ops ran before the file pre-check and were rolled back.
    assert_eq!(snapshot(&fx.root), before);
}

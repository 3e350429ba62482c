//! End-to-end session tests: backup, reverse increments, restore, regress.

use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::{backup, BackupOptions};
use crate::config::{Config, SessionConfig};
use crate::increments::{self, IncKind, SessionTime};
use crate::output::OutputCtx;
use crate::regress::regress;
use crate::repo::Repo;
use crate::restore::{restore, RestoreOptions};

fn session_cfg(t: i64) -> SessionConfig {
    let mut cfg = SessionConfig::from_config(&Config::default());
    cfg.current_time = Some(t);
    cfg.fsync = false;
    cfg.pipeline_depth = 8;
    cfg
}

fn run_backup(source: &Path, repo: &Path, t: i64) {
    let ret = backup(
        source,
        repo,
        &BackupOptions {
            cfg: session_cfg(t),
            excludes: vec![],
        },
        &OutputCtx::silent(),
    )
    .unwrap();
    assert_eq!(ret, 0, "backup at {} reported errors", t);
}

fn run_restore(repo: &Path, target: &Path, at: i64) {
    let ret = restore(
        repo,
        target,
        SessionTime::from_unix(at),
        &RestoreOptions {
            cfg: session_cfg(at),
            force: true,
            require_metadata: false,
        },
        &OutputCtx::silent(),
    )
    .unwrap();
    assert_eq!(ret & crate::errors::RET_FILE_ERR, 0, "restore reported file errors");
}

fn read(path: &Path) -> String {
    String::from_utf8(fs::read(path).unwrap()).unwrap()
}

/// Every increment file below the data dir, as (base, unix time, kind).
fn all_increments(repo: &Path) -> Vec<(String, i64, IncKind)> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(repo.join("regressum-data"))
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else { continue };
        if let Some(inc) = increments::parse_inc_name(name) {
            if inc.kind != IncKind::Data && inc.base != "mirror_metadata" {
                out.push((inc.base, inc.time.unix(), inc.kind));
            }
        }
    }
    out
}

#[test]
fn simple_change_roundtrip() {
    // S1: one file changes content between two sessions
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("x"), b"aa").unwrap();

    run_backup(&src, &repo, 1000);
    fs::write(src.join("x"), b"bb").unwrap();
    run_backup(&src, &repo, 2000);

    // the live tree holds the newest state directly
    assert_eq!(read(&repo.join("x")), "bb");
    // the old state lives as a reverse diff stamped with the older session
    let incs = all_increments(&repo);
    assert!(
        incs.contains(&("x".to_string(), 1000, IncKind::Diff)),
        "missing x diff at t1: {:?}",
        incs
    );

    let r1 = tmp.path().join("r1");
    run_restore(&repo, &r1, 1000);
    assert_eq!(read(&r1.join("x")), "aa");

    let r2 = tmp.path().join("r2");
    run_restore(&repo, &r2, 2000);
    assert_eq!(read(&r2.join("x")), "bb");
}

#[test]
fn deleted_file_leaves_snapshot_increment() {
    // S2: a deleted file's old content survives as a snapshot increment and
    // its record disappears from the newer metadata
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a"), b"keep").unwrap();
    fs::write(src.join("b"), b"precious").unwrap();

    run_backup(&src, &repo, 1000);
    fs::remove_file(src.join("b")).unwrap();
    run_backup(&src, &repo, 2000);

    assert!(repo.join("a").exists());
    assert!(!repo.join("b").exists());
    let incs = all_increments(&repo);
    assert!(incs.contains(&("b".to_string(), 1000, IncKind::Snapshot)));

    let recs = Repo::new(&repo)
        .store()
        .get_at_time(SessionTime::from_unix(2000), None)
        .unwrap()
        .unwrap();
    assert!(!recs.iter().any(|r| r.index.to_string() == "b"));

    let r1 = tmp.path().join("r1");
    run_restore(&repo, &r1, 1000);
    assert_eq!(read(&r1.join("b")), "precious");
    let r2 = tmp.path().join("r2");
    run_restore(&repo, &r2, 2000);
    assert!(!r2.join("b").exists());
}

#[test]
fn directory_replaced_by_file() {
    // S3: dir with a child at t1, regular file at t2
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir_all(src.join("p")).unwrap();
    fs::write(src.join("p/c"), b"child").unwrap();

    run_backup(&src, &repo, 1000);
    fs::remove_dir_all(src.join("p")).unwrap();
    fs::write(src.join("p"), b"now a file").unwrap();
    run_backup(&src, &repo, 2000);

    assert!(repo.join("p").is_file());
    assert_eq!(read(&repo.join("p")), "now a file");
    let incs = all_increments(&repo);
    assert!(incs.contains(&("p".to_string(), 1000, IncKind::Dir)), "{:?}", incs);
    assert!(incs.contains(&("c".to_string(), 1000, IncKind::Snapshot)), "{:?}", incs);

    let r1 = tmp.path().join("r1");
    run_restore(&repo, &r1, 1000);
    assert!(r1.join("p").is_dir());
    assert_eq!(read(&r1.join("p/c")), "child");

    let r2 = tmp.path().join("r2");
    run_restore(&repo, &r2, 2000);
    assert!(r2.join("p").is_file());
    assert_eq!(read(&r2.join("p")), "now a file");
}

#[test]
fn file_replaced_by_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("p"), b"file first").unwrap();

    run_backup(&src, &repo, 1000);
    fs::remove_file(src.join("p")).unwrap();
    fs::create_dir(src.join("p")).unwrap();
    fs::write(src.join("p/inner"), b"deep").unwrap();
    run_backup(&src, &repo, 2000);

    assert!(repo.join("p").is_dir());
    assert_eq!(read(&repo.join("p/inner")), "deep");

    let r1 = tmp.path().join("r1");
    run_restore(&repo, &r1, 1000);
    assert!(r1.join("p").is_file());
    assert_eq!(read(&r1.join("p")), "file first");
}

#[cfg(unix)]
#[test]
fn hardlink_groups_survive_roundtrip() {
    // S4: two paths sharing one inode still share one after restore
    use std::os::unix::fs::MetadataExt;
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("x"), b"shared content").unwrap();
    fs::hard_link(src.join("x"), src.join("y")).unwrap();

    run_backup(&src, &repo, 1000);

    let r = tmp.path().join("r");
    run_restore(&repo, &r, 1000);
    assert_eq!(read(&r.join("x")), "shared content");
    assert_eq!(read(&r.join("y")), "shared content");
    let mx = fs::metadata(r.join("x")).unwrap();
    let my = fs::metadata(r.join("y")).unwrap();
    assert_eq!(mx.ino(), my.ino(), "restored paths must share an inode");
}

#[test]
fn aborted_session_regresses_cleanly() {
    // S5: a session that died mid-patch leaves two markers; regression
    // brings the mirror back bit-for-bit
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo_path = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("x"), b"aa").unwrap();
    fs::write(src.join("doomed"), b"newborn").unwrap();
    run_backup(&src, &repo_path, 1000);
    fs::remove_file(src.join("doomed")).unwrap();

    // hand-build the state an aborted session at t2 leaves behind: new
    // marker, fsync'd increments, a renamed mirror entry, a half-written one
    let repo = Repo::new(&repo_path);
    let t1 = SessionTime::from_unix(1000);
    let t2 = SessionTime::from_unix(2000);
    repo.touch_marker(t2).unwrap();
    fs::create_dir_all(repo.inc_root()).unwrap();

    // x: increment written AND rename done
    let tf = repo_path.join(".regressum.999.0.tmp");
    fs::write(&tf, b"bb").unwrap();
    increments::make_increment(Some(&tf), &repo_path.join("x"), &repo.inc_root().join("x"), t1, true)
        .unwrap()
        .unwrap();
    fs::rename(&tf, repo_path.join("x")).unwrap();
    // new file "fresh": missing-increment written, mirror entry created
    let tf2 = repo_path.join(".regressum.999.1.tmp");
    fs::write(&tf2, b"fresh content").unwrap();
    increments::make_increment(
        Some(&tf2),
        &repo_path.join("fresh"),
        &repo.inc_root().join("fresh"),
        t1,
        true,
    )
    .unwrap()
    .unwrap();
    fs::rename(&tf2, repo_path.join("fresh")).unwrap();
    // "doomed": snapshot increment written, deletion happened
    increments::make_increment(
        None,
        &repo_path.join("doomed"),
        &repo.inc_root().join("doomed"),
        t1,
        true,
    )
    .unwrap()
    .unwrap();
    fs::remove_file(repo_path.join("doomed")).unwrap();
    // a stray temp from a patch that never finished
    fs::write(repo_path.join(".regressum.999.2.tmp"), b"partial").unwrap();

    assert_eq!(repo.markers().unwrap().len(), 2);

    // restore refuses while the repository is in this state
    let err = restore(
        &repo_path,
        &tmp.path().join("nope"),
        t1,
        &RestoreOptions {
            cfg: session_cfg(1000),
            force: true,
            require_metadata: false,
        },
        &OutputCtx::silent(),
    );
    assert!(err.is_err());

    let ret = regress(&repo_path, &OutputCtx::silent(), false).unwrap();
    assert_eq!(ret & crate::errors::RET_FILE_ERR, 0);

    assert_eq!(repo.markers().unwrap().len(), 1);
    assert_eq!(read(&repo_path.join("x")), "aa");
    assert_eq!(read(&repo_path.join("doomed")), "newborn");
    assert!(!repo_path.join("fresh").exists());
    assert!(!repo_path.join(".regressum.999.2.tmp").exists());

    let r1 = tmp.path().join("r1");
    run_restore(&repo_path, &r1, 1000);
    assert_eq!(read(&r1.join("x")), "aa");
    assert_eq!(read(&r1.join("doomed")), "newborn");
    assert!(!r1.join("fresh").exists());
}

#[cfg(unix)]
#[test]
fn elevated_dir_perms_are_restored() {
    // S6: a directory unreadable to the running user round-trips with its
    // mode intact (only meaningful without root)
    use std::os::unix::fs::PermissionsExt;
    if crate::config::effective_uid() == 0 {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir_all(src.join("secret")).unwrap();
    fs::write(src.join("secret/inside"), b"hidden").unwrap();

    run_backup(&src, &repo, 1000);
    fs::set_permissions(src.join("secret"), fs::Permissions::from_mode(0o300)).unwrap();
    // touch something else so the session has work to do; the unlistable
    // source dir produces a ListError, so accept a FILE_ERR exit bit here
    fs::write(src.join("other"), b"o").unwrap();
    backup(
        &src,
        &repo,
        &BackupOptions {
            cfg: session_cfg(2000),
            excludes: vec![],
        },
        &OutputCtx::silent(),
    )
    .unwrap();
    fs::set_permissions(src.join("secret"), fs::Permissions::from_mode(0o700)).unwrap();

    let mode = fs::metadata(repo.join("secret")).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o300, "mirror dir mode must equal the source mode");

    let r = tmp.path().join("r");
    run_restore(&repo, &r, 2000);
    let mode = fs::metadata(r.join("secret")).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o300);
    let _ = fs::set_permissions(r.join("secret"), fs::Permissions::from_mode(0o700));
    let _ = fs::set_permissions(repo.join("secret"), fs::Permissions::from_mode(0o700));
}

#[test]
fn restore_time_between_sessions_picks_older() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("x"), b"one").unwrap();
    run_backup(&src, &repo, 1000);
    fs::write(src.join("x"), b"two").unwrap();
    run_backup(&src, &repo, 2000);
    fs::write(src.join("x"), b"three").unwrap();
    run_backup(&src, &repo, 3000);

    // strictly between t1 and t2 the mirror still held t1's state
    let r = tmp.path().join("r");
    run_restore(&repo, &r, 1500);
    assert_eq!(read(&r.join("x")), "one");
    let r2 = tmp.path().join("r2");
    run_restore(&repo, &r2, 2500);
    assert_eq!(read(&r2.join("x")), "two");
}

#[test]
fn three_sessions_chain_composes() {
    // reverse-diff chain validity across several sessions, nested dirs,
    // mtimes preserved to the second
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir_all(src.join("d/e")).unwrap();

    let states: Vec<Vec<(&str, &str)>> = vec![
        vec![("d/e/f", "v1"), ("top", "t1")],
        vec![("d/e/f", "v2 is a bit longer"), ("top", "t1"), ("d/new", "n2")],
        vec![("d/e/f", "v3"), ("top", "t3 changed"), ("d/new", "n3")],
    ];
    let times = [1000i64, 2000, 3000];

    for (state, t) in states.iter().zip(times) {
        // remove files not in this state
        for name in ["d/e/f", "top", "d/new"] {
            if !state.iter().any(|(n, _)| *n == name) {
                let _ = fs::remove_file(src.join(name));
            }
        }
        for (name, content) in state {
            fs::write(src.join(name), content).unwrap();
        }
        run_backup(&src, &repo, t);
    }

    for (state, t) in states.iter().zip(times) {
        let target = tmp.path().join(format!("r{}", t));
        run_restore(&repo, &target, t);
        for (name, content) in state {
            assert_eq!(
                read(&target.join(name)),
                *content,
                "wrong content for {} at {}",
                name,
                t
            );
            let src_m = fs::metadata(src.join(name));
            if let Ok(src_m) = src_m {
                // the latest state should also match mtimes
                if t == 3000 {
                    use filetime::FileTime;
                    let a = FileTime::from_last_modification_time(&src_m);
                    let b = FileTime::from_last_modification_time(
                        &fs::metadata(target.join(name)).unwrap(),
                    );
                    assert_eq!(a.unix_seconds(), b.unix_seconds());
                }
            }
        }
    }
}

#[cfg(unix)]
#[test]
fn symlinks_and_fifos_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("real"), b"data").unwrap();
    std::os::unix::fs::symlink("real", src.join("link")).unwrap();
    {
        let mut fifo = crate::record::Record::absent(crate::record::Index(vec!["pipe".into()]));
        fifo.ftype = crate::record::FileType::Fifo;
        fifo.perms = Some(0o644);
        crate::record::create_special(&fifo, &src.join("pipe")).unwrap();
    }

    run_backup(&src, &repo, 1000);
    fs::write(src.join("real"), b"data2").unwrap();
    run_backup(&src, &repo, 2000);

    let r = tmp.path().join("r");
    run_restore(&repo, &r, 1000);
    assert_eq!(fs::read_link(r.join("link")).unwrap(), PathBuf::from("real"));
    assert_eq!(read(&r.join("real")), "data");
    use std::os::unix::fs::FileTypeExt;
    assert!(fs::symlink_metadata(r.join("pipe"))
        .unwrap()
        .file_type()
        .is_fifo());
}

#[test]
fn list_and_remove_older_than() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo_path = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    for (t, content) in [(1000, "a"), (2000, "b"), (3000, "c")] {
        fs::write(src.join("x"), content).unwrap();
        run_backup(&src, &repo_path, t);
    }
    let repo = Repo::new(&repo_path);
    let times: Vec<i64> = repo
        .session_times()
        .unwrap()
        .iter()
        .map(|t| t.unix())
        .collect();
    assert_eq!(times, vec![1000, 2000, 3000]);

    crate::sessions::remove_older_than(
        &repo_path,
        SessionTime::from_unix(2000),
        &OutputCtx::silent(),
    )
    .unwrap();
    let incs = all_increments(&repo_path);
    assert!(!incs.iter().any(|(_, t, _)| *t < 2000), "{:?}", incs);

    // the surviving history still restores
    let r = tmp.path().join("r");
    run_restore(&repo_path, &r, 2000);
    assert_eq!(read(&r.join("x")), "b");
}

#[test]
fn unchanged_files_keep_their_hash_across_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let repo = tmp.path().join("repo");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("stable"), b"never changes").unwrap();
    fs::write(src.join("volatile"), b"v1").unwrap();

    run_backup(&src, &repo, 1000);
    fs::write(src.join("volatile"), b"v2").unwrap();
    run_backup(&src, &repo, 2000);

    let recs = Repo::new(&repo)
        .store()
        .get_at_time(SessionTime::from_unix(2000), None)
        .unwrap()
        .unwrap();
    let stable = recs
        .iter()
        .find(|r| r.index.to_string() == "stable")
        .unwrap();
    assert!(stable.sha256.is_some(), "hash must survive unchanged rows");

    let ret = crate::verify::verify(&repo, &OutputCtx::silent()).unwrap();
    assert_eq!(ret, 0);
}

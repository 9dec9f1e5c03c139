//! Integration tests for the fanout/equivalence engine, exercised directly
//! against real directories rather than through a live FUSE mount (mounting
//! needs `/dev/fuse` and elevated privileges unavailable in a normal test
//! run; see DESIGN.md's "Test tooling" entry).

use std::fs;
use std::path::{Path, PathBuf};

use mirrorfs::config::Config;
use mirrorfs::registry::ReplicaRegistry;
use mirrorfs::{equivalence, fanout};

fn two_replicas() -> (tempfile::TempDir, tempfile::TempDir, ReplicaRegistry) {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let registry = ReplicaRegistry::open(&[a.path().to_path_buf(), b.path().to_path_buf()]).unwrap();
    (a, b, registry)
}

#[test]
fn empty_replicas_agree_on_root_stat() {
    let (_a, _b, registry) = two_replicas();
    let results = fanout::stat(&registry, Path::new("."), libc::AT_SYMLINK_NOFOLLOW);
    let cfg = Config::default();
    let st = equivalence::check_stat("getattr", &cfg, &results).expect("identical empty dirs agree");
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFDIR);
}

#[test]
fn mkdir_then_readdir_sees_entry_then_rmdir_then_stat_enoent() {
    let (_a, _b, registry) = two_replicas();
    let cfg = Config::default();
    let dir = Path::new("sub");

    let results = fanout::mkdir(&registry, dir, 0o755);
    equivalence::check_scalar("mkdir", &cfg, &results).expect("mkdir agrees");

    let results = fanout::readdir(&registry, Path::new("."));
    let per_replica: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    let entries = equivalence::check_readdir("readdir", &per_replica);
    assert!(entries.iter().any(|(name, _)| name == "sub"));

    let results = fanout::rmdir(&registry, dir);
    equivalence::check_scalar("rmdir", &cfg, &results).expect("rmdir agrees");

    let results = fanout::stat(&registry, dir, libc::AT_SYMLINK_NOFOLLOW);
    let err = equivalence::check_stat("getattr", &cfg, &results).unwrap_err();
    assert_eq!(err, libc::ENOENT);
}

#[test]
fn create_write_release_then_read_back_matches() {
    let (a, b, registry) = two_replicas();
    let cfg = Config::default();
    let path = Path::new("file.txt");

    let open_results = fanout::open(
        &registry,
        path,
        libc::O_CREAT | libc::O_RDWR,
        0o644,
    );
    let fd0 = equivalence::check_open("open", &cfg, &open_results).expect("create agrees");
    let fds: Vec<_> = open_results.into_iter().map(Result::unwrap).collect();
    assert_eq!(fds[0], fd0);

    let data = b"hello mirrorfs";
    let write_results = fanout::write(&fds, data, 0);
    let n = equivalence::check_scalar("write", &cfg, &write_results).expect("write agrees");
    assert_eq!(n, data.len());

    let read_results = fanout::read(&fds, data.len(), 0);
    let payload = equivalence::check_bytes("read", &cfg, &read_results).expect("read agrees");
    assert_eq!(payload, data);

    for fd in fds {
        mirrorfs::sys::close(fd);
    }

    assert_eq!(fs::read(a.path().join("file.txt")).unwrap(), data);
    assert_eq!(fs::read(b.path().join("file.txt")).unwrap(), data);
}

#[test]
fn symlink_and_readlink_roundtrip() {
    let (_a, _b, registry) = two_replicas();
    let cfg = Config::default();
    let link = Path::new("link");

    let results = fanout::symlink(&registry, std::ffi::OsStr::new("target-name"), link);
    equivalence::check_scalar("symlink", &cfg, &results).expect("symlink agrees");

    let results = fanout::readlink(&registry, link, libc::PATH_MAX as usize);
    let target = equivalence::check_bytes("readlink", &cfg, &results).expect("readlink agrees");
    assert_eq!(target, b"target-name");
}

#[test]
fn divergent_errno_without_abort_reports_replica0_result() {
    let (a, b, registry) = two_replicas();
    // Create the file on replica 0 only: replica 1's stat will ENOENT while
    // replica 0 succeeds, an errno divergence. With `abort_on_difference`
    // disabled, the checker must return replica 0's outcome and keep going
    // instead of aborting the process.
    fs::write(a.path().join("only-on-0"), b"x").unwrap();
    assert!(!b.path().join("only-on-0").exists());

    let cfg = Config {
        abort_on_difference: false,
        log_operations: false,
    };
    let results = fanout::stat(&registry, Path::new("only-on-0"), libc::AT_SYMLINK_NOFOLLOW);
    let st = equivalence::check_stat("getattr", &cfg, &results).expect("replica0 succeeded");
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFREG);
}

#[test]
fn write_count_divergence_is_detected_not_silently_accepted() {
    // check_scalar's errno-only comparison would call this agreement (both
    // Ok, no errno). It is instead a short-write divergence: replica 1 wrote
    // fewer bytes than replica 0, and the scalar check has to compare the
    // Ok(usize) payloads, not just the error codes, to catch it. Exercised
    // with abort_on_difference disabled, since the aborting branch can only
    // be observed by killing the test process and re-running it as a child
    // (see divergent_write_count_aborts_process below).
    let cfg = Config {
        abort_on_difference: false,
        log_operations: false,
    };
    let write_results: Vec<equivalence::Outcome<usize>> = vec![Ok(14), Ok(9)];
    let n = equivalence::check_scalar("write", &cfg, &write_results).expect("replica0 succeeded");
    assert_eq!(n, 14, "divergence must not change which replica's count is reported");
}

/// Re-runs this same test binary filtered to the trigger test below, which
/// deliberately reproduces the short-write scenario with
/// `abort_on_difference` enabled. Before the fix, mismatched `Ok` values
/// went uncompared and the child would exit cleanly; after the fix,
/// `check_scalar` calls `std::process::abort()` and the child dies on
/// SIGABRT, which is visible from here without aborting this process too.
#[test]
fn divergent_write_count_aborts_process_when_configured_to() {
    let exe = std::env::current_exe().expect("test binary path");
    let output = std::process::Command::new(exe)
        .arg("write_abort_trigger__do_not_run_directly")
        .arg("--exact")
        .arg("--ignored")
        .arg("--test-threads=1")
        .env("MIRRORFS_TRIGGER_WRITE_ABORT", "1")
        .output()
        .expect("failed to spawn child test process");
    assert!(
        !output.status.success(),
        "child should have aborted on a short-write divergence, got status {:?}",
        output.status
    );
}

#[test]
#[ignore = "only meant to be invoked as a child process by divergent_write_count_aborts_process_when_configured_to"]
fn write_abort_trigger__do_not_run_directly() {
    if std::env::var_os("MIRRORFS_TRIGGER_WRITE_ABORT").is_none() {
        return;
    }
    let cfg = Config {
        abort_on_difference: true,
        log_operations: false,
    };
    let write_results: Vec<equivalence::Outcome<usize>> = vec![Ok(14), Ok(9)];
    let _ = equivalence::check_scalar("write", &cfg, &write_results);
}

#[test]
fn readdir_divergence_without_abort_falls_back_to_replica0_listing() {
    let (a, b, registry) = two_replicas();
    // replica 0 has a readable subdirectory; replica 1's has been removed
    // out from under it, so opening it for readdir will fail there while
    // replica 0 succeeds. With `abort_on_difference` disabled this must not
    // panic, and must report replica 0's own listing.
    fs::create_dir(a.path().join("sub")).unwrap();
    fs::create_dir(b.path().join("sub")).unwrap();
    fs::write(a.path().join("sub/only-on-0"), b"x").unwrap();
    fs::remove_dir_all(b.path().join("sub")).unwrap();

    let cfg = Config {
        abort_on_difference: false,
        log_operations: false,
    };
    let results = fanout::readdir(&registry, Path::new("sub"));

    let errno_only: Vec<Result<(), i32>> = results.iter().map(|r| r.as_ref().map(|_| ()).map_err(|e| *e)).collect();
    equivalence::check_scalar("readdir", &cfg, &errno_only).expect("replica0's open succeeded");

    let ok_replicas: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(ok_replicas.len(), 1, "only replica0's open should have succeeded");
    let entries: Vec<_> = ok_replicas[0].iter().map(|e| (e.name.clone(), e.d_type)).collect();
    assert!(entries.iter().any(|(name, _)| name == "only-on-0"));
}

#[test]
fn replica_registry_rejects_fewer_than_two_paths() {
    let a = tempfile::tempdir().unwrap();
    let err = ReplicaRegistry::open(&[a.path().to_path_buf()]).unwrap_err();
    assert!(err.to_string().contains("at least two replicas"));
}

#[test]
fn replica_registry_rejects_nonexistent_path() {
    let a = tempfile::tempdir().unwrap();
    let missing = PathBuf::from("/nonexistent/path/for/mirrorfs/tests");
    let err = ReplicaRegistry::open(&[a.path().to_path_buf(), missing]).unwrap_err();
    assert!(err.to_string().contains("could not open replica path"));
}

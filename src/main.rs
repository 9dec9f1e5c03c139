//! `mirrorfs` — a differential-testing mirror filesystem.
//!
//! Mounts a FUSE filesystem that fans every operation out to two or more
//! backing replica directories, compares their results, and aborts (by
//! default) the moment any of them disagree.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{crate_version, Arg, ArgAction, Command};
use fuser::MountOption;
use log::info;

use mirrorfs::config::Config;
use mirrorfs::fs::MirrorFs;
use mirrorfs::registry::ReplicaRegistry;

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mirrorfs: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let matches = Command::new("mirrorfs")
        .version(crate_version!())
        .about("Fan a FUSE mount out across N replica directories and flag divergences")
        .arg(
            Arg::new("PATHS")
                .required(true)
                .num_args(3..)
                .help("<replica>... <mountpoint> — at least two replicas, then the mountpoint"),
        )
        .arg(
            Arg::new("no-abort-on-difference")
                .long("no-abort-on-difference")
                .action(ArgAction::SetTrue)
                .help("Log divergences instead of aborting the process (payload divergences still abort)"),
        )
        .arg(
            Arg::new("log-operations")
                .long("log-operations")
                .action(ArgAction::SetTrue)
                .help("Log one line per dispatched operation"),
        )
        .arg(
            Arg::new("auto-unmount")
                .long("auto-unmount")
                .action(ArgAction::SetTrue)
                .help("Automatically unmount on process exit"),
        )
        .arg(
            Arg::new("allow-root")
                .long("allow-root")
                .action(ArgAction::SetTrue)
                .help("Allow root to access the mounted filesystem"),
        )
        .get_matches();

    let mut paths: Vec<PathBuf> = matches
        .get_many::<String>("PATHS")
        .expect("PATHS is required")
        .map(PathBuf::from)
        .collect();
    let mountpoint = paths.pop().expect("clap enforced at least 3 PATHS");
    let replica_paths = paths;

    let cfg = Config {
        abort_on_difference: !matches.get_flag("no-abort-on-difference"),
        log_operations: matches.get_flag("log-operations"),
    };

    // mirrorfs.c runs with a cleared process umask and applies the caller's
    // umask itself when creating files; the low-level FUSE protocol passes
    // it through explicitly instead of pre-masking the mode for us.
    unsafe {
        libc::umask(0);
    }

    let registry = ReplicaRegistry::open(&replica_paths).context("failed to open replicas")?;
    info!(
        "mounting {} replicas at {:?} (abort_on_difference={}, log_operations={})",
        registry.count(),
        mountpoint,
        cfg.abort_on_difference,
        cfg.log_operations
    );

    let fs = MirrorFs::new(registry, cfg);

    let mut options = vec![MountOption::FSName("mirrorfs".to_string())];
    if matches.get_flag("auto-unmount") {
        options.push(MountOption::AutoUnmount);
    }
    if matches.get_flag("allow-root") {
        options.push(MountOption::AllowRoot);
    }

    fuser::mount2(fs, &mountpoint, &options).context("FUSE session failed")?;
    Ok(())
}

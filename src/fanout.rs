//! Fanout Executor (C4).
//!
//! Runs one replica-local primitive per replica, sequentially, and collects
//! an N-long vector of outcomes. No intra-request parallelism (spec.md §5):
//! replicas are not required to be thread-safe relative to each other, and
//! the engine holds no locks across a blocking syscall.

use std::ffi::OsStr;
use std::os::unix::io::RawFd;
use std::path::Path;

use crate::equivalence::Outcome;
use crate::registry::ReplicaRegistry;
use crate::sys;

pub fn stat(registry: &ReplicaRegistry, path: &Path, flags: libc::c_int) -> Vec<Outcome<libc::stat>> {
    (0..registry.count())
        .map(|i| sys::fstatat(registry.fd(i), path, flags))
        .collect()
}

pub fn access(registry: &ReplicaRegistry, path: &Path, mask: libc::c_int) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::faccessat(registry.fd(i), path, mask))
        .collect()
}

pub fn readlink(registry: &ReplicaRegistry, path: &Path, bufsize: usize) -> Vec<Outcome<Vec<u8>>> {
    (0..registry.count())
        .map(|i| {
            let mut buf = vec![0u8; bufsize];
            sys::readlinkat(registry.fd(i), path, &mut buf).map(|n| {
                buf.truncate(n);
                buf
            })
        })
        .collect()
}

pub fn mkdir(registry: &ReplicaRegistry, path: &Path, mode: libc::mode_t) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::mkdirat(registry.fd(i), path, mode))
        .collect()
}

pub fn unlink(registry: &ReplicaRegistry, path: &Path) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::unlinkat(registry.fd(i), path, 0))
        .collect()
}

pub fn rmdir(registry: &ReplicaRegistry, path: &Path) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::unlinkat(registry.fd(i), path, libc::AT_REMOVEDIR))
        .collect()
}

pub fn symlink(registry: &ReplicaRegistry, target: &OsStr, link_path: &Path) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::symlinkat(target, registry.fd(i), link_path))
        .collect()
}

/// Rename is confined to a single replica root: source and destination are
/// resolved against the same per-replica directory handle (spec.md §4.6,
/// §9 open question).
pub fn rename(registry: &ReplicaRegistry, from: &Path, to: &Path) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::renameat(registry.fd(i), from, registry.fd(i), to))
        .collect()
}

pub fn link(registry: &ReplicaRegistry, from: &Path, to: &Path) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::linkat(registry.fd(i), from, registry.fd(i), to))
        .collect()
}

pub fn chmod(registry: &ReplicaRegistry, path: &Path, mode: libc::mode_t) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::fchmodat(registry.fd(i), path, mode))
        .collect()
}

pub fn chown(registry: &ReplicaRegistry, path: &Path, uid: libc::uid_t, gid: libc::gid_t) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::fchownat(registry.fd(i), path, uid, gid))
        .collect()
}

pub fn utimens(registry: &ReplicaRegistry, path: &Path, times: &[libc::timespec; 2]) -> Vec<Outcome<()>> {
    (0..registry.count())
        .map(|i| sys::utimensat(registry.fd(i), path, times))
        .collect()
}

/// Shared by `open` and `create`. `mode` is ignored unless `flags` contains
/// `O_CREAT`.
pub fn open(registry: &ReplicaRegistry, path: &Path, flags: libc::c_int, mode: libc::mode_t) -> Vec<Outcome<RawFd>> {
    (0..registry.count())
        .map(|i| sys::openat(registry.fd(i), path, flags, mode))
        .collect()
}

pub fn read(fds: &[RawFd], size: usize, offset: i64) -> Vec<Outcome<Vec<u8>>> {
    fds.iter()
        .map(|&fd| {
            let mut buf = vec![0u8; size];
            sys::pread(fd, &mut buf, offset).map(|n| {
                buf.truncate(n);
                buf
            })
        })
        .collect()
}

pub fn write(fds: &[RawFd], data: &[u8], offset: i64) -> Vec<Outcome<usize>> {
    fds.iter().map(|&fd| sys::pwrite(fd, data, offset)).collect()
}

pub fn readdir(registry: &ReplicaRegistry, path: &Path) -> Vec<Outcome<Vec<sys::RawDirent>>> {
    (0..registry.count())
        .map(|i| sys::read_dir_names(registry.fd(i), path))
        .collect()
}

//! Equivalence Checker (C5).
//!
//! Applies the per-operation comparison policy from spec.md §4.5 to the
//! tuples the Fanout Executor collects, replica 0 always being the
//! reference. Three outcomes, per spec.md §7:
//!   - agreement: no diagnostic, continue.
//!   - scalar/errno mismatch: diagnostic, then abort (if
//!     `abort_on_difference`) or continue with replica 0's answer.
//!   - payload mismatch (bytes, directory-entry names) or an internal
//!     invariant violation: diagnostic, then abort unconditionally.

use std::ffi::OsString;
use std::fmt::Debug;
use std::os::unix::io::RawFd;

use log::error;

use crate::config::Config;
use crate::sys::RawDirent;

fn report(op: &str, field: &str, v0: &dyn Debug, vi: &dyn Debug, i: usize) {
    error!("{op}: {field} replica0={v0:?} != replica{i}={vi:?}");
}

fn scalar_mismatch(cfg: &Config) {
    if cfg.abort_on_difference {
        std::process::abort();
    }
}

fn payload_mismatch() -> ! {
    std::process::abort();
}

fn invariant_violation(msg: &str) -> ! {
    error!("internal invariant violation: {msg}");
    std::process::abort();
}

/// Result of a fanned-out operation for one replica: success, or the raw
/// errno the syscall left behind.
pub type Outcome<T> = Result<T, i32>;

/// Compares return-value/error-code operations (access, mkdir, unlink,
/// rmdir, symlink, rename, link, chmod, chown, utimens, write). Returns
/// replica 0's outcome, having already reported/acted on any divergence —
/// in the errno *or* the success value (write's byte count, most notably:
/// a short write on one replica is a divergence even though every replica
/// returned `Ok`, matching `mirrorfs.c`'s `ABORT_IF_NOT_EQUAL` on the
/// `write()` return value).
pub fn check_scalar<T: Clone + Debug + PartialEq>(op: &str, cfg: &Config, results: &[Outcome<T>]) -> Outcome<T> {
    let errno0 = results[0].as_ref().err().copied();
    for (i, r) in results.iter().enumerate().skip(1) {
        let errno_i = r.as_ref().err().copied();
        if errno0 != errno_i {
            report(op, "errno", &errno0, &errno_i, i);
            scalar_mismatch(cfg);
        }
    }
    if let Ok(v0) = &results[0] {
        for (i, r) in results.iter().enumerate().skip(1) {
            if let Ok(vi) = r {
                if v0 != vi {
                    report(op, "value", v0, vi, i);
                    scalar_mismatch(cfg);
                }
            }
        }
    }
    results[0].clone()
}

/// getattr's comparison policy: return value/errno, then (on success)
/// `st_mode`, `st_nlink`, `st_uid`, `st_gid`, and `st_size` unless the
/// canonical replica's object is a directory.
pub fn check_stat(op: &str, cfg: &Config, results: &[Outcome<libc::stat>]) -> Outcome<libc::stat> {
    let errno0 = results[0].as_ref().err().copied();
    for (i, r) in results.iter().enumerate().skip(1) {
        let errno_i = r.as_ref().err().copied();
        if errno0 != errno_i {
            report(op, "errno", &errno0, &errno_i, i);
            scalar_mismatch(cfg);
        }
    }
    if let Ok(st0) = &results[0] {
        let is_dir = (st0.st_mode & libc::S_IFMT) == libc::S_IFDIR;
        for (i, r) in results.iter().enumerate().skip(1) {
            if let Ok(sti) = r {
                if st0.st_mode != sti.st_mode {
                    report(op, "st_mode", &st0.st_mode, &sti.st_mode, i);
                    scalar_mismatch(cfg);
                }
                if st0.st_nlink != sti.st_nlink {
                    report(op, "st_nlink", &st0.st_nlink, &sti.st_nlink, i);
                    scalar_mismatch(cfg);
                }
                if st0.st_uid != sti.st_uid {
                    report(op, "st_uid", &st0.st_uid, &sti.st_uid, i);
                    scalar_mismatch(cfg);
                }
                if st0.st_gid != sti.st_gid {
                    report(op, "st_gid", &st0.st_gid, &sti.st_gid, i);
                    scalar_mismatch(cfg);
                }
                if !is_dir && st0.st_size != sti.st_size {
                    report(op, "st_size", &st0.st_size, &sti.st_size, i);
                    scalar_mismatch(cfg);
                }
            }
        }
    }
    results[0].clone()
}

/// Readlink/read's comparison policy: return value/errno, then (on success)
/// byte-identical payload up to `ret` bytes. Payload divergence is always
/// fatal.
pub fn check_bytes(op: &str, cfg: &Config, results: &[Outcome<Vec<u8>>]) -> Outcome<Vec<u8>> {
    let errno0 = results[0].as_ref().err().copied();
    for (i, r) in results.iter().enumerate().skip(1) {
        let errno_i = r.as_ref().err().copied();
        if errno0 != errno_i {
            report(op, "errno", &errno0, &errno_i, i);
            scalar_mismatch(cfg);
        }
    }
    if let Ok(b0) = &results[0] {
        for (i, r) in results.iter().enumerate().skip(1) {
            if let Ok(bi) = r {
                if b0 != bi {
                    report(op, "payload", &"<bytes>", &"<bytes>", i);
                    payload_mismatch();
                }
            }
        }
    }
    results[0].clone()
}

/// open/create's comparison policy: only the success-ness of the returned
/// descriptor and the error code are compared; numeric fd values are never
/// required to match. Inconsistent success-vs-failure across replicas is an
/// internal invariant violation, not an ordinary mismatch.
pub fn check_open(op: &str, cfg: &Config, results: &[Outcome<RawFd>]) -> Outcome<RawFd> {
    let ok0 = results[0].is_ok();
    for (i, r) in results.iter().enumerate().skip(1) {
        if r.is_ok() != ok0 {
            invariant_violation(&format!(
                "{op}: inconsistent open success across replicas (replica0 ok={ok0}, replica{i} ok={})",
                r.is_ok()
            ));
        }
    }
    let errno0 = results[0].as_ref().err().copied();
    for (i, r) in results.iter().enumerate().skip(1) {
        let errno_i = r.as_ref().err().copied();
        if errno0 != errno_i {
            report(op, "errno", &errno0, &errno_i, i);
            scalar_mismatch(cfg);
        }
    }
    results[0].clone()
}

/// Readdir's comparison policy: entries are iterated in replica 0's order;
/// every other replica must yield an entry with the same name at the
/// corresponding position. A missing or differently-named entry on any
/// non-canonical replica is always fatal. Replica 0's entries (including
/// `d_type`) are returned; `d_type` itself is not part of the comparison.
pub fn check_readdir(op: &str, per_replica: &[Vec<RawDirent>]) -> Vec<(OsString, u8)> {
    let names0: Vec<&OsString> = per_replica[0].iter().map(|e| &e.name).collect();
    for (i, entries_i) in per_replica.iter().enumerate().skip(1) {
        for (pos, name0) in names0.iter().enumerate() {
            match entries_i.get(pos) {
                Some(entry_i) if &&entry_i.name == name0 => {}
                Some(entry_i) => {
                    report(op, "entry name", name0, &entry_i.name, i);
                    payload_mismatch();
                }
                None => {
                    report(op, "entry name", name0, &"<missing>", i);
                    payload_mismatch();
                }
            }
        }
    }
    per_replica[0]
        .iter()
        .map(|e| (e.name.clone(), e.d_type))
        .collect()
}

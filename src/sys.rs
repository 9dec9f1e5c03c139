//! Thin wrappers around the `*at` syscall family, one per primitive
//! `mirrorfs.c` uses. Each returns `Result<T, i32>` where the error is a raw
//! `errno` value — the same currency the Equivalence Checker (C5) compares
//! across replicas and the Operation Surface (C6) hands back to the kernel.
//!
//! These are deliberately thin: no retry-on-EINTR, no path validation beyond
//! what the kernel already guarantees. Matching the original byte-for-byte
//! is the point; a differential harness that "improves" on its own target's
//! syscalls would no longer be testing the same thing.

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn cstr(path: &Path) -> CString {
    CString::new(path.as_os_str().as_bytes()).expect("path contains an interior NUL")
}

pub fn fstatat(dirfd: RawFd, path: &Path, flags: libc::c_int) -> Result<libc::stat, i32> {
    let c = cstr(path);
    unsafe {
        let mut st: libc::stat = std::mem::zeroed();
        let res = libc::fstatat(dirfd, c.as_ptr(), &mut st, flags);
        if res == -1 { Err(errno()) } else { Ok(st) }
    }
}

pub fn faccessat(dirfd: RawFd, path: &Path, mode: libc::c_int) -> Result<(), i32> {
    let c = cstr(path);
    let res = unsafe { libc::faccessat(dirfd, c.as_ptr(), mode, 0) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn readlinkat(dirfd: RawFd, path: &Path, buf: &mut [u8]) -> Result<usize, i32> {
    let c = cstr(path);
    let res = unsafe {
        libc::readlinkat(
            dirfd,
            c.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
        )
    };
    if res == -1 { Err(errno()) } else { Ok(res as usize) }
}

pub fn openat(dirfd: RawFd, path: &Path, flags: libc::c_int, mode: libc::mode_t) -> Result<RawFd, i32> {
    let c = cstr(path);
    let res = unsafe { libc::openat(dirfd, c.as_ptr(), flags, mode as libc::c_uint) };
    if res == -1 { Err(errno()) } else { Ok(res) }
}

pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

pub fn mkdirat(dirfd: RawFd, path: &Path, mode: libc::mode_t) -> Result<(), i32> {
    let c = cstr(path);
    let res = unsafe { libc::mkdirat(dirfd, c.as_ptr(), mode) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn unlinkat(dirfd: RawFd, path: &Path, flags: libc::c_int) -> Result<(), i32> {
    let c = cstr(path);
    let res = unsafe { libc::unlinkat(dirfd, c.as_ptr(), flags) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn symlinkat(target: &OsStr, dirfd: RawFd, linkpath: &Path) -> Result<(), i32> {
    let target_c = CString::new(target.as_bytes()).expect("target contains an interior NUL");
    let link_c = cstr(linkpath);
    let res = unsafe { libc::symlinkat(target_c.as_ptr(), dirfd, link_c.as_ptr()) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn renameat(olddirfd: RawFd, oldpath: &Path, newdirfd: RawFd, newpath: &Path) -> Result<(), i32> {
    let old_c = cstr(oldpath);
    let new_c = cstr(newpath);
    let res = unsafe { libc::renameat(olddirfd, old_c.as_ptr(), newdirfd, new_c.as_ptr()) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn linkat(olddirfd: RawFd, oldpath: &Path, newdirfd: RawFd, newpath: &Path) -> Result<(), i32> {
    let old_c = cstr(oldpath);
    let new_c = cstr(newpath);
    let res = unsafe { libc::linkat(olddirfd, old_c.as_ptr(), newdirfd, new_c.as_ptr(), 0) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn fchmodat(dirfd: RawFd, path: &Path, mode: libc::mode_t) -> Result<(), i32> {
    let c = cstr(path);
    // Matches mirrorfs.c: flags 0, not AT_SYMLINK_NOFOLLOW (glibc rejects
    // that combination for fchmodat on most filesystems anyway).
    let res = unsafe { libc::fchmodat(dirfd, c.as_ptr(), mode, 0) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn fchownat(dirfd: RawFd, path: &Path, uid: libc::uid_t, gid: libc::gid_t) -> Result<(), i32> {
    let c = cstr(path);
    let res = unsafe { libc::fchownat(dirfd, c.as_ptr(), uid, gid, 0) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn utimensat(dirfd: RawFd, path: &Path, times: &[libc::timespec; 2]) -> Result<(), i32> {
    let c = cstr(path);
    let res = unsafe { libc::utimensat(dirfd, c.as_ptr(), times.as_ptr(), libc::AT_SYMLINK_NOFOLLOW) };
    if res == -1 { Err(errno()) } else { Ok(()) }
}

pub fn pread(fd: RawFd, buf: &mut [u8], offset: i64) -> Result<usize, i32> {
    let res = unsafe {
        libc::pread(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    };
    if res == -1 { Err(errno()) } else { Ok(res as usize) }
}

pub fn pwrite(fd: RawFd, buf: &[u8], offset: i64) -> Result<usize, i32> {
    let res = unsafe {
        libc::pwrite(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    };
    if res == -1 { Err(errno()) } else { Ok(res as usize) }
}

/// Opens `path` as a directory relative to `dirfd` and reads all entry names
/// in kernel order, matching `readdir(3)`'s iteration order exactly (the
/// Equivalence Checker relies on replicas being compared entry-by-entry in
/// that order).
/// One directory entry: its name and raw `d_type` (`DT_*`; `DT_UNKNOWN` if
/// the backing filesystem doesn't populate it).
pub struct RawDirent {
    pub name: std::ffi::OsString,
    pub d_type: u8,
}

pub fn read_dir_names(dirfd: RawFd, path: &Path) -> Result<Vec<RawDirent>, i32> {
    let fd = openat(dirfd, path, libc::O_RDONLY | libc::O_DIRECTORY, 0)?;
    let dirp = unsafe { libc::fdopendir(fd) };
    if dirp.is_null() {
        let e = errno();
        close(fd);
        return Err(e);
    }
    let mut entries = Vec::new();
    loop {
        unsafe { *libc::__errno_location() = 0 };
        let entry = unsafe { libc::readdir(dirp) };
        if entry.is_null() {
            let e = errno();
            if e != 0 {
                unsafe { libc::closedir(dirp) };
                return Err(e);
            }
            break;
        }
        let name = unsafe { std::ffi::CStr::from_ptr((*entry).d_name.as_ptr()).to_owned() };
        let name = std::ffi::OsStr::from_bytes(name.as_bytes()).to_os_string();
        if name == "." || name == ".." {
            continue;
        }
        let d_type = unsafe { (*entry).d_type };
        entries.push(RawDirent { name, d_type });
    }
    unsafe { libc::closedir(dirp) };
    Ok(entries)
}

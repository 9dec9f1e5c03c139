//! Operation Surface (C6).
//!
//! One `fuser::Filesystem` method per spec'd operation. Each follows the
//! same shape: resolve the inode to a relative path (C8 + C2), fan the
//! primitive out across replicas (C4), run it through the Equivalence
//! Checker (C5), then translate replica 0's outcome into a kernel reply.
//! `lookup`/`forget` are the ambient glue `fuser`'s inode-keyed trait needs
//! that spec.md's path-keyed design doesn't otherwise require.

use std::ffi::{OsStr, OsString};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, warn};

use crate::config::Config;
use crate::equivalence;
use crate::fanout;
use crate::handle_table::HandleTable;
use crate::inode::{InodeRegistry, ROOT_INO};
use crate::pathutil;
use crate::registry::ReplicaRegistry;
use crate::sys;

/// Entries never expire client-side: every divergence must be seen by this
/// process, so the kernel can never skip a call because of a cached answer.
const TTL: Duration = Duration::ZERO;

pub struct MirrorFs {
    registry: ReplicaRegistry,
    inodes: InodeRegistry,
    handles: HandleTable,
    cfg: Config,
}

impl MirrorFs {
    pub fn new(registry: ReplicaRegistry, cfg: Config) -> Self {
        Self {
            registry,
            inodes: InodeRegistry::new(),
            handles: HandleTable::new(),
            cfg,
        }
    }

    fn log_op(&self, op: &str, path: &Path) {
        if self.cfg.log_operations {
            debug!("{op} {path:?}");
        }
    }

    fn path_for(&self, ino: u64) -> Result<PathBuf, i32> {
        self.inodes.path_of(ino).ok_or(libc::ENOENT)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<PathBuf, i32> {
        let parent_path = self.path_for(parent)?;
        Ok(pathutil::join(&parent_path, name))
    }

    fn attr_of(&self, ino: u64, path: &Path, follow: bool) -> Result<FileAttr, i32> {
        let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
        let results = fanout::stat(&self.registry, path, flags);
        let st = equivalence::check_stat("getattr", &self.cfg, &results)?;
        Ok(stat_to_attr(ino, &st))
    }

    /// Shared by `open` and `create`: fans `openat` out, checks the
    /// success/errno-only policy, and registers the canonical descriptor's
    /// side-table entry. Returns the canonical (replica 0) descriptor, which
    /// doubles as the `fh` handed back to the kernel.
    fn open_fanout(&self, path: &Path, flags: libc::c_int, mode: libc::mode_t) -> Result<RawFd, i32> {
        let results = fanout::open(&self.registry, path, flags, mode);
        let fd0 = equivalence::check_open("open", &self.cfg, &results)?;
        let others: Vec<RawFd> = results
            .into_iter()
            .skip(1)
            .map(|r| r.expect("check_open already asserted consistent success across replicas"))
            .collect();
        self.handles.install(fd0, others);
        Ok(fd0)
    }
}

fn to_file_type(mode: libc::mode_t) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn time_from_ts(sec: i64, nsec: i64) -> SystemTime {
    if sec >= 0 {
        UNIX_EPOCH + Duration::new(sec as u64, nsec.max(0) as u32)
    } else {
        UNIX_EPOCH - Duration::new((-sec) as u64, 0)
    }
}

fn time_or_now_to_timespec(t: Option<TimeOrNow>) -> libc::timespec {
    match t {
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        Some(TimeOrNow::Now) => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        Some(TimeOrNow::SpecificTime(st)) => {
            let dur = st.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
            libc::timespec {
                tv_sec: dur.as_secs() as libc::time_t,
                tv_nsec: dur.subsec_nanos() as _,
            }
        }
    }
}

fn d_type_to_file_type(d_type: u8) -> FileType {
    match d_type {
        libc::DT_DIR => FileType::Directory,
        libc::DT_LNK => FileType::Symlink,
        libc::DT_CHR => FileType::CharDevice,
        libc::DT_BLK => FileType::BlockDevice,
        libc::DT_FIFO => FileType::NamedPipe,
        libc::DT_SOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn stat_to_attr(ino: u64, st: &libc::stat) -> FileAttr {
    let ctime = time_from_ts(st.st_ctime, st.st_ctime_nsec);
    FileAttr {
        ino,
        size: st.st_size as u64,
        blocks: st.st_blocks as u64,
        atime: time_from_ts(st.st_atime, st.st_atime_nsec),
        mtime: time_from_ts(st.st_mtime, st.st_mtime_nsec),
        ctime,
        crtime: ctime,
        kind: to_file_type(st.st_mode),
        perm: (st.st_mode & 0o7777) as u16,
        nlink: st.st_nlink as u32,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u32,
        blksize: st.st_blksize as u32,
        flags: 0,
    }
}

impl Filesystem for MirrorFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        debug!(
            "init: {} replicas, abort_on_difference={}",
            self.registry.count(),
            self.cfg.abort_on_difference
        );
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        match self.attr_of(0, &path, false) {
            Ok(mut attr) => {
                let ino = self.inodes.lookup(&path);
                attr.ino = ino;
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        if ino != ROOT_INO {
            self.inodes.forget(ino, nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("getattr", &path);
        match self.attr_of(ino, &path, false) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        _size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("setattr", &path);

        if let Some(mode) = mode {
            let results = fanout::chmod(&self.registry, &path, mode as libc::mode_t);
            if let Err(e) = equivalence::check_scalar("chmod", &self.cfg, &results) {
                return reply.error(e);
            }
        }
        if uid.is_some() || gid.is_some() {
            let results = fanout::chown(
                &self.registry,
                &path,
                uid.unwrap_or(u32::MAX),
                gid.unwrap_or(u32::MAX),
            );
            if let Err(e) = equivalence::check_scalar("chown", &self.cfg, &results) {
                return reply.error(e);
            }
        }
        if atime.is_some() || mtime.is_some() {
            let times = [
                time_or_now_to_timespec(atime),
                time_or_now_to_timespec(mtime),
            ];
            let results = fanout::utimens(&self.registry, &path, &times);
            if let Err(e) = equivalence::check_scalar("utimens", &self.cfg, &results) {
                return reply.error(e);
            }
        }

        match self.attr_of(ino, &path, false) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("access", &path);
        let results = fanout::access(&self.registry, &path, mask);
        match equivalence::check_scalar("access", &self.cfg, &results) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("readlink", &path);
        let results = fanout::readlink(&self.registry, &path, libc::PATH_MAX as usize);
        match equivalence::check_bytes("readlink", &self.cfg, &results) {
            Ok(buf) => reply.data(&buf),
            Err(e) => reply.error(e),
        }
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("mkdir", &path);
        let results = fanout::mkdir(&self.registry, &path, (mode & !umask) as libc::mode_t);
        if let Err(e) = equivalence::check_scalar("mkdir", &self.cfg, &results) {
            return reply.error(e);
        }
        match self.attr_of(0, &path, false) {
            Ok(mut attr) => {
                let ino = self.inodes.lookup(&path);
                attr.ino = ino;
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("unlink", &path);
        let results = fanout::unlink(&self.registry, &path);
        match equivalence::check_scalar("unlink", &self.cfg, &results) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("rmdir", &path);
        let results = fanout::rmdir(&self.registry, &path);
        match equivalence::check_scalar("rmdir", &self.cfg, &results) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, link_name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("symlink", &path);
        let results = fanout::symlink(&self.registry, target.as_os_str(), &path);
        if let Err(e) = equivalence::check_scalar("symlink", &self.cfg, &results) {
            return reply.error(e);
        }
        match self.attr_of(0, &path, false) {
            Ok(mut attr) => {
                let ino = self.inodes.lookup(&path);
                attr.ino = ino;
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            // RENAME_NOREPLACE/RENAME_EXCHANGE aren't part of the original
            // surface; reject without touching any replica.
            return reply.error(libc::EINVAL);
        }
        let from = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        let to = match self.child_path(newparent, newname) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("rename", &from);
        let results = fanout::rename(&self.registry, &from, &to);
        match equivalence::check_scalar("rename", &self.cfg, &results) {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(e),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let from = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        let to = match self.child_path(newparent, newname) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("link", &to);
        let results = fanout::link(&self.registry, &from, &to);
        if let Err(e) = equivalence::check_scalar("link", &self.cfg, &results) {
            return reply.error(e);
        }
        match self.attr_of(0, &to, false) {
            Ok(mut attr) => {
                let new_ino = self.inodes.lookup(&to);
                attr.ino = new_ino;
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("open", &path);
        match self.open_fanout(&path, flags, 0) {
            Ok(fd0) => reply.opened(fd0 as u64, 0),
            Err(e) => reply.error(e),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("create", &path);
        let fd0 = match self.open_fanout(&path, flags | libc::O_CREAT, (mode & !umask) as libc::mode_t) {
            Ok(fd0) => fd0,
            Err(e) => return reply.error(e),
        };
        match self.attr_of(0, &path, false) {
            Ok(mut attr) => {
                let ino = self.inodes.lookup(&path);
                attr.ino = ino;
                reply.created(&TTL, &attr, 0, fd0 as u64, 0);
            }
            Err(e) => {
                if let Some(others) = self.handles.remove(fd0) {
                    crate::sys::close(fd0);
                    for fd in others {
                        crate::sys::close(fd);
                    }
                }
                reply.error(e);
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let fds = match self.handles.lookup(fh as RawFd) {
            Some(mut others) => {
                others.insert(0, fh as RawFd);
                others
            }
            None => {
                warn!("read: unknown handle fh={fh} ino={ino}");
                return reply.error(libc::EBADF);
            }
        };
        let results = fanout::read(&fds, size as usize, offset);
        match equivalence::check_bytes("read", &self.cfg, &results) {
            Ok(buf) => reply.data(&buf),
            Err(e) => reply.error(e),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let fds = match self.handles.lookup(fh as RawFd) {
            Some(mut others) => {
                others.insert(0, fh as RawFd);
                others
            }
            None => {
                warn!("write: unknown handle fh={fh} ino={ino}");
                return reply.error(libc::EBADF);
            }
        };
        let results = fanout::write(&fds, data, offset);
        match equivalence::check_scalar("write", &self.cfg, &results) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(others) = self.handles.remove(fh as RawFd) {
            crate::sys::close(fh as RawFd);
            for fd in others {
                crate::sys::close(fd);
            }
        }
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // Non-goal: replicas are not required to durably persist for the
        // comparison to be meaningful; fsync is a no-op (spec.md §4.6).
        reply.ok();
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        self.log_op("readdir", &path);
        let results = fanout::readdir(&self.registry, &path);

        let errno_only: Vec<Result<(), i32>> = results
            .iter()
            .map(|r| r.as_ref().map(|_| ()).map_err(|e| *e))
            .collect();
        if let Err(e) = equivalence::check_scalar("readdir", &self.cfg, &errno_only) {
            return reply.error(e);
        }

        // The errno check above only guarantees replica 0 succeeded: with
        // `abort_on_difference` disabled, a non-canonical replica can still
        // have failed where replica 0 didn't. Compare only the replicas that
        // actually produced a listing, and fall back to replica 0's own
        // entries when there's nothing left to compare it against.
        let ok_replicas: Vec<Vec<sys::RawDirent>> = results.into_iter().filter_map(Result::ok).collect();
        let entries = if ok_replicas.len() >= 2 {
            equivalence::check_readdir("readdir", &ok_replicas)
        } else {
            ok_replicas[0].iter().map(|e| (e.name.clone(), e.d_type)).collect()
        };

        let dotdot_ino = if path.as_path() == Path::new(".") {
            ino
        } else {
            let parent_path = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            self.inodes.lookup(&parent_path)
        };

        let mut all: Vec<(u64, FileType, OsString)> = Vec::with_capacity(entries.len() + 2);
        all.push((ino, FileType::Directory, OsString::from(".")));
        all.push((dotdot_ino, FileType::Directory, OsString::from("..")));
        for (name, d_type) in entries {
            let child = pathutil::join(&path, &name);
            let child_ino = self.inodes.lookup(&child);
            all.push((child_ino, d_type_to_file_type(d_type), name));
        }

        for (i, (entry_ino, kind, name)) in all.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }
}

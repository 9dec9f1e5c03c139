//! Inode Registry (C8) — ambient bridge between `fuser`'s inode-keyed
//! kernel interface and the path-keyed engine spec.md is written against.
//! Grounded on `examples/xmp.rs`'s `inode_to_physical_path` /
//! `mounted_path_to_inode` maps, simplified to what this engine needs: a
//! relative path (already normalized by C2) per inode, with `fuser`'s usual
//! `lookup`/`forget` refcounting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

pub const ROOT_INO: u64 = 1;

struct Entry {
    path: PathBuf,
    nlookup: u64,
}

#[derive(Default)]
struct Inner {
    by_ino: HashMap<u64, Entry>,
    by_path: HashMap<PathBuf, u64>,
    next_ino: u64,
}

pub struct InodeRegistry {
    inner: Mutex<Inner>,
}

impl InodeRegistry {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(
            ROOT_INO,
            Entry {
                path: PathBuf::from("."),
                nlookup: 1,
            },
        );
        by_path.insert(PathBuf::from("."), ROOT_INO);
        Self {
            inner: Mutex::new(Inner {
                by_ino,
                by_path,
                next_ino: ROOT_INO + 1,
            }),
        }
    }

    pub fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.inner.lock().by_ino.get(&ino).map(|e| e.path.clone())
    }

    /// Resolves `path` to an inode, assigning a fresh one and bumping
    /// `nlookup` by one (as `lookup` does). Reuses an existing inode if the
    /// path already has one.
    pub fn lookup(&self, path: &Path) -> u64 {
        let mut inner = self.inner.lock();
        if let Some(&ino) = inner.by_path.get(path) {
            inner.by_ino.get_mut(&ino).unwrap().nlookup += 1;
            return ino;
        }
        let ino = inner.next_ino;
        inner.next_ino += 1;
        inner.by_ino.insert(
            ino,
            Entry {
                path: path.to_path_buf(),
                nlookup: 1,
            },
        );
        inner.by_path.insert(path.to_path_buf(), ino);
        ino
    }

    /// Drops `nlookup` references from `ino`; removes the entry once it
    /// reaches zero.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        let mut inner = self.inner.lock();
        let remove = match inner.by_ino.get_mut(&ino) {
            Some(entry) => {
                entry.nlookup = entry.nlookup.saturating_sub(nlookup);
                entry.nlookup == 0
            }
            None => false,
        };
        if remove {
            if let Some(entry) = inner.by_ino.remove(&ino) {
                inner.by_path.remove(&entry.path);
            }
        }
    }

    /// Records that `old_path` is now reachable at `new_path` (a successful
    /// rename), updating the registry's path index without disturbing the
    /// inode identity.
    pub fn rename(&self, old_path: &Path, new_path: &Path) {
        let mut inner = self.inner.lock();
        if let Some(ino) = inner.by_path.remove(old_path) {
            if let Some(entry) = inner.by_ino.get_mut(&ino) {
                entry.path = new_path.to_path_buf();
            }
            inner.by_path.insert(new_path.to_path_buf(), ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preassigned() {
        let reg = InodeRegistry::new();
        assert_eq!(reg.path_of(ROOT_INO).unwrap(), PathBuf::from("."));
    }

    #[test]
    fn lookup_assigns_and_reuses() {
        let reg = InodeRegistry::new();
        let ino1 = reg.lookup(Path::new("a/b"));
        let ino2 = reg.lookup(Path::new("a/b"));
        assert_eq!(ino1, ino2);
        assert_ne!(ino1, ROOT_INO);
    }

    #[test]
    fn forget_removes_at_zero_refcount() {
        let reg = InodeRegistry::new();
        let ino = reg.lookup(Path::new("a"));
        reg.lookup(Path::new("a"));
        reg.forget(ino, 1);
        assert!(reg.path_of(ino).is_some());
        reg.forget(ino, 1);
        assert!(reg.path_of(ino).is_none());
    }
}

//! Handle Table (C3).
//!
//! Maps the canonical replica's descriptor (the handle's public identity)
//! to the `N-1` non-canonical descriptors opened for the same logical
//! object. A plain `HashMap` behind a single mutex satisfies the O(1)
//! lookup-by-small-integer contract; the reference implementation's dense
//! array indexed by `fd0 * (MAX_REPLICAS - 1)` is called out in spec.md §9
//! as a representation to avoid, not a requirement to imitate.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct HandleTable {
    inner: Mutex<HashMap<RawFd, Vec<RawFd>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the side-table entry for a freshly opened handle.
    ///
    /// # Panics
    /// Panics (process abort via the caller, per spec.md's "internal
    /// invariant violation" taxon) if `fd0` is already live.
    pub fn install(&self, fd0: RawFd, others: Vec<RawFd>) {
        let mut guard = self.inner.lock();
        if guard.contains_key(&fd0) {
            panic!("handle table: reinstallation of live key fd={fd0}");
        }
        guard.insert(fd0, others);
    }

    pub fn lookup(&self, fd0: RawFd) -> Option<Vec<RawFd>> {
        self.inner.lock().get(&fd0).cloned()
    }

    /// Removes and returns the side-table entry, if any.
    pub fn remove(&self, fd0: RawFd) -> Option<Vec<RawFd>> {
        self.inner.lock().remove(&fd0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_lookup_then_remove() {
        let t = HandleTable::new();
        t.install(10, vec![11, 12]);
        assert_eq!(t.lookup(10), Some(vec![11, 12]));
        assert_eq!(t.remove(10), Some(vec![11, 12]));
        assert_eq!(t.lookup(10), None);
    }

    #[test]
    #[should_panic(expected = "reinstallation of live key")]
    fn double_install_is_fatal() {
        let t = HandleTable::new();
        t.install(10, vec![11]);
        t.install(10, vec![13]);
    }
}

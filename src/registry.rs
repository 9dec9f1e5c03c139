//! Replica Registry (C1).

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::config::MAX_REPLICAS;

/// Holds the fixed, ordered set of replica directory handles chosen at
/// startup. Replica 0 is canonical: its result is what the engine returns
/// upstream. Immutable after construction (§3 invariant: the ordered list
/// of replicas is fixed between startup and teardown).
#[derive(Debug)]
pub struct ReplicaRegistry {
    fds: Vec<RawFd>,
    paths: Vec<PathBuf>,
}

impl ReplicaRegistry {
    /// Opens each of `replica_paths` as a directory. Failure to open any of
    /// them is a fatal startup error (the caller maps this to exit code 1).
    pub fn open(replica_paths: &[PathBuf]) -> Result<Self> {
        if replica_paths.len() < 2 {
            bail!("at least two replicas are required for comparison to be meaningful");
        }
        if replica_paths.len() > MAX_REPLICAS {
            bail!(
                "too many replicas ({}); MAX_REPLICAS is {}",
                replica_paths.len(),
                MAX_REPLICAS
            );
        }
        let mut fds = Vec::with_capacity(replica_paths.len());
        for path in replica_paths {
            let fd = crate::sys::openat(libc::AT_FDCWD, path, libc::O_DIRECTORY | libc::O_RDONLY, 0)
                .map_err(|errno| {
                    anyhow::anyhow!(
                        "could not open replica path {path:?}: {}",
                        std::io::Error::from_raw_os_error(errno)
                    )
                })
                .context("replica open failed")?;
            fds.push(fd);
        }
        Ok(Self {
            fds,
            paths: replica_paths.to_vec(),
        })
    }

    pub fn count(&self) -> usize {
        self.fds.len()
    }

    pub fn fd(&self, i: usize) -> RawFd {
        self.fds[i]
    }

    pub fn path(&self, i: usize) -> &Path {
        &self.paths[i]
    }
}

impl Drop for ReplicaRegistry {
    fn drop(&mut self) {
        for &fd in &self.fds {
            crate::sys::close(fd);
        }
    }
}

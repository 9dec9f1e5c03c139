//! Path Normalizer (C2).
//!
//! FUSE delivers paths with a leading separator. Replica-relative syscalls
//! (the `*at` family) want a fragment relative to the replica's directory fd
//! instead: the sole path `/` becomes `.`, anything else drops its leading
//! `/`. Pure, borrowing, never allocates.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub fn normalize(path: &Path) -> &Path {
    match path.strip_prefix("/") {
        Ok(rel) if rel.as_os_str().is_empty() => Path::new("."),
        Ok(rel) => rel,
        Err(_) => path,
    }
}

/// Appends `name` to a normalized parent path. The root's normalized form is
/// `.`, so joining a direct child of the root must not carry a stray `./`
/// prefix into it.
pub fn join(parent: &Path, name: &OsStr) -> PathBuf {
    if parent == Path::new(".") {
        PathBuf::from(name)
    } else {
        parent.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn root_becomes_dot() {
        assert_eq!(normalize(Path::new("/")), Path::new("."));
    }

    #[test]
    fn nested_path_drops_leading_slash() {
        assert_eq!(normalize(Path::new("/x/y")), Path::new("x/y"));
    }

    #[test]
    fn already_relative_is_unchanged() {
        assert_eq!(normalize(Path::new("x/y")), Path::new("x/y"));
    }

    #[test]
    fn join_under_root_has_no_dot_slash_prefix() {
        assert_eq!(join(Path::new("."), OsStr::new("a")), PathBuf::from("a"));
    }

    #[test]
    fn join_under_nested_parent_appends_normally() {
        assert_eq!(join(Path::new("a/b"), OsStr::new("c")), PathBuf::from("a/b/c"));
    }
}

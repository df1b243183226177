//! Node path validation and manipulation.
//!
//! Paths follow ZooKeeper rules: absolute, `/`-separated, no empty or relative
//! segments, no trailing slash except the root itself.

use crate::error::{KeeperError, KeeperResult};

/// The root path of every tree.
pub const ROOT: &str = "/";

/// Validates a node path, returning it on success.
pub fn validate(path: &str) -> KeeperResult<&str> {
    let reject = |reason: &str| {
        Err(KeeperError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    };

    if path.is_empty() {
        return reject("path is empty");
    }
    if !path.starts_with('/') {
        return reject("path must start with '/'");
    }
    if path.contains('\0') {
        return reject("path contains a NUL byte");
    }
    if path == ROOT {
        return Ok(path);
    }
    if path.ends_with('/') {
        return reject("path must not end with '/'");
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return reject("path contains an empty segment"),
            "." | ".." => return reject("path contains a relative segment"),
            _ => {}
        }
    }
    Ok(path)
}

/// Joins a child name onto a parent path.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Returns the parent of a path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Returns the final path segment (the node's own name).
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Returns `true` if `candidate` is `ancestor` itself or lies beneath it.
pub fn is_self_or_descendant(candidate: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return true;
    }
    candidate == ancestor
        || (candidate.starts_with(ancestor) && candidate.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_well_formed_paths() {
        assert!(validate("/").is_ok());
        assert!(validate("/a").is_ok());
        assert!(validate("/apps/web/config").is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed_paths() {
        for bad in ["", "a", "relative/path", "/a/", "//", "/a//b", "/a/./b", "/a/../b", "/a\0b"] {
            assert!(
                matches!(validate(bad), Err(KeeperError::InvalidPath { .. })),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_join_handles_root() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_parent_walks_to_root() {
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(basename("/a"), "a");
    }

    #[test]
    fn test_is_self_or_descendant() {
        assert!(is_self_or_descendant("/a/b", "/a"));
        assert!(is_self_or_descendant("/a", "/a"));
        assert!(is_self_or_descendant("/anything", "/"));
        assert!(!is_self_or_descendant("/ab", "/a"));
        assert!(!is_self_or_descendant("/b", "/a"));
    }
}

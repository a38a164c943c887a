//! Path-traversal defence (spec.md §4.C), grounded on `share_server.py`'s
//! `_safe_resolve`/`_resolve_relative`.

use std::path::{Path, PathBuf};

/// Resolve `rel` against `base`, rejecting anything that escapes `base`.
///
/// Rejects absolute `rel` paths outright, then canonicalizes the joined path
/// and requires it to equal `base` or live strictly under it — this closes
/// the `/tmp/ws` vs `/tmp/ws_evil` prefix-collision loophole a naive
/// `starts_with` string check would miss.
pub fn safe_resolve(base: &Path, rel: &str) -> Option<PathBuf> {
    if rel.is_empty() {
        return None;
    }
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return None;
    }
    if rel_path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return None;
    }

    let base_resolved = base.canonicalize().ok()?;
    let joined = base_resolved.join(rel_path);
    let resolved = canonicalize_lenient(&joined)?;

    if resolved == base_resolved || resolved.starts_with(&base_resolved) {
        Some(resolved)
    } else {
        None
    }
}

/// Canonicalize `path`, falling back to canonicalizing its parent and
/// re-joining the file name when the leaf itself doesn't exist yet (e.g. an
/// upload destination that hasn't been written).
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(p) = path.canonicalize() {
        return Some(p);
    }
    let parent = path.parent()?;
    let name = path.file_name()?;
    let parent_resolved = parent.canonicalize().ok()?;
    Some(parent_resolved.join(name))
}

/// Find which of `roots` contains `abs`, returning the root and `abs`'s path
/// relative to it. Used when verifying a token against every registered
/// workspace root in turn.
pub fn resolve_relative(roots: &[PathBuf], abs: &Path) -> Option<(PathBuf, String)> {
    let abs_resolved = canonicalize_lenient(abs)?;
    for root in roots {
        let Ok(root_resolved) = root.canonicalize() else {
            continue;
        };
        if let Ok(rel) = abs_resolved.strip_prefix(&root_resolved) {
            return Some((root_resolved, rel.to_string_lossy().replace('\\', "/")));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_nested_file_within_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/report.pdf"), b"x").unwrap();

        let resolved = safe_resolve(dir.path(), "sub/report.pdf").unwrap();
        assert_eq!(resolved, dir.path().join("sub/report.pdf").canonicalize().unwrap());
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let dir = tempfile::tempdir().unwrap();
        assert!(safe_resolve(dir.path(), "../escape.txt").is_none());
        assert!(safe_resolve(dir.path(), "sub/../../escape.txt").is_none());
    }

    #[test]
    fn rejects_absolute_rel_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(safe_resolve(dir.path(), "/etc/passwd").is_none());
    }

    #[test]
    fn rejects_prefix_collision_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("ws");
        let evil = dir.path().join("ws_evil");
        fs::create_dir_all(&base).unwrap();
        fs::create_dir_all(&evil).unwrap();
        fs::write(evil.join("secret.txt"), b"x").unwrap();

        // A symlink inside `base` that points at the sibling directory must
        // not resolve just because the string happens to share a prefix.
        let resolved = safe_resolve(&base, "../ws_evil/secret.txt");
        assert!(resolved.is_none());
    }

    #[test]
    fn resolve_relative_finds_owning_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ws1")).unwrap();
        fs::write(dir.path().join("ws1/file.txt"), b"x").unwrap();

        let roots = vec![dir.path().join("ws1")];
        let abs = dir.path().join("ws1/file.txt");
        let (root, rel) = resolve_relative(&roots, &abs).unwrap();
        assert_eq!(root, dir.path().join("ws1").canonicalize().unwrap());
        assert_eq!(rel, "file.txt");
    }
}

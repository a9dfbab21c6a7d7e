//! Pure path helpers. None of these touch the disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Ancestors of `path`, from the immediate parent up to the filesystem root.
pub fn ancestors(path: &Path) -> Vec<PathBuf> {
    path.ancestors()
        .skip(1)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .collect()
}

/// Whether `child` is a strict descendant of `parent`.
///
/// Compares path components, so `/a/bc` is not under `/a/b`.
pub fn is_parent(parent: &Path, child: &Path) -> bool {
    child != parent && child.starts_with(parent)
}

/// Drop every path that lies under another member of the set.
pub fn unify(paths: &HashSet<PathBuf>) -> HashSet<PathBuf> {
    paths
        .iter()
        .filter(|path| !paths.iter().any(|other| is_parent(other, path)))
        .cloned()
        .collect()
}

/// Like [`unify`] but ordered, for deterministic batch execution.
pub fn unify_sorted(paths: &HashSet<PathBuf>) -> Vec<PathBuf> {
    let mut unified: Vec<PathBuf> = unify(paths).into_iter().collect();
    unified.sort();
    unified
}

/// The path of `path` relative to `root`, escaped for single-line display.
pub fn display_relative(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let shown = if rel.as_os_str().is_empty() {
        ".".to_string()
    } else {
        rel.to_string_lossy().to_string()
    };
    shown.replace('\n', r"\n")
}

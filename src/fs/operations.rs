//! Conflict-checked filesystem mutations.
//!
//! Every verb reports the set of directories whose listing is now stale.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::fs::node::Node;
use crate::fs::paths::{is_parent, unify_sorted};

/// Directories whose cached children must be re-read.
pub type Invalidation = HashSet<PathBuf>;

/// Source → destination pairs for a batch move or copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub moves: Vec<(PathBuf, PathBuf)>,
}

impl Plan {
    /// Reparent every source under `target` (a directory, or a file's parent).
    ///
    /// Refuses the whole batch if any destination exists or is claimed twice,
    /// listing every offending pair.
    pub fn new(sources: &HashSet<PathBuf>, target: &Node) -> Result<Self> {
        let parent = if target.is_dir() {
            target.path.clone()
        } else {
            parent_of(&target.path)
        };

        let mut moves = Vec::new();
        for src in unify_sorted(sources) {
            let name = src.file_name().ok_or_else(|| {
                AppError::InvalidPath(format!("{} has no file name", src.display()))
            })?;
            if parent == src || is_parent(&src, &parent) {
                return Err(AppError::IntoItself(src.clone(), parent));
            }
            let dst = parent.join(name);
            moves.push((src, dst));
        }

        // Two sources sharing a name collide with each other, not only with the disk.
        let mut seen = HashSet::new();
        let conflicts: Vec<(PathBuf, PathBuf)> = moves
            .iter()
            .filter(|(_, dst)| !seen.insert(dst.clone()) || occupied(dst))
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            warn!(count = conflicts.len(), "refusing batch: destinations exist");
            return Err(AppError::Conflict(conflicts));
        }

        Ok(Self { moves })
    }

    /// Source parents and destination parents of every planned item.
    pub fn invalidation(&self) -> Invalidation {
        self.moves
            .iter()
            .flat_map(|(src, dst)| [parent_of(src), parent_of(dst)])
            .collect()
    }

    pub fn sources(&self) -> impl Iterator<Item = &PathBuf> {
        self.moves.iter().map(|(src, _)| src)
    }

    pub fn destinations(&self) -> impl Iterator<Item = &PathBuf> {
        self.moves.iter().map(|(_, dst)| dst)
    }
}

/// Result of a best-effort batch: every item is attempted.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Source paths whose operation succeeded.
    pub completed: Vec<PathBuf>,
    /// Per-item failures, in execution order.
    pub failures: Vec<(PathBuf, AppError)>,
    /// Directories to reload, covering the whole attempted batch.
    pub invalidated: Invalidation,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Split into the invalidation set and the first failure, if any.
    pub fn into_parts(self) -> (Invalidation, Option<AppError>) {
        let first = self.failures.into_iter().next().map(|(_, err)| err);
        (self.invalidated, first)
    }

    fn record(&mut self, src: &Path, result: Result<()>) {
        match result {
            Ok(()) => self.completed.push(src.to_path_buf()),
            Err(e) => {
                warn!(path = %src.display(), error = %e, "batch item failed");
                self.failures.push((src.to_path_buf(), e));
            }
        }
    }
}

/// An entry created by [`create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub path: PathBuf,
    pub invalidated: Invalidation,
}

/// Create an empty file, or a directory when `name` ends with a separator.
///
/// `name` is relative to `parent` and may contain intermediate directories,
/// which are created too and reported for invalidation.
pub fn create(parent: &Path, name: &str) -> Result<Created> {
    let is_dir = name.ends_with('/') || name.ends_with(std::path::MAIN_SEPARATOR);
    let path = join_relative(parent, name)?;
    if occupied(&path) {
        return Err(AppError::Exists(path));
    }

    let mut invalidated = missing_ancestors(&path);
    invalidated.insert(parent.to_path_buf());
    let container = parent_of(&path);
    invalidated.insert(container.clone());

    fs::create_dir_all(&container)?;
    if is_dir {
        fs::create_dir(&path)?;
    } else {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
    }
    info!(path = %path.display(), is_dir, "created");

    Ok(Created { path, invalidated })
}

/// Rename `src` to `dst`, creating missing parents of `dst`.
pub fn rename(src: &Path, dst: &Path) -> Result<Invalidation> {
    if occupied(dst) {
        return Err(AppError::Exists(dst.to_path_buf()));
    }
    if is_parent(src, dst) {
        return Err(AppError::IntoItself(src.to_path_buf(), dst.to_path_buf()));
    }

    let invalidated = rename_invalidation(src, dst);
    fs::create_dir_all(parent_of(dst))?;
    move_path(src, dst)?;
    info!(from = %src.display(), to = %dst.display(), "renamed");
    Ok(invalidated)
}

/// Directories a rename of `src` to `dst` touches: both parents and every
/// ancestor of `dst` not yet on disk. Must be taken before the rename runs.
pub fn rename_invalidation(src: &Path, dst: &Path) -> Invalidation {
    let mut invalidated = missing_ancestors(dst);
    invalidated.insert(parent_of(src));
    invalidated.insert(parent_of(dst));
    invalidated
}

/// Move every planned source to its destination.
pub fn cut(plan: &Plan) -> BatchOutcome {
    run(plan, "moved", move_path)
}

/// Copy every planned source to its destination, recursively.
pub fn copy(plan: &Plan) -> BatchOutcome {
    run(plan, "copied", copy_path)
}

fn run(plan: &Plan, verb: &str, op: fn(&Path, &Path) -> Result<()>) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        invalidated: plan.invalidation(),
        ..Default::default()
    };
    for (src, dst) in &plan.moves {
        let result = op(src, dst);
        if result.is_ok() {
            info!(from = %src.display(), to = %dst.display(), "{}", verb);
        }
        outcome.record(src, result);
    }
    outcome
}

/// Delete every path (unified first), to the trash or permanently.
pub fn remove(paths: &HashSet<PathBuf>, use_trash: bool) -> BatchOutcome {
    let targets = unify_sorted(paths);
    let mut outcome = BatchOutcome {
        invalidated: targets.iter().map(|p| parent_of(p)).collect(),
        ..Default::default()
    };
    for path in &targets {
        let result = if use_trash {
            trash::delete(path).map_err(AppError::from)
        } else {
            delete(path)
        };
        if result.is_ok() {
            info!(path = %path.display(), use_trash, "deleted");
        }
        outcome.record(path, result);
    }
    outcome
}

/// Delete a file or directory. Directories are removed recursively; symlinks
/// are removed without touching their target.
pub fn delete(path: &Path) -> Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Move a file or directory.
///
/// Uses `fs::rename` first (fast, same-device). Falls back to copy+delete
/// if rename fails (cross-device).
fn move_path(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            fs::symlink_metadata(src)?;
            warn!(from = %src.display(), error = %e, "rename failed, copying instead");
            copy_path(src, dst)?;
            delete(src)
        }
    }
}

/// Recursively copy `src` to exactly `dst`. Symlinks are copied as links.
fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(src)?;
    if metadata.is_symlink() {
        copy_link(src, dst)?;
    } else if metadata.is_dir() {
        fs::create_dir(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_path(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_link(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Whether anything (including a dangling symlink) sits at `path`.
fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

/// Ancestors of `path` that do not exist yet.
fn missing_ancestors(path: &Path) -> Invalidation {
    path.ancestors()
        .skip(1)
        .take_while(|p| !p.as_os_str().is_empty() && !occupied(p))
        .map(Path::to_path_buf)
        .collect()
}

/// Resolve user input `name` below `base`. Absolute names, `..` and empty
/// names are rejected; trailing separators are dropped.
pub fn join_relative(base: &Path, name: &str) -> Result<PathBuf> {
    let rel = Path::new(name.trim_end_matches(['/', std::path::MAIN_SEPARATOR]));
    let plain = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if rel.as_os_str().is_empty() || !plain {
        return Err(AppError::InvalidPath(name.to_string()));
    }
    Ok(base.join(rel))
}

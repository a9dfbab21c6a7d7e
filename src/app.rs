//! User commands: resolve the cursor row, mutate the filesystem, advance the
//! tree state and publish the result.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::fs::node::Node;
use crate::fs::operations::{self, BatchOutcome, Plan};
use crate::fs::paths::{display_relative, is_parent, unify_sorted};
use crate::fs::watcher::changed_dirs;
use crate::state::rows;
use crate::state::slot::StateSlot;
use crate::state::{Delta, TreeState};

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Display side of the editor.
pub trait RenderSink {
    /// Replace the whole tree display with `lines`.
    fn render(&mut self, lines: &[String]);
    fn notify(&mut self, level: Level, message: &str);
}

/// Open editor buffers.
pub trait BufferSync {
    /// Close or retarget buffers on exactly these paths.
    fn kill_buffers(&mut self, paths: &HashSet<PathBuf>);
    fn open_file(&mut self, path: &Path);
}

/// Blocking questions to the user.
pub trait Prompt {
    fn confirm(&mut self, question: &str) -> bool;
    /// `None` when the user cancels.
    fn input(&mut self, prompt: &str, default: &str) -> Option<String>;
}

/// Everything the explorer needs from its editor.
pub trait Host: RenderSink + BufferSync + Prompt {}

impl<T: RenderSink + BufferSync + Prompt> Host for T {}

/// Explorer session: settings, the live snapshot and the editor host.
pub struct App<H: Host> {
    settings: Settings,
    slot: StateSlot,
    host: H,
}

impl<H: Host> App<H> {
    /// Create a session rooted at `root`.
    pub fn new(root: &Path, settings: Settings, host: H) -> Result<Self> {
        let state = TreeState::new(root, &settings)?;
        Ok(Self::with_state(state, settings, host))
    }

    pub fn with_state(state: TreeState, settings: Settings, host: H) -> Self {
        Self {
            settings,
            slot: StateSlot::new(state),
            host,
        }
    }

    /// The live snapshot.
    pub fn state(&self) -> Arc<TreeState> {
        self.slot.current()
    }

    pub fn slot(&self) -> &StateSlot {
        &self.slot
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Push the live snapshot to the display.
    pub fn redraw(&mut self) {
        let state = self.state();
        self.host.render(state.rendered());
    }

    fn transition(&mut self, state: &TreeState, delta: Delta) -> Arc<TreeState> {
        let next = state.advance(&self.settings, delta);
        self.host.render(next.rendered());
        self.slot.publish(next);
        self.state()
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.host.notify(Level::Warn, &message);
    }

    // ── Navigation ───────────────────────────────────────────────────────────

    /// Toggle the folder under the cursor, or open the file.
    pub fn primary(&mut self, row: usize) -> Result<Arc<TreeState>> {
        let state = self.state();
        let Some(node) = rows::index(&state, row).cloned() else {
            return Ok(state);
        };
        if node.is_dir() {
            let paths = HashSet::from([node.path.clone()]);
            let index = state.index() ^ &paths;
            Ok(self.transition(&state, Delta::default().index(index).paths(paths)))
        } else {
            self.host.open_file(&node.path);
            Ok(state)
        }
    }

    /// Collapse the folder under the cursor and every folder below it.
    pub fn collapse(&mut self, row: usize) -> Result<Arc<TreeState>> {
        let state = self.state();
        let Some(node) = rows::index(&state, row).cloned() else {
            return Ok(state);
        };
        if !node.is_dir() {
            return Ok(state);
        }
        let root = &state.root().path;
        let index: HashSet<PathBuf> = state
            .index()
            .iter()
            .filter(|p| *p == root || !(**p == node.path || is_parent(&node.path, p)))
            .cloned()
            .collect();
        Ok(self.transition(&state, Delta::default().index(index)))
    }

    /// Re-read everything from disk.
    pub fn refresh(&mut self) -> Result<Arc<TreeState>> {
        let state = self.state();
        let paths = HashSet::from([state.root().path.clone()]);
        Ok(self.transition(&state, Delta::default().paths(paths)))
    }

    pub fn toggle_hidden(&mut self) -> Result<Arc<TreeState>> {
        let state = self.state();
        let show_hidden = !state.show_hidden();
        Ok(self.transition(&state, Delta::default().show_hidden(show_hidden)))
    }

    pub fn toggle_follow(&mut self) -> Result<Arc<TreeState>> {
        let state = self.state();
        let next = state.advance(&self.settings, Delta::default().follow(!state.follow()));
        self.slot.publish(next);
        Ok(self.state())
    }

    /// Reveal `path` when following is on. Returns its row if visible.
    pub fn follow_file(&mut self, path: &Path) -> Result<Option<usize>> {
        let state = self.state();
        if !state.follow() || !is_parent(&state.root().path, path) {
            return Ok(None);
        }
        let missing: HashSet<PathBuf> = self
            .ancestors_inside(&state, path)
            .into_iter()
            .filter(|p| !state.index().contains(p))
            .collect();
        let state = if missing.is_empty() {
            state
        } else {
            let index = state.index() | &missing;
            // A collapsed ancestor may still hold a listing from before the file existed.
            self.transition(&state, Delta::default().index(index).paths(missing))
        };
        Ok(rows::row_of(&state, path))
    }

    // ── Selection ────────────────────────────────────────────────────────────

    /// Toggle every node in `range` in or out of the selection.
    pub fn select(&mut self, range: RangeInclusive<usize>) -> Result<Arc<TreeState>> {
        let state = self.state();
        let picked: HashSet<PathBuf> = rows::indices(&state, range)
            .map(|node| node.path.clone())
            .collect();
        if picked.is_empty() {
            return Ok(state);
        }
        let selection = state.selection() ^ &picked;
        Ok(self.transition(&state, Delta::default().selection(selection)))
    }

    pub fn clear_selection(&mut self) -> Result<Arc<TreeState>> {
        let state = self.state();
        Ok(self.transition(&state, Delta::default().selection(HashSet::new())))
    }

    // ── Filesystem operations ────────────────────────────────────────────────

    /// Prompt for a name and create it beside (or inside) the cursor node.
    pub fn new_entry(&mut self, row: usize) -> Result<Arc<TreeState>> {
        let state = self.state();
        let Some(node) = rows::index(&state, row).cloned() else {
            self.warn(AppError::NoSelection("New").to_string());
            return Ok(state);
        };
        let parent = container_of(&node);
        let Some(name) = self.prompt_name("New (end with / for a folder):", "") else {
            return Ok(state);
        };

        match operations::create(&parent, &name) {
            Ok(created) => {
                let reveal = self.ancestors_inside(&state, &created.path);
                let index = state.index() | &reveal;
                let delta = Delta::default().index(index).paths(created.invalidated);
                Ok(self.transition(&state, delta))
            }
            Err(e @ (AppError::Exists(_) | AppError::InvalidPath(_))) => {
                self.warn(e.to_string());
                Ok(state)
            }
            Err(e) => {
                self.transition(&state, Delta::default().paths(HashSet::from([parent])));
                Err(e)
            }
        }
    }

    /// Prompt for a new root-relative path for the cursor node and move it there.
    pub fn rename(&mut self, row: usize) -> Result<Arc<TreeState>> {
        let state = self.state();
        let Some(node) = rows::index(&state, row).cloned() else {
            self.warn(AppError::NoSelection("Rename").to_string());
            return Ok(state);
        };
        let root = state.root().path.clone();
        if node.path == root {
            self.warn("cannot rename the root".to_string());
            return Ok(state);
        }

        let current = display_relative(&node.path, &root);
        let Some(answer) = self.prompt_name("Rename to:", &current) else {
            return Ok(state);
        };
        let target = match operations::join_relative(&root, &answer) {
            Ok(target) => target,
            Err(e) => {
                self.warn(e.to_string());
                return Ok(state);
            }
        };
        if target == node.path {
            return Ok(state);
        }

        let old = HashSet::from([node.path.clone()]);
        let invalidated = operations::rename_invalidation(&node.path, &target);
        let result = match operations::rename(&node.path, &target) {
            Err(e @ (AppError::Exists(_) | AppError::IntoItself(_, _))) => {
                self.warn(e.to_string());
                return Ok(state);
            }
            other => other.map(|_| ()),
        };

        // Parents of the target may exist even when the move itself failed.
        let reveal: HashSet<PathBuf> = invalidated
            .iter()
            .filter(|p| **p == root || is_parent(&root, p))
            .cloned()
            .collect();
        let index = &without_subtrees(state.index(), &old) | &reveal;
        let selection = without_subtrees(state.selection(), &old);
        let delta = Delta::default()
            .index(index)
            .paths(invalidated)
            .selection(selection);
        let next = self.transition(&state, delta);
        self.host.kill_buffers(&old);
        result.map(|()| next)
    }

    /// Delete the selection, or the cursor node when nothing is selected.
    pub fn delete(&mut self, row: usize) -> Result<Arc<TreeState>> {
        let state = self.state();
        let root = state.root().path.clone();
        let mut targets: HashSet<PathBuf> = if state.selection().is_empty() {
            rows::index(&state, row)
                .map(|node| node.path.clone())
                .into_iter()
                .collect()
        } else {
            state.selection().clone()
        };
        if targets.remove(&root) {
            self.warn("cannot delete the root".to_string());
        }
        if targets.is_empty() {
            self.warn(AppError::NoSelection("Delete").to_string());
            return Ok(state);
        }

        let unified = unify_sorted(&targets);
        if self.settings.confirm_delete {
            let listing = unified
                .iter()
                .map(|p| display_relative(p, &root))
                .collect::<Vec<_>>()
                .join("\n");
            if !self.host.confirm(&format!("Delete?\n{}", listing)) {
                info!(count = unified.len(), "delete canceled");
                return Ok(state);
            }
        }

        let removed: HashSet<PathBuf> = unified.into_iter().collect();
        let outcome = operations::remove(&removed, self.settings.use_trash);
        let index = without_subtrees(state.index(), &removed);
        let (next, failure) = self.finish_batch(&state, outcome, index);
        self.host.kill_buffers(&removed);
        match failure {
            Some(e) => Err(e),
            None => Ok(next),
        }
    }

    /// Move the selection next to (or into) the cursor node.
    pub fn cut(&mut self, row: usize) -> Result<Arc<TreeState>> {
        self.transfer(row, Transfer::Cut)
    }

    /// Copy the selection next to (or into) the cursor node.
    pub fn copy(&mut self, row: usize) -> Result<Arc<TreeState>> {
        self.transfer(row, Transfer::Copy)
    }

    fn transfer(&mut self, row: usize, kind: Transfer) -> Result<Arc<TreeState>> {
        let state = self.state();
        let node = rows::index(&state, row).cloned();
        let (Some(node), false) = (node, state.selection().is_empty()) else {
            self.warn(AppError::NoSelection(kind.label()).to_string());
            return Ok(state);
        };

        let plan = match Plan::new(state.selection(), &node) {
            Ok(plan) => plan,
            Err(e) => {
                self.warn(format!("{}: {}", kind.label(), e));
                return Ok(state);
            }
        };

        let outcome = match kind {
            Transfer::Cut => operations::cut(&plan),
            Transfer::Copy => operations::copy(&plan),
        };
        let root = state.root().path.clone();
        let reveal: HashSet<PathBuf> = outcome
            .invalidated
            .iter()
            .filter(|p| **p == root || is_parent(&root, p))
            .cloned()
            .collect();
        let moved: HashSet<PathBuf> = plan.sources().cloned().collect();
        let index = match kind {
            Transfer::Cut => &without_subtrees(state.index(), &moved) | &reveal,
            Transfer::Copy => state.index() | &reveal,
        };

        let (next, failure) = self.finish_batch(&state, outcome, index);
        if kind == Transfer::Cut {
            self.host.kill_buffers(&moved);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(next),
        }
    }

    /// Apply a batch's invalidation (even a partial one), clear the selection
    /// and hand back the first failure.
    fn finish_batch(
        &mut self,
        state: &TreeState,
        outcome: BatchOutcome,
        index: HashSet<PathBuf>,
    ) -> (Arc<TreeState>, Option<AppError>) {
        let (invalidated, failure) = outcome.into_parts();
        let delta = Delta::default()
            .index(index)
            .paths(invalidated)
            .selection(HashSet::new());
        let next = self.transition(state, delta);
        if let Some(e) = &failure {
            self.host.notify(Level::Error, &e.to_string());
        }
        (next, failure)
    }

    /// Reload the directories touched by an outside change.
    pub fn external_change(&mut self, paths: &[PathBuf]) -> Result<Arc<TreeState>> {
        let state = self.state();
        let dirs = changed_dirs(paths);
        Ok(self.transition(&state, Delta::default().paths(dirs)))
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn prompt_name(&mut self, prompt: &str, default: &str) -> Option<String> {
        self.host
            .input(prompt, default)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Ancestors of `path` from the root down, root included.
    fn ancestors_inside(&self, state: &TreeState, path: &Path) -> HashSet<PathBuf> {
        let root = &state.root().path;
        path.ancestors()
            .skip(1)
            .take_while(|p| *p == root.as_path() || is_parent(root, p))
            .map(Path::to_path_buf)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Cut,
    Copy,
}

impl Transfer {
    fn label(self) -> &'static str {
        match self {
            Transfer::Cut => "Cut",
            Transfer::Copy => "Copy",
        }
    }
}

/// The directory new entries go into: the node itself or its parent.
fn container_of(node: &Node) -> PathBuf {
    if node.is_dir() {
        node.path.clone()
    } else {
        node.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| node.path.clone())
    }
}

/// `set` without any member equal to or below a path in `gone`.
fn without_subtrees(set: &HashSet<PathBuf>, gone: &HashSet<PathBuf>) -> HashSet<PathBuf> {
    set.iter()
        .filter(|p| !gone.iter().any(|g| *p == g || is_parent(g, p)))
        .cloned()
        .collect()
}

//! Immutable tree snapshots and the transition between them.

pub mod rows;
pub mod slot;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::fs::node::{self, Mode, Node};
use crate::fs::paths::is_parent;

/// One visible row: a node and its depth below the root.
#[derive(Debug, Clone)]
pub struct FlatRow {
    pub node: Arc<Node>,
    pub depth: usize,
}

/// Rows and display lines derived from `(root, index, selection)`.
#[derive(Debug)]
struct Derived {
    flat: Vec<FlatRow>,
    rendered: Vec<String>,
    by_path: HashMap<PathBuf, usize>,
}

impl Derived {
    fn build(
        root: &Arc<Node>,
        index: &HashSet<PathBuf>,
        selection: &HashSet<PathBuf>,
        dirs_first: bool,
    ) -> Self {
        let mut flat = Vec::new();
        flatten_node(root, 0, index, dirs_first, &mut flat);
        let rendered = flat
            .iter()
            .enumerate()
            .map(|(row, item)| render_line(item, row == 0, index, selection))
            .collect();
        let by_path = flat
            .iter()
            .enumerate()
            .map(|(row, item)| (item.node.path.clone(), row))
            .collect();
        Self {
            flat,
            rendered,
            by_path,
        }
    }
}

fn flatten_node(
    node: &Arc<Node>,
    depth: usize,
    index: &HashSet<PathBuf>,
    dirs_first: bool,
    items: &mut Vec<FlatRow>,
) {
    items.push(FlatRow {
        node: node.clone(),
        depth,
    });
    if node.is_dir() && index.contains(&node.path) {
        for child in node.sorted_children(dirs_first) {
            flatten_node(child, depth + 1, index, dirs_first, items);
        }
    }
}

fn render_line(
    item: &FlatRow,
    is_root: bool,
    index: &HashSet<PathBuf>,
    selection: &HashSet<PathBuf>,
) -> String {
    let node = &item.node;
    let mark = if selection.contains(&node.path) { '+' } else { ' ' };
    let glyph = if node.is_dir() {
        if index.contains(&node.path) {
            '▾'
        } else {
            '▸'
        }
    } else if node.mode.contains(Mode::ORPHAN_LINK) {
        '!'
    } else if node.mode.contains(Mode::LINK) {
        '@'
    } else if node.mode.contains(Mode::EXECUTABLE) {
        '*'
    } else {
        '-'
    };
    let name = if is_root {
        node.path.to_string_lossy().to_string()
    } else {
        node.name.clone()
    };
    format!(
        "{}{}{} {}",
        "  ".repeat(item.depth),
        mark,
        glyph,
        name.replace('\n', r"\n")
    )
}

/// Changes to apply in [`advance`]. Omitted fields keep the previous value.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub index: Option<HashSet<PathBuf>>,
    pub paths: Option<HashSet<PathBuf>>,
    pub selection: Option<HashSet<PathBuf>>,
    pub show_hidden: Option<bool>,
    pub follow: Option<bool>,
}

impl Delta {
    pub fn index(mut self, index: HashSet<PathBuf>) -> Self {
        self.index = Some(index);
        self
    }

    /// Directories to re-read from disk.
    pub fn paths(mut self, paths: HashSet<PathBuf>) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn selection(mut self, selection: HashSet<PathBuf>) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn show_hidden(mut self, show_hidden: bool) -> Self {
        self.show_hidden = Some(show_hidden);
        self
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = Some(follow);
        self
    }
}

/// One immutable snapshot of the explorer.
///
/// The rendered lines and row index are computed together with the snapshot
/// and never change afterwards.
#[derive(Debug, Clone)]
pub struct TreeState {
    version: u64,
    root: Arc<Node>,
    index: HashSet<PathBuf>,
    selection: HashSet<PathBuf>,
    show_hidden: bool,
    follow: bool,
    derived: Arc<Derived>,
}

impl TreeState {
    /// Create the first snapshot rooted at `path`, with the root expanded.
    pub fn new(path: &Path, settings: &Settings) -> Result<Self> {
        let root_path = path
            .canonicalize()
            .map_err(|_| AppError::InvalidPath(format!("{} does not exist", path.display())))?;
        Self::build(
            root_path.clone(),
            HashSet::from([root_path]),
            HashSet::new(),
            settings.show_hidden,
            settings.follow,
            settings,
        )
    }

    /// Recreate a snapshot from a saved [`Memo`]. Entries outside the root are dropped.
    pub fn restore(path: &Path, memo: &Memo, settings: &Settings) -> Result<Self> {
        let fresh = Self::new(path, settings)?;
        let root = fresh.root.path.clone();
        let inside = |p: &&PathBuf| **p == root || is_parent(&root, p);
        let index: HashSet<PathBuf> = memo.index.iter().filter(inside).cloned().collect();
        let selection = memo.selection.iter().filter(inside).cloned().collect();
        Self::build(root, index, selection, memo.show_hidden, memo.follow, settings)
    }

    fn build(
        root_path: PathBuf,
        index: HashSet<PathBuf>,
        selection: HashSet<PathBuf>,
        show_hidden: bool,
        follow: bool,
        settings: &Settings,
    ) -> Result<Self> {
        let root = node::load(&root_path, &index, show_hidden, settings)?;
        if !root.is_dir() {
            return Err(AppError::InvalidPath(format!(
                "{} is not a directory",
                root_path.display()
            )));
        }
        let derived = Arc::new(Derived::build(&root, &index, &selection, settings.dirs_first));
        Ok(Self {
            version: 0,
            root,
            index,
            selection,
            show_hidden,
            follow,
            derived,
        })
    }

    /// Produce the next snapshot. `self` is left untouched.
    pub fn advance(&self, settings: &Settings, delta: Delta) -> TreeState {
        let index = delta.index.unwrap_or_else(|| self.index.clone());
        let selection = delta.selection.unwrap_or_else(|| self.selection.clone());
        let show_hidden = delta.show_hidden.unwrap_or(self.show_hidden);
        let follow = delta.follow.unwrap_or(self.follow);

        let mut invalidated = delta.paths.unwrap_or_default();
        if show_hidden != self.show_hidden {
            // Listings are filtered at load time, so every visible one is stale.
            invalidated.insert(self.root.path.clone());
        }

        let root = node::refresh(&self.root, &invalidated, &index, show_hidden, settings);
        let derived = Arc::new(Derived::build(&root, &index, &selection, settings.dirs_first));
        debug!(
            version = self.version + 1,
            rows = derived.flat.len(),
            invalidated = invalidated.len(),
            "advanced tree state"
        );

        TreeState {
            version: self.version + 1,
            root,
            index,
            selection,
            show_hidden,
            follow,
            derived,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// Expanded directory paths.
    pub fn index(&self) -> &HashSet<PathBuf> {
        &self.index
    }

    pub fn selection(&self) -> &HashSet<PathBuf> {
        &self.selection
    }

    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    /// Display lines, one per visible node.
    pub fn rendered(&self) -> &[String] {
        &self.derived.rendered
    }

    /// Visible nodes, congruent with [`TreeState::rendered`].
    pub fn flat(&self) -> &[FlatRow] {
        &self.derived.flat
    }

    pub(crate) fn row_by_path(&self, path: &Path) -> Option<usize> {
        self.derived.by_path.get(path).copied()
    }

    /// The plain data needed to rebuild this view in a later session.
    pub fn memo(&self) -> Memo {
        Memo {
            index: self.index.iter().cloned().collect(),
            selection: self.selection.iter().cloned().collect(),
            show_hidden: self.show_hidden,
            follow: self.follow,
        }
    }
}

/// Free-function form of [`TreeState::advance`].
pub fn advance(state: &TreeState, settings: &Settings, delta: Delta) -> TreeState {
    state.advance(settings, delta)
}

/// Serializable view state for cross-session persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub index: BTreeSet<PathBuf>,
    pub selection: BTreeSet<PathBuf>,
    pub show_hidden: bool,
    pub follow: bool,
}

impl Memo {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::node::Children;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn setup_test_dir() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir(root.join("alpha")).unwrap();
        fs::create_dir(root.join("beta")).unwrap();
        File::create(root.join("file_a.txt")).unwrap();
        File::create(root.join("file_b.rs")).unwrap();
        File::create(root.join(".hidden")).unwrap();
        fs::create_dir(root.join("alpha").join("nested")).unwrap();
        File::create(root.join("alpha").join("inner.txt")).unwrap();
        File::create(root.join("beta").join("b.txt")).unwrap();
        (dir, root)
    }

    fn names(state: &TreeState) -> Vec<String> {
        state.flat().iter().map(|r| r.node.name.clone()).collect()
    }

    #[test]
    fn new_state_expands_root_dirs_first() {
        let (_dir, root) = setup_test_dir();
        let state = TreeState::new(&root, &Settings::default()).unwrap();
        assert_eq!(state.version(), 0);
        assert!(state.index().contains(&root));
        let root_name = root.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(
            names(&state),
            vec![root_name.as_str(), "alpha", "beta", "file_a.txt", "file_b.rs"]
        );
    }

    #[test]
    fn new_state_rejects_missing_root() {
        let err = TreeState::new(Path::new("/definitely/not/here"), &Settings::default())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPath(_)));
    }

    #[test]
    fn rendered_lines_mark_kind_depth_and_selection() {
        let (_dir, root) = setup_test_dir();
        let settings = Settings::default();
        let state = TreeState::new(&root, &settings).unwrap();
        let mut index = state.index().clone();
        index.insert(root.join("alpha"));
        let state = state.advance(
            &settings,
            Delta::default()
                .index(index)
                .selection(HashSet::from([root.join("file_a.txt")])),
        );

        let rendered = state.rendered();
        assert_eq!(rendered[0], format!(" ▾ {}", root.display()));
        assert_eq!(rendered[1], "   ▾ alpha");
        assert_eq!(rendered[2], "     ▸ nested");
        assert_eq!(rendered[3], "     - inner.txt");
        assert_eq!(rendered[4], "   ▸ beta");
        assert_eq!(rendered[5], "  +- file_a.txt");
    }

    #[test]
    fn rendered_and_flat_are_congruent() {
        let (_dir, root) = setup_test_dir();
        let settings = Settings::default();
        let state = TreeState::new(&root, &settings).unwrap();
        let index = HashSet::from([root.clone(), root.join("alpha"), root.join("beta")]);
        let state = state.advance(&settings, Delta::default().index(index));
        assert_eq!(state.rendered().len(), state.flat().len());
        for (line, row) in state.rendered().iter().zip(state.flat()) {
            if row.depth > 0 {
                assert!(line.ends_with(&row.node.name));
            }
        }
    }

    #[test]
    fn advance_leaves_previous_snapshot_untouched() {
        let (_dir, root) = setup_test_dir();
        let settings = Settings::default();
        let state = TreeState::new(&root, &settings).unwrap();
        let saved = state.clone();

        File::create(root.join("late.txt")).unwrap();
        let next = state.advance(
            &settings,
            Delta::default()
                .paths(HashSet::from([root.clone()]))
                .index(HashSet::from([root.clone(), root.join("beta")]))
                .selection(HashSet::from([root.join("alpha")]))
                .show_hidden(true)
                .follow(false),
        );

        assert_eq!(next.version(), 1);
        assert!(Arc::ptr_eq(state.root(), saved.root()));
        assert_eq!(state.index(), saved.index());
        assert_eq!(state.selection(), saved.selection());
        assert_eq!(state.show_hidden(), saved.show_hidden());
        assert_eq!(state.follow(), saved.follow());
        assert_eq!(state.rendered(), saved.rendered());
        assert!(!state.rendered().iter().any(|l| l.ends_with("late.txt")));
        assert!(next.rendered().iter().any(|l| l.ends_with("late.txt")));
    }

    #[test]
    fn omitted_delta_fields_keep_previous_values() {
        let (_dir, root) = setup_test_dir();
        let settings = Settings::default();
        let state = TreeState::new(&root, &settings).unwrap().advance(
            &settings,
            Delta::default().selection(HashSet::from([root.join("beta")])),
        );
        let next = state.advance(&settings, Delta::default());
        assert_eq!(next.selection(), state.selection());
        assert_eq!(next.index(), state.index());
        assert!(Arc::ptr_eq(next.root(), state.root()));
        assert_eq!(next.rendered(), state.rendered());
    }

    #[test]
    fn structural_sharing_across_invalidation() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let a = root.join("a");
        fs::create_dir_all(a.join("b")).unwrap();
        fs::create_dir_all(a.join("c")).unwrap();
        File::create(a.join("c").join("kept.txt")).unwrap();

        let settings = Settings::default();
        let index = HashSet::from([root.clone(), a.clone(), a.join("b"), a.join("c")]);
        let state = TreeState::new(&root, &settings)
            .unwrap()
            .advance(&settings, Delta::default().index(index));

        File::create(a.join("b").join("new.txt")).unwrap();
        let next = state.advance(&settings, Delta::default().paths(HashSet::from([a.join("b")])));

        let before = state.root().find(&a.join("c")).unwrap();
        let after = next.root().find(&a.join("c")).unwrap();
        assert!(Arc::ptr_eq(before, after));
        assert!(next.root().find(&a.join("b").join("new.txt")).is_some());
    }

    #[test]
    fn toggling_hidden_changes_only_line_count() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        File::create(root.join(".dotted")).unwrap();
        File::create(root.join("plain")).unwrap();

        let settings = Settings::default();
        let state = TreeState::new(&root, &settings).unwrap();
        // Root line plus the visible entries.
        assert_eq!(state.rendered().len() - 1, 1);

        let next = state.advance(&settings, Delta::default().show_hidden(true));
        assert_eq!(next.rendered().len() - 1, 2);
        assert_eq!(next.index(), state.index());
        assert_eq!(next.selection(), state.selection());

        let back = next.advance(&settings, Delta::default().show_hidden(false));
        assert_eq!(back.rendered().len() - 1, 1);
    }

    #[test]
    fn collapsing_keeps_cache_but_hides_rows() {
        let (_dir, root) = setup_test_dir();
        let settings = Settings::default();
        let alpha = root.join("alpha");
        let state = TreeState::new(&root, &settings).unwrap().advance(
            &settings,
            Delta::default().index(HashSet::from([root.clone(), alpha.clone()])),
        );
        let expanded_rows = state.rendered().len();

        let collapsed = state.advance(&settings, Delta::default().index(HashSet::from([root.clone()])));
        assert_eq!(collapsed.rendered().len(), expanded_rows - 2);
        let alpha_node = collapsed.root().find(&alpha).unwrap();
        assert!(matches!(alpha_node.children, Children::Loaded(_)));
    }

    #[test]
    fn vanished_directory_renders_empty() {
        let (_dir, root) = setup_test_dir();
        let settings = Settings::default();
        let alpha = root.join("alpha");
        let state = TreeState::new(&root, &settings).unwrap().advance(
            &settings,
            Delta::default().index(HashSet::from([root.clone(), alpha.clone()])),
        );

        fs::remove_dir_all(&alpha).unwrap();
        let next = state.advance(&settings, Delta::default().paths(HashSet::from([alpha.clone()])));
        let row = next.flat().iter().position(|r| r.node.path == alpha).unwrap();
        // Nothing listed beneath alpha: next row is back at depth 1.
        assert_eq!(next.flat()[row + 1].depth, 1);
    }

    #[test]
    fn memo_round_trips_through_json() {
        let (_dir, root) = setup_test_dir();
        let settings = Settings::default();
        let state = TreeState::new(&root, &settings).unwrap().advance(
            &settings,
            Delta::default()
                .index(HashSet::from([root.clone(), root.join("beta")]))
                .selection(HashSet::from([root.join("file_a.txt")])),
        );

        let json = state.memo().to_json().unwrap();
        let memo = Memo::from_json(&json).unwrap();
        assert_eq!(memo, state.memo());

        let restored = TreeState::restore(&root, &memo, &settings).unwrap();
        assert_eq!(restored.rendered(), state.rendered());
    }

    #[test]
    fn restore_drops_paths_outside_root() {
        let (_dir, root) = setup_test_dir();
        let memo = Memo {
            index: BTreeSet::from([root.clone(), PathBuf::from("/elsewhere")]),
            selection: BTreeSet::from([PathBuf::from("/elsewhere/file")]),
            show_hidden: false,
            follow: true,
        };
        let restored = TreeState::restore(&root, &memo, &Settings::default()).unwrap();
        assert_eq!(restored.index(), &HashSet::from([root]));
        assert!(restored.selection().is_empty());
    }

    #[test]
    fn invalid_memo_json_is_an_error() {
        assert!(matches!(Memo::from_json("{"), Err(AppError::Memo(_))));
    }
}

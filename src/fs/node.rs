use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Settings;

/// Kind flags of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode(u8);

impl Mode {
    pub const FILE: Mode = Mode(1);
    pub const FOLDER: Mode = Mode(1 << 1);
    pub const LINK: Mode = Mode(1 << 2);
    /// A symlink whose target does not resolve.
    pub const ORPHAN_LINK: Mode = Mode(1 << 3);
    pub const EXECUTABLE: Mode = Mode(1 << 4);

    pub const fn empty() -> Self {
        Mode(0)
    }

    pub const fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Mode) {
        self.0 |= other.0;
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

/// Load state of a directory's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Children {
    /// Never listed (or dropped after an invalidation while collapsed).
    NotLoaded,
    /// Listed; keyed and ordered by entry name.
    Loaded(BTreeMap<String, Arc<Node>>),
    /// Listing failed: the directory vanished or is unreadable.
    Failed,
}

/// A node in the filesystem tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub path: PathBuf,
    pub name: String,
    pub mode: Mode,
    pub children: Children,
}

impl Node {
    /// Stat a path into an unloaded node. Symlinks are never followed as folders.
    pub fn stat(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let mut mode = Mode::empty();
        if metadata.is_symlink() {
            mode.insert(Mode::LINK);
            if fs::metadata(path).is_err() {
                mode.insert(Mode::ORPHAN_LINK);
            }
        } else if metadata.is_dir() {
            mode.insert(Mode::FOLDER);
        } else {
            mode.insert(Mode::FILE);
            if is_executable(&metadata) {
                mode.insert(Mode::EXECUTABLE);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            mode,
            children: Children::NotLoaded,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.mode.contains(Mode::FOLDER)
    }

    /// The loaded children ordered for display: case-insensitive name, then
    /// exact name, optionally directories first.
    pub fn sorted_children(&self, dirs_first: bool) -> Vec<&Arc<Node>> {
        let mut children: Vec<&Arc<Node>> = match &self.children {
            Children::Loaded(map) => map.values().collect(),
            _ => Vec::new(),
        };
        children.sort_by(|a, b| {
            let mut cmp = std::cmp::Ordering::Equal;
            if dirs_first {
                cmp = b.is_dir().cmp(&a.is_dir());
            }
            cmp.then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.name.cmp(&b.name))
        });
        children
    }

    /// Find a loaded descendant (or self) by path.
    pub fn find(self: &Arc<Self>, target: &Path) -> Option<&Arc<Node>> {
        let rel = target.strip_prefix(&self.path).ok()?;
        let mut node = self;
        for component in rel.components() {
            let name = component.as_os_str().to_string_lossy();
            node = match &node.children {
                Children::Loaded(map) => map.get(&*name)?,
                _ => return None,
            };
        }
        Some(node)
    }

    fn with_children(&self, children: Children) -> Self {
        Self {
            path: self.path.clone(),
            name: self.name.clone(),
            mode: self.mode,
            children,
        }
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Build the subtree rooted at `path`, descending into directories in `index`.
///
/// The root itself is always listed.
pub fn load(
    path: &Path,
    index: &HashSet<PathBuf>,
    show_hidden: bool,
    settings: &Settings,
) -> std::io::Result<Arc<Node>> {
    let node = Arc::new(Node::stat(path)?);
    let invalidated = HashSet::from([path.to_path_buf()]);
    Ok(refresh(&node, &invalidated, index, show_hidden, settings))
}

/// Rebuild `prev_root`. Every expanded directory at or below a path in
/// `invalidated` is re-listed, as is every expanded directory never listed
/// before. Untouched subtrees are shared with `prev_root` by reference.
pub fn refresh(
    prev_root: &Arc<Node>,
    invalidated: &HashSet<PathBuf>,
    index: &HashSet<PathBuf>,
    show_hidden: bool,
    settings: &Settings,
) -> Arc<Node> {
    let mut builder = Builder {
        root: &prev_root.path,
        invalidated,
        index,
        show_hidden,
        settings,
        listed: 0,
    };
    let root = builder.rebuild(prev_root, false);
    debug!(
        root = %root.path.display(),
        listed = builder.listed,
        shared = Arc::ptr_eq(&root, prev_root),
        "tree refreshed"
    );
    root
}

struct Builder<'a> {
    root: &'a Path,
    invalidated: &'a HashSet<PathBuf>,
    index: &'a HashSet<PathBuf>,
    show_hidden: bool,
    settings: &'a Settings,
    listed: usize,
}

impl Builder<'_> {
    fn rebuild(&mut self, prev: &Arc<Node>, stale_above: bool) -> Arc<Node> {
        if !prev.is_dir() {
            return prev.clone();
        }

        let stale = stale_above || self.invalidated.contains(&prev.path);
        let expanded = prev.path == self.root || self.index.contains(&prev.path);

        if !expanded {
            // Collapsed directories are re-listed lazily on the next expansion.
            if stale && !matches!(prev.children, Children::NotLoaded) {
                return Arc::new(prev.with_children(Children::NotLoaded));
            }
            return prev.clone();
        }

        match &prev.children {
            Children::Loaded(map) if !stale => {
                let mut changed = false;
                let mut next = BTreeMap::new();
                for (name, child) in map {
                    let rebuilt = self.rebuild(child, false);
                    changed |= !Arc::ptr_eq(&rebuilt, child);
                    next.insert(name.clone(), rebuilt);
                }
                if changed {
                    Arc::new(prev.with_children(Children::Loaded(next)))
                } else {
                    prev.clone()
                }
            }
            Children::Failed if !stale => prev.clone(),
            Children::Loaded(map) => {
                let children = self.list(&prev.path, Some(map));
                Arc::new(prev.with_children(children))
            }
            _ => {
                let children = self.list(&prev.path, None);
                Arc::new(prev.with_children(children))
            }
        }
    }

    /// List one directory, reusing previous child subtrees whose kind did not change.
    fn list(&mut self, dir: &Path, previous: Option<&BTreeMap<String, Arc<Node>>>) -> Children {
        self.listed += 1;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "directory listing failed");
                return Children::Failed;
            }
        };

        let mut children = BTreeMap::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.show_hidden && self.settings.is_hidden(&name) {
                continue;
            }
            // Entries that vanish between listing and stat are skipped.
            let Ok(fresh) = Node::stat(&entry.path()) else {
                continue;
            };
            let base = match previous.and_then(|map| map.get(&name)) {
                Some(old) if old.mode == fresh.mode => old.clone(),
                _ => Arc::new(fresh),
            };
            let child = self.rebuild(&base, true);
            children.insert(name, child);
        }
        debug!(dir = %dir.display(), entries = children.len(), "listed directory");
        Children::Loaded(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        fs::create_dir(dir.path().join("beta")).unwrap();
        File::create(dir.path().join("file_a.txt")).unwrap();
        File::create(dir.path().join("File_B.rs")).unwrap();
        File::create(dir.path().join(".hidden")).unwrap();
        fs::create_dir(dir.path().join("alpha").join("nested")).unwrap();
        File::create(dir.path().join("alpha").join("inner.txt")).unwrap();
        File::create(dir.path().join("beta").join("b.txt")).unwrap();
        dir
    }

    fn names(node: &Node, dirs_first: bool) -> Vec<String> {
        node.sorted_children(dirs_first)
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    fn child_map(node: &Node) -> &BTreeMap<String, Arc<Node>> {
        match &node.children {
            Children::Loaded(map) => map,
            other => panic!("expected loaded children, got {:?}", other),
        }
    }

    #[test]
    fn mode_flags_compose() {
        let mode = Mode::FILE | Mode::EXECUTABLE;
        assert!(mode.contains(Mode::FILE));
        assert!(mode.contains(Mode::EXECUTABLE));
        assert!(!mode.contains(Mode::FOLDER));
        assert!(Mode::empty().contains(Mode::empty()));
    }

    #[test]
    fn stat_classifies_file_and_folder() {
        let dir = setup_test_dir();
        let file = Node::stat(&dir.path().join("file_a.txt")).unwrap();
        assert!(file.mode.contains(Mode::FILE));
        assert_eq!(file.name, "file_a.txt");
        assert_eq!(file.children, Children::NotLoaded);

        let folder = Node::stat(&dir.path().join("alpha")).unwrap();
        assert!(folder.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn stat_symlink_is_never_folder() {
        let dir = setup_test_dir();
        let link = dir.path().join("link_to_alpha");
        std::os::unix::fs::symlink(dir.path().join("alpha"), &link).unwrap();
        let node = Node::stat(&link).unwrap();
        assert!(node.mode.contains(Mode::LINK));
        assert!(!node.is_dir());
        assert!(!node.mode.contains(Mode::ORPHAN_LINK));

        let orphan = dir.path().join("orphan");
        std::os::unix::fs::symlink(dir.path().join("missing"), &orphan).unwrap();
        let node = Node::stat(&orphan).unwrap();
        assert!(node.mode.contains(Mode::LINK | Mode::ORPHAN_LINK));
    }

    #[cfg(unix)]
    #[test]
    fn stat_detects_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = setup_test_dir();
        let script = dir.path().join("run.sh");
        File::create(&script).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(Node::stat(&script).unwrap().mode.contains(Mode::EXECUTABLE));
    }

    #[test]
    fn load_filters_hidden_entries() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let index = HashSet::new();

        let root = load(dir.path(), &index, false, &settings).unwrap();
        assert!(!child_map(&root).contains_key(".hidden"));
        assert_eq!(child_map(&root).len(), 4);

        let root = load(dir.path(), &index, true, &settings).unwrap();
        assert!(child_map(&root).contains_key(".hidden"));
    }

    #[test]
    fn load_descends_only_into_index() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let index = HashSet::from([dir.path().join("alpha")]);
        let root = load(dir.path(), &index, false, &settings).unwrap();

        let alpha = &child_map(&root)["alpha"];
        assert_eq!(child_map(alpha).len(), 2);
        let beta = &child_map(&root)["beta"];
        assert_eq!(beta.children, Children::NotLoaded);
    }

    #[test]
    fn sorted_children_dirs_first() {
        let dir = setup_test_dir();
        let root = load(dir.path(), &HashSet::new(), false, &Settings::default()).unwrap();
        assert_eq!(
            names(&root, true),
            vec!["alpha", "beta", "file_a.txt", "File_B.rs"]
        );
        assert_eq!(
            names(&root, false),
            vec!["alpha", "beta", "file_a.txt", "File_B.rs"]
        );
    }

    #[test]
    fn sorted_children_mixed_without_dirs_first() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("a.txt")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        File::create(dir.path().join("c.txt")).unwrap();
        let root = load(dir.path(), &HashSet::new(), false, &Settings::default()).unwrap();
        assert_eq!(names(&root, false), vec!["a.txt", "b", "c.txt"]);
        assert_eq!(names(&root, true), vec!["b", "a.txt", "c.txt"]);
    }

    #[test]
    fn load_missing_directory_degrades_to_failed() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let index = HashSet::from([dir.path().join("alpha")]);
        let root = load(dir.path(), &index, false, &settings).unwrap();

        fs::remove_dir_all(dir.path().join("alpha")).unwrap();
        // Force a re-list of alpha only: the parent still lists it from cache.
        let invalidated = HashSet::from([dir.path().join("alpha")]);
        let next = refresh(&root, &invalidated, &index, false, &settings);
        assert_eq!(child_map(&next)["alpha"].children, Children::Failed);
    }

    #[test]
    fn refresh_shares_untouched_subtrees() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let index = HashSet::from([dir.path().join("alpha"), dir.path().join("beta")]);
        let root = load(dir.path(), &index, false, &settings).unwrap();

        File::create(dir.path().join("alpha").join("new.txt")).unwrap();
        let invalidated = HashSet::from([dir.path().join("alpha")]);
        let next = refresh(&root, &invalidated, &index, false, &settings);

        assert!(!Arc::ptr_eq(&root, &next));
        assert!(Arc::ptr_eq(
            &child_map(&root)["beta"],
            &child_map(&next)["beta"]
        ));
        assert!(child_map(&child_map(&next)["alpha"]).contains_key("new.txt"));
        assert!(!child_map(&child_map(&root)["alpha"]).contains_key("new.txt"));
    }

    #[test]
    fn refresh_invalidates_whole_subtree() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let alpha = dir.path().join("alpha");
        let nested = alpha.join("nested");
        let index = HashSet::from([alpha.clone(), nested.clone()]);
        let root = load(dir.path(), &index, false, &settings).unwrap();

        File::create(nested.join("deep.txt")).unwrap();
        let invalidated = HashSet::from([dir.path().to_path_buf()]);
        let next = refresh(&root, &invalidated, &index, false, &settings);
        assert!(next.find(&nested.join("deep.txt")).is_some());
        assert!(root.find(&nested.join("deep.txt")).is_none());
    }

    #[test]
    fn refresh_without_changes_returns_same_root() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let index = HashSet::from([dir.path().join("alpha")]);
        let root = load(dir.path(), &index, false, &settings).unwrap();
        let next = refresh(&root, &HashSet::new(), &index, false, &settings);
        assert!(Arc::ptr_eq(&root, &next));
    }

    #[test]
    fn refresh_loads_newly_expanded_directory() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let root = load(dir.path(), &HashSet::new(), false, &settings).unwrap();

        let index = HashSet::from([dir.path().join("beta")]);
        let next = refresh(&root, &HashSet::new(), &index, false, &settings);
        assert!(child_map(&child_map(&next)["beta"]).contains_key("b.txt"));
        assert!(Arc::ptr_eq(
            &child_map(&root)["alpha"],
            &child_map(&next)["alpha"]
        ));
    }

    #[test]
    fn refresh_drops_cache_of_collapsed_invalidated_dir() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let alpha = dir.path().join("alpha");
        let root = load(dir.path(), &HashSet::from([alpha.clone()]), false, &settings).unwrap();

        let next = refresh(
            &root,
            &HashSet::from([alpha.clone()]),
            &HashSet::new(),
            false,
            &settings,
        );
        assert_eq!(child_map(&next)["alpha"].children, Children::NotLoaded);
    }

    #[test]
    fn find_walks_loaded_children() {
        let dir = setup_test_dir();
        let settings = Settings::default();
        let index = HashSet::from([dir.path().join("alpha")]);
        let root = load(dir.path(), &index, false, &settings).unwrap();

        let inner = root.find(&dir.path().join("alpha").join("inner.txt")).unwrap();
        assert_eq!(inner.name, "inner.txt");
        assert!(Arc::ptr_eq(root.find(dir.path()).unwrap(), &root));
        assert!(root.find(&dir.path().join("beta").join("b.txt")).is_none());
        assert!(root.find(Path::new("/elsewhere")).is_none());
    }
}

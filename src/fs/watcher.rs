use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::Event;

/// Default patterns to ignore when watching the filesystem.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "target",
];

/// Default flood threshold (events per debounce window).
pub const DEFAULT_FLOOD_THRESHOLD: usize = 100;

/// Filesystem watcher that monitors a root directory and sends change events.
pub struct FsWatcher {
    /// Handle to the debouncer (dropped to stop watching).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl FsWatcher {
    /// Create a new FsWatcher that watches `root` recursively.
    ///
    /// Events are debounced by `debounce_duration` and sent via `event_tx`.
    /// Paths matching any of `ignore_patterns` are silently dropped.
    /// If more than `flood_threshold` events arrive in a single debounce window,
    /// they are collapsed into a single full-refresh event (root path only).
    pub fn new(
        root: &Path,
        debounce_duration: Duration,
        ignore_patterns: Vec<String>,
        flood_threshold: usize,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<Self> {
        let root_path = root.to_path_buf();

        let mut debouncer = new_debouncer(
            debounce_duration,
            move |result: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| {
                match result {
                    Ok(events) => {
                        let paths: Vec<PathBuf> = events
                            .iter()
                            .filter(|e| e.kind == DebouncedEventKind::Any)
                            .map(|e| e.path.clone())
                            .filter(|p| !should_ignore(p, &ignore_patterns))
                            .collect();

                        if paths.is_empty() {
                            return;
                        }

                        let final_paths = collapse_flood(paths, flood_threshold, &root_path);
                        debug!(count = final_paths.len(), "filesystem change");
                        let _ = event_tx.send(Event::FsChange(final_paths));
                    }
                    Err(e) => {
                        warn!(error = %e, "watcher error");
                    }
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

/// Check if a path should be ignored based on ignore patterns.
///
/// A path is ignored if any of its components match any ignore pattern exactly.
pub fn should_ignore(path: &Path, patterns: &[String]) -> bool {
    path.components().any(|component| match component {
        std::path::Component::Normal(name) => {
            let name = name.to_string_lossy();
            patterns.iter().any(|pattern| name == pattern.as_str())
        }
        _ => false,
    })
}

/// Replace an oversized batch of changes by a single root refresh.
pub fn collapse_flood(paths: Vec<PathBuf>, threshold: usize, root: &Path) -> Vec<PathBuf> {
    if paths.len() > threshold {
        warn!(count = paths.len(), "change flood, refreshing root");
        vec![root.to_path_buf()]
    } else {
        paths
    }
}

/// Directories whose listings a batch of changed paths makes stale: each
/// changed path and its parent.
pub fn changed_dirs(paths: &[PathBuf]) -> HashSet<PathBuf> {
    paths
        .iter()
        .flat_map(|path| {
            let parent = path.parent().map(Path::to_path_buf);
            std::iter::once(path.clone()).chain(parent)
        })
        .collect()
}

//! Explorer configuration: TOML file loading, CLI overrides, and defaults.
//!
//! Resolution order (first found wins, values merge/override):
//! 1. CLI flags (`--config`, `--show-hidden`, etc.)
//! 2. `$FMTREE_CONFIG` environment variable (path to config file)
//! 3. Project-local `.fmtree.toml` in the current working directory
//! 4. Global `~/.config/fmtree/config.toml`
//! 5. Built-in defaults

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

// ── Section configs ──────────────────────────────────────────────────────────

/// General explorer settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeneralConfig {
    /// Show hidden entries by default.
    pub show_hidden: Option<bool>,
    /// Track the active editor file by default.
    pub follow: Option<bool>,
    /// Move deleted entries to the trash instead of unlinking them.
    pub use_trash: Option<bool>,
    /// Confirm before delete operations.
    pub confirm_delete: Option<bool>,
}

/// Tree panel settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TreeConfig {
    /// Directories always listed first.
    pub dirs_first: Option<bool>,
    /// Regex matched against entry names; matches are hidden.
    pub hidden_pattern: Option<String>,
}

/// Filesystem watcher settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WatcherConfig {
    /// Enable filesystem watcher for auto-refresh.
    pub enabled: Option<bool>,
    /// Debounce interval in milliseconds.
    pub debounce_ms: Option<u64>,
}

// ── Top-level config ─────────────────────────────────────────────────────────

/// Top-level configuration.
///
/// All fields are optional so that partial configs from different sources
/// can be merged together (CLI overrides file, file overrides defaults).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub tree: TreeConfig,
    pub watcher: WatcherConfig,
}

// ── Default constants ────────────────────────────────────────────────────────

/// Default hidden-name pattern: dotfiles.
pub const DEFAULT_HIDDEN_PATTERN: &str = r"^\.";
/// Default debounce interval in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

// ── Config file locator ──────────────────────────────────────────────────────

/// Return the list of candidate config file paths in priority order.
///
/// Does NOT include the CLI `--config` path; that one is layered on top in `load`.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = std::env::var("FMTREE_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".fmtree.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("fmtree").join("config.toml"));
    }

    paths
}

/// Try to read and parse a TOML config file. Returns `None` if the file
/// doesn't exist or can't be parsed (with a warning logged).
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => {
            debug!(path = %path.display(), "loaded config file");
            Some(cfg)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config file");
            None
        }
    }
}

// ── Merge logic ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Merge `other` on top of `self`; `other`'s `Some` values win.
    pub fn merge(self, other: &AppConfig) -> AppConfig {
        AppConfig {
            general: GeneralConfig {
                show_hidden: other.general.show_hidden.or(self.general.show_hidden),
                follow: other.general.follow.or(self.general.follow),
                use_trash: other.general.use_trash.or(self.general.use_trash),
                confirm_delete: other.general.confirm_delete.or(self.general.confirm_delete),
            },
            tree: TreeConfig {
                dirs_first: other.tree.dirs_first.or(self.tree.dirs_first),
                hidden_pattern: other
                    .tree
                    .hidden_pattern
                    .clone()
                    .or(self.tree.hidden_pattern),
            },
            watcher: WatcherConfig {
                enabled: other.watcher.enabled.or(self.watcher.enabled),
                debounce_ms: other.watcher.debounce_ms.or(self.watcher.debounce_ms),
            },
        }
    }

    /// Load the final merged configuration.
    ///
    /// `cli_config_path` is an explicit config file path from `--config`.
    /// `cli_overrides` are partial overrides derived from CLI flags.
    pub fn load(cli_config_path: Option<&Path>, cli_overrides: Option<&AppConfig>) -> AppConfig {
        let mut config = AppConfig::default();

        // Walk in reverse so that highest-priority (env var) overwrites lower.
        for path in candidate_paths().iter().rev() {
            if let Some(file_cfg) = load_file(path) {
                config = config.merge(&file_cfg);
            }
        }

        if let Some(cli_path) = cli_config_path {
            if let Some(file_cfg) = load_file(cli_path) {
                config = config.merge(&file_cfg);
            }
        }

        if let Some(overrides) = cli_overrides {
            config = config.merge(overrides);
        }

        config
    }

    // ── Convenience getters with built-in defaults ──────────────────────────

    pub fn show_hidden(&self) -> bool {
        self.general.show_hidden.unwrap_or(false)
    }

    pub fn follow(&self) -> bool {
        self.general.follow.unwrap_or(true)
    }

    pub fn use_trash(&self) -> bool {
        self.general.use_trash.unwrap_or(false)
    }

    pub fn confirm_delete(&self) -> bool {
        self.general.confirm_delete.unwrap_or(true)
    }

    pub fn dirs_first(&self) -> bool {
        self.tree.dirs_first.unwrap_or(true)
    }

    pub fn hidden_pattern(&self) -> &str {
        self.tree
            .hidden_pattern
            .as_deref()
            .unwrap_or(DEFAULT_HIDDEN_PATTERN)
    }

    pub fn watcher_enabled(&self) -> bool {
        self.watcher.enabled.unwrap_or(true)
    }

    pub fn debounce_ms(&self) -> u64 {
        self.watcher.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)
    }
}

// ── Resolved settings ────────────────────────────────────────────────────────

/// Immutable, resolved settings consumed read-only by the tree core.
#[derive(Debug, Clone)]
pub struct Settings {
    pub show_hidden: bool,
    pub follow: bool,
    pub dirs_first: bool,
    pub use_trash: bool,
    pub confirm_delete: bool,
    hidden: Regex,
}

impl Settings {
    /// Resolve a merged [`AppConfig`], compiling the hidden-name matcher.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let pattern = config.hidden_pattern();
        let hidden = Regex::new(pattern)
            .map_err(|e| AppError::Config(format!("hidden_pattern {:?}: {}", pattern, e)))?;
        Ok(Self {
            show_hidden: config.show_hidden(),
            follow: config.follow(),
            dirs_first: config.dirs_first(),
            use_trash: config.use_trash(),
            confirm_delete: config.confirm_delete(),
            hidden,
        })
    }

    /// Whether an entry name is considered hidden.
    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden.is_match(name)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_hidden: false,
            follow: true,
            dirs_first: true,
            use_trash: false,
            confirm_delete: true,
            hidden: Regex::new(DEFAULT_HIDDEN_PATTERN).expect("default pattern is valid"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

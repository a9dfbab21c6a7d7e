use std::path::PathBuf;

use thiserror::Error;

/// Application-wide result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// I/O errors from filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more destinations already exist; nothing was touched.
    #[error("path(s) already exist: {}", format_pairs(.0))]
    Conflict(Vec<(PathBuf, PathBuf)>),

    /// The target of a create or rename already exists.
    #[error("already exists: {}", .0.display())]
    Exists(PathBuf),

    /// An operation that needs a target was invoked with nothing to act on.
    #[error("{0}: nothing selected")]
    NoSelection(&'static str),

    /// A move or copy whose destination lies inside its own source.
    #[error("cannot move {} into itself ({})", .0.display(), .1.display())]
    IntoItself(PathBuf, PathBuf),

    /// Invalid path provided by the user.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// Saved session state could not be (de)serialized.
    #[error("Session memo error: {0}")]
    Memo(#[from] serde_json::Error),

    /// Moving an entry to the trash failed.
    #[error("Trash error: {0}")]
    Trash(#[from] trash::Error),

    /// Filesystem watcher could not be set up.
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

fn format_pairs(pairs: &[(PathBuf, PathBuf)]) -> String {
    pairs
        .iter()
        .map(|(src, dst)| format!("{} -> {}", src.display(), dst.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

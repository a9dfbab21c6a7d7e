//! Lazily-expanded file tree model and filesystem mutation engine for an
//! editor file-explorer panel.

pub mod app;
pub mod config;
pub mod error;
pub mod event;
pub mod fs;
pub mod state;

pub mod node;
pub mod operations;
pub mod paths;
pub mod watcher;

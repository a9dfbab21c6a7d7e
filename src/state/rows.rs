//! Cursor row ↔ node lookups over a snapshot's flat index.

use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;

use crate::fs::node::Node;
use crate::state::TreeState;

/// The node displayed at zero-based `row`, if any.
pub fn index(state: &TreeState, row: usize) -> Option<&Arc<Node>> {
    state.flat().get(row).map(|item| &item.node)
}

/// The row displaying `path`, if it is visible.
pub fn row_of(state: &TreeState, path: &Path) -> Option<usize> {
    state.row_by_path(path)
}

/// Every node within `rows`; rows past the end are skipped.
pub fn indices(
    state: &TreeState,
    rows: RangeInclusive<usize>,
) -> impl Iterator<Item = &Arc<Node>> + '_ {
    rows.filter_map(move |row| index(state, row))
}

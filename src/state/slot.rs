use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::state::TreeState;

/// The single live snapshot. One writer publishes; readers hold `Arc`s or
/// subscribe for changes.
#[derive(Debug)]
pub struct StateSlot {
    tx: watch::Sender<Arc<TreeState>>,
}

impl StateSlot {
    pub fn new(initial: TreeState) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// The latest published snapshot.
    pub fn current(&self) -> Arc<TreeState> {
        self.tx.borrow().clone()
    }

    /// Replace the live snapshot. Snapshots older than the current one are
    /// dropped; returns whether `state` was published.
    pub fn publish(&self, state: TreeState) -> bool {
        let version = state.version();
        let state = Arc::new(state);
        let published = self.tx.send_if_modified(|current| {
            if version > current.version() {
                *current = state;
                true
            } else {
                false
            }
        });
        if published {
            debug!(version, "published snapshot");
        } else {
            warn!(version, "ignored stale snapshot");
        }
        published
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<TreeState>> {
        self.tx.subscribe()
    }
}

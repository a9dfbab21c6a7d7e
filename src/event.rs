use std::path::PathBuf;

use tokio::sync::mpsc;

/// Events driving a long-running explorer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Filesystem change detected by watcher.
    FsChange(Vec<PathBuf>),
    /// The user asked to stop (Ctrl-C).
    Interrupt,
}

/// Async event hub: forwards Ctrl-C and watcher events through one channel.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
    tx: mpsc::UnboundedSender<Event>,
}

impl EventHandler {
    /// Create a new EventHandler and start listening for Ctrl-C.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_tx = tx.clone();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = event_tx.send(Event::Interrupt);
            }
        });

        Self { rx, tx }
    }

    /// Get a sender clone for the watcher to send change events.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    /// Receive the next event (waits until available).
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

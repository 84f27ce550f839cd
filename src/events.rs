use serde::Serialize;
use tokio::sync::broadcast;

/// Progress notifications published while a batch runs.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DownloadStarted { id: String, url: String },
    DownloadFinished { id: String, filename: String, size: u64 },
    DownloadFailed { url: String, error: String },
    /// Every download of the batch has completed; resizing may begin.
    PhaseBarrier { staged: usize, failed: usize },
    ResizeStarted { filename: String },
    ResizeFinished { filename: String, variants: usize },
    ResizeFailed { filename: String, error: String },
}

pub type EventSender = broadcast::Sender<Event>;

pub fn channel(capacity: usize) -> (EventSender, broadcast::Receiver<Event>) {
    broadcast::channel(capacity)
}

/// Publishes an event; having no subscriber is not an error.
pub fn publish(tx: &EventSender, event: Event) {
    let _ = tx.send(event);
}

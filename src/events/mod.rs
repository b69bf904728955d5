use crate::notify::Notification;
use crate::uploader::progress::ProgressSource;
use crate::uploader::task::UploadState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing;

/// Events broadcast to the view layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    UploadQueued {
        task_id: String,
        file_name: String,
        file_size: u64,
    },
    UploadStateChanged {
        task_id: String,
        state: UploadState,
    },
    UploadProgress {
        task_id: String,
        progress: f64,
        speed: f64,
        eta_seconds: Option<f64>,
        source: ProgressSource,
    },
    UploadCompleted {
        task_id: String,
        result: serde_json::Value,
    },
    UploadFailed {
        task_id: String,
        error: String,
    },
    UploadRemoved {
        task_id: String,
    },
    Notification(Notification),
}

/// Fan-out event bus between the core and its views
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster
    ///
    /// # Arguments
    /// * `capacity` - The capacity of the broadcast channel (default: 100)
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream`; lagged items surface as errors
    pub fn stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Broadcast an event to all subscribers
    ///
    /// # Returns
    /// The number of receivers that received the event
    pub fn broadcast(&self, event: Event) -> usize {
        match self.sender.send(event) {
            Ok(count) => {
                tracing::trace!(target: "events", subscribers = count, "Broadcast event");
                count
            }
            Err(e) => {
                tracing::trace!(target: "events", event = ?e.0, "No active subscribers for event");
                0
            }
        }
    }

    pub fn upload_queued(&self, task_id: String, file_name: String, file_size: u64) {
        self.broadcast(Event::UploadQueued {
            task_id,
            file_name,
            file_size,
        });
    }

    pub fn upload_state_changed(&self, task_id: String, state: UploadState) {
        self.broadcast(Event::UploadStateChanged { task_id, state });
    }

    pub fn upload_completed(&self, task_id: String, result: serde_json::Value) {
        self.broadcast(Event::UploadCompleted { task_id, result });
    }

    pub fn upload_failed(&self, task_id: String, error: String) {
        self.broadcast(Event::UploadFailed { task_id, error });
    }

    pub fn upload_removed(&self, task_id: String) {
        self.broadcast(Event::UploadRemoved { task_id });
    }

    pub fn notification(&self, notification: Notification) {
        self.broadcast(Event::Notification(notification));
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

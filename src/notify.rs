//! Transient user notifications (toasts)

use crate::events::EventBroadcaster;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Error,
    Warning,
    Info,
}

/// A toast as shown by the view layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            level,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn upload_success(file_name: &str) -> Self {
        Self::new(
            NotificationLevel::Success,
            "Upload complete",
            format!("File \"{}\" was uploaded", file_name),
        )
    }

    pub fn upload_error(file_name: &str, error: Option<&str>) -> Self {
        Self::new(
            NotificationLevel::Error,
            "Upload failed",
            describe(error, || format!("File \"{}\" could not be uploaded", file_name)),
        )
    }

    pub fn delete_success(count: usize) -> Self {
        let description = if count == 1 {
            "File deleted".to_string()
        } else {
            format!("Deleted {} files", count)
        };
        Self::new(NotificationLevel::Success, "Delete complete", description)
    }

    pub fn delete_error(target: &str, error: Option<&str>) -> Self {
        Self::new(
            NotificationLevel::Error,
            "Delete failed",
            describe(error, || format!("Could not delete \"{}\"", target)),
        )
    }

    pub fn download_error(target: &str, error: Option<&str>) -> Self {
        Self::new(
            NotificationLevel::Error,
            "Download failed",
            describe(error, || format!("Could not download \"{}\"", target)),
        )
    }

    pub fn rename_error(target: &str, error: Option<&str>) -> Self {
        Self::new(
            NotificationLevel::Error,
            "Rename failed",
            describe(error, || format!("Could not rename \"{}\"", target)),
        )
    }

    pub fn update_error(target: &str, error: Option<&str>) -> Self {
        Self::new(
            NotificationLevel::Error,
            "Update failed",
            describe(error, || format!("Could not update \"{}\"", target)),
        )
    }

    pub fn network_error(operation: Option<&str>) -> Self {
        let description = match operation {
            Some(op) => format!("{} failed, check your network connection", op),
            None => "Network connection lost, try again later".to_string(),
        };
        Self::new(NotificationLevel::Error, "Network error", description)
    }

    /// Summary shown once a batch of uploads has settled; `None` when
    /// nothing ran
    pub fn batch_summary(succeeded: usize, failed: usize) -> Option<Self> {
        match (succeeded, failed) {
            (0, 0) => None,
            (ok, 0) => Some(Self::new(
                NotificationLevel::Success,
                "Uploads complete",
                format!("Uploaded {} file(s)", ok),
            )),
            (0, bad) => Some(Self::new(
                NotificationLevel::Error,
                "Uploads failed",
                format!("All {} file(s) failed to upload", bad),
            )),
            (ok, bad) => Some(Self::new(
                NotificationLevel::Warning,
                "Uploads partially complete",
                format!("Uploaded {} file(s), {} failed", ok, bad),
            )),
        }
    }
}

fn describe(error: Option<&str>, fallback: impl FnOnce() -> String) -> String {
    match error {
        Some(e) if !e.is_empty() => e.to_string(),
        _ => fallback(),
    }
}

/// Sink for notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Publishes notifications on the event bus
#[derive(Clone)]
pub struct EventNotifier {
    events: EventBroadcaster,
}

impl EventNotifier {
    pub fn new(events: EventBroadcaster) -> Self {
        Self { events }
    }
}

impl Notifier for EventNotifier {
    fn notify(&self, notification: Notification) {
        tracing::debug!(target: "events", title = %notification.title, "Notification");
        self.events.notification(notification);
    }
}

pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn notify(&self, _notification: Notification) {}
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}

/// Keeps every notification for later inspection
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    seen: std::sync::Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub(crate) fn seen(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

pub mod config;
pub mod events;
pub mod logging;
pub mod notify;
pub mod optimistic;
pub mod session;
pub mod uploader;

// Re-export commonly used types
pub use config::{AppConfig, UploaderConfig};
pub use events::{Event, EventBroadcaster};
pub use logging::{LogConfig, LogGuard};
pub use notify::{Notification, NotificationLevel, Notifier};
pub use optimistic::{OptimisticAction, OptimisticUpdateManager};
pub use session::Session;
pub use uploader::{UploadManager, UploadTaskCoordinator, UploadTaskView};

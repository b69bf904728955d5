//! Upload pipeline
//!
//! One [`UploadTaskCoordinator`] per file registers a server-side task,
//! listens to the server's progress stream, moves the bytes with a
//! [`TransferStrategy`] and merges both progress estimates through a
//! [`ProgressArbiter`]. [`UploadManager`] holds the queue.

pub mod channel;
pub mod coordinator;
pub mod error;
pub mod manager;
pub mod progress;
pub mod task;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::ServerProgressChannel;
pub use coordinator::UploadTaskCoordinator;
pub use error::{UploadError, UploadResult};
pub use manager::{BatchSummary, UploadManager};
pub use progress::{
    FnProgress, NoOpProgress, ProgressArbiter, ProgressCallback, ProgressSample, ProgressSampler,
    ProgressSnapshot, ProgressSource, ProgressUpdate,
};
pub use task::{UploadFile, UploadSource, UploadState, UploadTask, UploadTaskView};
pub use transfer::{TransferMode, TransferStrategy};

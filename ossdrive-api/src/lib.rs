//! # OSS Drive API Client
//!
//! A Rust client for the object-storage file manager backend.
//!
//! ## Features
//!
//! - Upload task registration and server-pushed progress (Server-Sent Events)
//! - Streamed and whole-body object transfer
//! - File listing and deletion
//! - Envelope-aware error handling
//!
//! ## Example
//!
//! ```no_run
//! use ossdrive_api::api::UploadsApi;
//! use ossdrive_api::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::new("http://localhost:8080/api/v1"))?;
//!     client.set_token("secret").await;
//!
//!     let task = client.init_upload_task(1_000_000).await?;
//!     let mut progress = client.subscribe_upload_progress(&task.id).await?;
//!     while let Some(event) = progress.next_event().await? {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod models;
pub mod sse;

pub use client::{Client, ClientConfig};
pub use error::{ApiError, ApiResult};
pub use sse::{ProgressStreamEvent, ProgressSubscription};

//! Upload task record and its read-only projection

use crate::uploader::error::UploadError;
use crate::uploader::progress::{ProgressSnapshot, ProgressSource};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Buffer size for streaming reads (64KB)
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Lifecycle of one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Ready,
    Initializing,
    Uploading,
    Done,
    Error,
}

/// Where the file's bytes come from
#[derive(Debug, Clone)]
pub enum UploadSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// Immutable payload reference
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub size: u64,
    pub source: UploadSource,
}

impl UploadFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: UploadSource::Memory(data),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        Ok(Self {
            name,
            size: metadata.len(),
            source: UploadSource::Path(path.to_path_buf()),
        })
    }

    /// Sequential chunks of the content
    pub async fn open_stream(&self) -> io::Result<BoxStream<'static, io::Result<Bytes>>> {
        match &self.source {
            UploadSource::Memory(data) => {
                let chunks: Vec<io::Result<Bytes>> = (0..data.len())
                    .step_by(STREAM_BUFFER_SIZE)
                    .map(|start| {
                        let end = (start + STREAM_BUFFER_SIZE).min(data.len());
                        Ok(data.slice(start..end))
                    })
                    .collect();
                Ok(stream::iter(chunks).boxed())
            }
            UploadSource::Path(path) => {
                let file = File::open(path).await?;
                Ok(ReaderStream::with_capacity(file, STREAM_BUFFER_SIZE).boxed())
            }
        }
    }

    /// The whole content as one body
    pub async fn read_all(&self) -> io::Result<Bytes> {
        match &self.source {
            UploadSource::Memory(data) => Ok(data.clone()),
            UploadSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

/// Replace characters unsafe in object names, strip leading dots and cap
/// the length at 255 characters
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    replaced.trim_start_matches('.').chars().take(255).collect()
}

/// Coordinator-owned upload record
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// Client-side id, stable for the task's lifetime
    pub id: String,
    pub file: UploadFile,
    /// Assigned by registration; fresh on every attempt
    pub server_task_id: Option<String>,
    pub state: UploadState,
    pub frontend_progress: Option<f64>,
    pub backend_progress: Option<f64>,
    pub progress: ProgressSnapshot,
    /// Present only in `UploadState::Error`
    pub error: Option<UploadError>,
    pub result: Option<serde_json::Value>,
}

impl UploadTask {
    pub fn new(file: UploadFile) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file,
            server_task_id: None,
            state: UploadState::Ready,
            frontend_progress: None,
            backend_progress: None,
            progress: ProgressSnapshot::default(),
            error: None,
            result: None,
        }
    }

    pub fn view(&self) -> UploadTaskView {
        UploadTaskView {
            id: self.id.clone(),
            file_name: self.file.name.clone(),
            file_size: self.file.size,
            state: self.state,
            progress: self.progress.progress,
            uploaded_bytes: self.progress.uploaded_bytes,
            speed: self.progress.speed,
            eta_seconds: self.progress.eta_seconds,
            progress_source: self.progress.source,
            indeterminate: self.progress.indeterminate,
            frontend_progress: self.frontend_progress,
            backend_progress: self.backend_progress,
            server_task_id: self.server_task_id.clone(),
            error: self.error.as_ref().map(|e| e.to_string()),
            result: self.result.clone(),
        }
    }
}

/// Read-only projection handed to the view layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTaskView {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub state: UploadState,
    pub progress: f64,
    pub uploaded_bytes: u64,
    pub speed: f64,
    pub eta_seconds: Option<f64>,
    pub progress_source: ProgressSource,
    pub indeterminate: bool,
    pub frontend_progress: Option<f64>,
    pub backend_progress: Option<f64>,
    pub server_task_id: Option<String>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

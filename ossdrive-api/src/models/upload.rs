use serde::{Deserialize, Serialize};

/// Body of `POST /uploads/init`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitUploadRequest {
    /// Total byte length of the file about to be transferred
    pub total: u64,
}

/// Server-side upload task handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTaskInfo {
    pub id: String,
}

/// Payload of a `progress` event on the upload progress stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub uploaded: u64,
    pub total: u64,
}

/// Where an object is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDestination {
    pub region_code: String,
    pub bucket_name: String,
}

impl UploadDestination {
    pub fn new(region_code: impl Into<String>, bucket_name: impl Into<String>) -> Self {
        Self {
            region_code: region_code.into(),
            bucket_name: bucket_name.into(),
        }
    }
}

/// Everything the backend needs to correlate a transfer with its task
#[derive(Debug, Clone)]
pub struct ObjectUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub destination: UploadDestination,
    /// Server task id, forwarded as `Upload-Task-ID`
    pub task_id: Option<String>,
}

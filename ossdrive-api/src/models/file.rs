use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored object descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OssFile {
    pub id: i64,
    pub file_name: String,
    pub original_filename: String,
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub storage_type: String,
    #[serde(default)]
    pub object_key: String,
    #[serde(default)]
    pub config_id: i64,
    #[serde(default)]
    pub config_name: String,
    #[serde(default)]
    pub md5: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Paginated list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

/// Query parameters for `GET /oss/files`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFileParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDownloadResponse {
    pub url: String,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

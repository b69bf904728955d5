use crate::client::Client;
use crate::error::ApiResult;
use crate::models::file::*;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;

/// Object listing and CRUD API methods
#[async_trait]
pub trait FilesApi {
    /// List stored objects
    async fn list_files(&self, params: &ListFileParams) -> ApiResult<PageResponse<OssFile>>;

    /// Simple, non-tracked upload
    async fn upload_file(&self, file_name: &str, data: Bytes) -> ApiResult<OssFile>;

    /// Delete one object
    async fn delete_file(&self, id: i64) -> ApiResult<()>;

    /// Delete several objects; the first failure wins
    async fn delete_files(&self, ids: &[i64]) -> ApiResult<()>;

    /// Get a signed download URL
    async fn get_download_url(&self, id: i64) -> ApiResult<FileDownloadResponse>;
}

#[async_trait]
impl FilesApi for Client {
    async fn list_files(&self, params: &ListFileParams) -> ApiResult<PageResponse<OssFile>> {
        let mut query_params = vec![];

        if let Some(page) = params.page {
            query_params.push(format!("page={}", page));
        }
        if let Some(page_size) = params.page_size {
            query_params.push(format!("page_size={}", page_size));
        }
        if let Some(keyword) = &params.keyword {
            query_params.push(format!("keyword={}", urlencoding::encode(keyword)));
        }

        let query = if query_params.is_empty() {
            String::new()
        } else {
            format!("?{}", query_params.join("&"))
        };

        self.get(&format!("/oss/files{}", query)).await
    }

    async fn upload_file(&self, file_name: &str, data: Bytes) -> ApiResult<OssFile> {
        let mut builder = self
            .http_client
            .post(self.build_url("/oss/files"))
            .header("Content-Type", "application/octet-stream")
            .header("X-File-Name", urlencoding::encode(file_name).into_owned())
            .body(data);
        if let Some(bearer) = self.bearer().await {
            builder = builder.header("Authorization", bearer);
        }

        let response = builder.send().await?;
        Self::unwrap_envelope(response).await
    }

    async fn delete_file(&self, id: i64) -> ApiResult<()> {
        self.delete(&format!("/oss/files/{}", id)).await
    }

    async fn delete_files(&self, ids: &[i64]) -> ApiResult<()> {
        try_join_all(ids.iter().map(|id| self.delete_file(*id))).await?;
        Ok(())
    }

    async fn get_download_url(&self, id: i64) -> ApiResult<FileDownloadResponse> {
        self.get(&format!("/oss/files/{}/download", id)).await
    }
}

use crate::client::Client;
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::models::upload::*;
use crate::sse::ProgressSubscription;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Body, RequestBuilder};
use std::pin::Pin;

/// Boxed request body stream for streamed transfers
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Upload task and object transfer API methods
#[async_trait]
pub trait UploadsApi {
    /// Register an upload task for `total` bytes
    async fn init_upload_task(&self, total: u64) -> ApiResult<UploadTaskInfo>;

    /// Open the server-push progress stream of a task. Returns as soon as
    /// the response headers arrive.
    async fn subscribe_upload_progress(&self, task_id: &str) -> ApiResult<ProgressSubscription>;

    /// Transfer an object as an incrementally read stream
    async fn upload_object_stream(
        &self,
        request: &ObjectUploadRequest,
        body: BodyStream,
    ) -> ApiResult<serde_json::Value>;

    /// Transfer an object as a single body
    async fn upload_object(
        &self,
        request: &ObjectUploadRequest,
        body: Bytes,
    ) -> ApiResult<serde_json::Value>;
}

impl Client {
    async fn object_request(&self, request: &ObjectUploadRequest) -> RequestBuilder {
        let mut builder = self
            .http_client
            .post(self.build_url("/oss/files"))
            .header("Content-Type", "application/octet-stream")
            .header("X-File-Name", urlencoding::encode(&request.file_name).into_owned())
            .header("region_code", &request.destination.region_code)
            .header("bucket_name", &request.destination.bucket_name);

        if let Some(bearer) = self.bearer().await {
            builder = builder.header("Authorization", bearer);
        }
        if let Some(task_id) = &request.task_id {
            builder = builder.header("Upload-Task-ID", task_id);
        }
        builder
    }

    /// The stored object's descriptor is returned verbatim. An envelope is
    /// unwrapped to its `data` when the body carries one.
    async fn object_response(response: reqwest::Response) -> ApiResult<serde_json::Value> {
        let response = Self::check_status(response).await?;
        let text = response.text().await?;
        let value: serde_json::Value = serde_json::from_str(&text)?;

        let is_envelope = value.get("code").is_some_and(|c| c.is_i64());
        if !is_envelope {
            return Ok(value);
        }

        let envelope: ApiResponse<serde_json::Value> = serde_json::from_value(value)?;
        if !envelope.is_success() {
            return Err(ApiError::from_response(envelope));
        }
        Ok(envelope.data.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl UploadsApi for Client {
    async fn init_upload_task(&self, total: u64) -> ApiResult<UploadTaskInfo> {
        let info: UploadTaskInfo = self
            .post("/uploads/init", &InitUploadRequest { total })
            .await?;

        if info.id.trim().is_empty() {
            return Err(ApiError::Decode(
                "Response is missing the upload task id".to_string(),
            ));
        }
        Ok(info)
    }

    async fn subscribe_upload_progress(&self, task_id: &str) -> ApiResult<ProgressSubscription> {
        let url = self.build_url(&format!("/uploads/{}/stream", task_id));
        let mut builder = self
            .http_client
            .get(&url)
            .header("Accept", "text/event-stream");
        if let Some(bearer) = self.bearer().await {
            builder = builder.header("Authorization", bearer);
        }

        let response = Self::check_status(builder.send().await?).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ApiError::from));

        Ok(ProgressSubscription::from_byte_stream(stream))
    }

    async fn upload_object_stream(
        &self,
        request: &ObjectUploadRequest,
        body: BodyStream,
    ) -> ApiResult<serde_json::Value> {
        let response = self
            .object_request(request)
            .await
            .header("Content-Length", request.file_size)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        Self::object_response(response).await
    }

    async fn upload_object(
        &self,
        request: &ObjectUploadRequest,
        body: Bytes,
    ) -> ApiResult<serde_json::Value> {
        // Content-Length is derived from the body here
        let response = self.object_request(request).await.body(body).send().await?;

        Self::object_response(response).await
    }
}

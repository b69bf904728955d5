//! Scriptable in-memory upload backend for tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use ossdrive_api::api::{BodyStream, UploadsApi};
use ossdrive_api::models::upload::{ObjectUploadRequest, UploadTaskInfo};
use ossdrive_api::{ApiError, ApiResult, ProgressSubscription};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

enum ChannelBehavior {
    /// Subscription never answers
    Silent,
    /// Subscription is refused
    Refuse,
    /// Subscription opens and relays whatever the test feeds it
    Feed(Mutex<Option<mpsc::UnboundedReceiver<ApiResult<Bytes>>>>),
}

enum BodyFailure {
    Status(u16),
    Disconnect,
}

/// Test handle pushing raw SSE frames into an open subscription
pub struct ProgressFeed {
    tx: mpsc::UnboundedSender<ApiResult<Bytes>>,
}

impl ProgressFeed {
    pub fn progress(&self, uploaded: u64, total: u64) {
        self.raw(&format!(
            "event: progress\ndata: {{\"uploaded\":{},\"total\":{}}}\n\n",
            uploaded, total
        ));
    }

    pub fn raw(&self, frame: &str) {
        let _ = self.tx.send(Ok(Bytes::from(frame.to_string())));
    }

    pub fn fail(&self) {
        let _ = self
            .tx
            .send(Err(ApiError::Network("stream reset".to_string())));
    }
}

pub struct MockBackend {
    task_ids: Mutex<VecDeque<String>>,
    fail_registration: bool,
    channel: ChannelBehavior,
    reject_streaming: bool,
    body_failure: Option<BodyFailure>,
    chunk_delay: Option<Duration>,
    hold: Option<Arc<Notify>>,
    registrations: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
    stream_attempts: AtomicUsize,
    body_attempts: AtomicUsize,
    requests: Mutex<Vec<ObjectUploadRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            task_ids: Mutex::new(VecDeque::new()),
            fail_registration: false,
            channel: ChannelBehavior::Silent,
            reject_streaming: false,
            body_failure: None,
            chunk_delay: None,
            hold: None,
            registrations: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
            stream_attempts: AtomicUsize::new(0),
            body_attempts: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Ids handed out by registration, in order. Falls back to `T<n>`.
    pub fn with_task_ids(self, ids: &[&str]) -> Self {
        *self.task_ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn fail_registration(mut self) -> Self {
        self.fail_registration = true;
        self
    }

    pub fn refuse_channel(mut self) -> Self {
        self.channel = ChannelBehavior::Refuse;
        self
    }

    pub fn with_progress_feed(mut self) -> (Self, ProgressFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channel = ChannelBehavior::Feed(Mutex::new(Some(rx)));
        (self, ProgressFeed { tx })
    }

    pub fn reject_streaming(mut self) -> Self {
        self.reject_streaming = true;
        self
    }

    pub fn reject_body(mut self, status: u16) -> Self {
        self.body_failure = Some(BodyFailure::Status(status));
        self
    }

    pub fn drop_body_connection(mut self) -> Self {
        self.body_failure = Some(BodyFailure::Disconnect);
        self
    }

    /// Pause between consumed chunks of a streamed body
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Streamed transfers wait for the returned notify before answering
    pub fn hold_transfer(mut self) -> (Self, Arc<Notify>) {
        let notify = Arc::new(Notify::new());
        self.hold = Some(notify.clone());
        (self, notify)
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn stream_attempts(&self) -> usize {
        self.stream_attempts.load(Ordering::SeqCst)
    }

    pub fn body_attempts(&self) -> usize {
        self.body_attempts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ObjectUploadRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadsApi for MockBackend {
    async fn init_upload_task(&self, _total: u64) -> ApiResult<UploadTaskInfo> {
        let n = self.registrations.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_registration {
            return Err(ApiError::Http {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "task store unavailable".to_string(),
            });
        }
        let id = self
            .task_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("T{}", n));
        Ok(UploadTaskInfo { id })
    }

    async fn subscribe_upload_progress(&self, task_id: &str) -> ApiResult<ProgressSubscription> {
        self.subscriptions.lock().unwrap().push(task_id.to_string());
        match &self.channel {
            ChannelBehavior::Silent => futures::future::pending().await,
            ChannelBehavior::Refuse => Err(ApiError::Http {
                status: StatusCode::NOT_FOUND,
                message: "unknown task".to_string(),
            }),
            ChannelBehavior::Feed(rx) => {
                let rx = rx.lock().unwrap().take();
                match rx {
                    Some(rx) => Ok(ProgressSubscription::from_byte_stream(
                        UnboundedReceiverStream::new(rx),
                    )),
                    None => futures::future::pending().await,
                }
            }
        }
    }

    async fn upload_object_stream(
        &self,
        request: &ObjectUploadRequest,
        mut body: BodyStream,
    ) -> ApiResult<serde_json::Value> {
        self.stream_attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.reject_streaming {
            return Err(ApiError::Http {
                status: StatusCode::NOT_IMPLEMENTED,
                message: "streamed bodies are not supported".to_string(),
            });
        }

        let mut size = 0usize;
        while let Some(chunk) = body.next().await {
            size += chunk?.len();
            if let Some(delay) = self.chunk_delay {
                tokio::time::sleep(delay).await;
            }
        }
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }

        Ok(json!({ "mode": "stream", "size": size, "name": request.file_name }))
    }

    async fn upload_object(
        &self,
        request: &ObjectUploadRequest,
        body: Bytes,
    ) -> ApiResult<serde_json::Value> {
        self.body_attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match &self.body_failure {
            Some(BodyFailure::Status(status)) => Err(ApiError::Http {
                status: StatusCode::from_u16(*status).unwrap(),
                message: "rejected".to_string(),
            }),
            Some(BodyFailure::Disconnect) => {
                Err(ApiError::Network("connection reset by peer".to_string()))
            }
            None => Ok(json!({ "mode": "body", "size": body.len(), "name": request.file_name })),
        }
    }
}

//! Byte transfer with client-side progress accounting and a single
//! whole-body fallback

use crate::config::UploaderConfig;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::progress::{ProgressClock, ProgressInput, ProgressSample};
use crate::uploader::task::UploadFile;
use bytes::Bytes;
use futures::Stream;
use futures::stream::BoxStream;
use ossdrive_api::api::UploadsApi;
use ossdrive_api::models::upload::ObjectUploadRequest;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How the bytes are handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Incrementally read body with per-chunk accounting
    Streaming,
    /// Single opaque body, no client-side progress
    WholeBody,
}

impl TransferMode {
    /// The mode to degrade to after a failure, if any
    pub fn fallback(self) -> Option<Self> {
        match self {
            TransferMode::Streaming => Some(TransferMode::WholeBody),
            TransferMode::WholeBody => None,
        }
    }
}

/// Body stream that reports cumulative bytes as they are pulled
pub struct ProgressStream {
    inner: BoxStream<'static, io::Result<Bytes>>,
    total: u64,
    transferred: u64,
    clock: ProgressClock,
    interval: Duration,
    last_publish: Instant,
    progress_tx: UnboundedSender<ProgressInput>,
    finished: bool,
}

impl ProgressStream {
    pub fn new(
        inner: BoxStream<'static, io::Result<Bytes>>,
        total: u64,
        clock: ProgressClock,
        interval: Duration,
        progress_tx: UnboundedSender<ProgressInput>,
    ) -> Self {
        let stream = Self {
            inner,
            total,
            transferred: 0,
            clock,
            interval,
            last_publish: Instant::now(),
            progress_tx,
            finished: false,
        };
        // Baseline for the speed window
        stream.publish();
        stream
    }

    fn publish_throttled(&mut self) {
        if self.last_publish.elapsed() >= self.interval {
            self.last_publish = Instant::now();
            self.publish();
        }
    }

    fn publish(&self) {
        let sample = ProgressSample::new(self.clock.now_ms(), self.transferred, self.total);
        let _ = self.progress_tx.send(ProgressInput::Frontend(sample));
    }
}

impl Stream for ProgressStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.transferred += chunk.len() as u64;
                self.publish_throttled();
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                // A final count inside the interval is dropped; completion
                // reconciles the display anyway
                if !self.finished {
                    self.finished = true;
                    self.publish_throttled();
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Moves one file's bytes to the destination
pub struct TransferStrategy<'a, B> {
    backend: &'a B,
    config: &'a UploaderConfig,
    clock: ProgressClock,
    progress_tx: UnboundedSender<ProgressInput>,
}

impl<'a, B> TransferStrategy<'a, B>
where
    B: UploadsApi + Send + Sync,
{
    pub fn new(
        backend: &'a B,
        config: &'a UploaderConfig,
        clock: ProgressClock,
        progress_tx: UnboundedSender<ProgressInput>,
    ) -> Self {
        Self {
            backend,
            config,
            clock,
            progress_tx,
        }
    }

    /// Transfer `file`, degrading at most once from streaming to whole body.
    /// Returns the backend's acknowledgement payload.
    pub async fn run(
        &self,
        file: &UploadFile,
        request: &ObjectUploadRequest,
    ) -> UploadResult<serde_json::Value> {
        let mut mode = TransferMode::Streaming;
        loop {
            let result = self.attempt(mode, file, request).await;
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match mode.fallback() {
                Some(next) if !err.is_cancelled() => {
                    warn!(
                        target: "uploader::transfer",
                        file = %request.file_name,
                        error = %err,
                        from = ?mode,
                        to = ?next,
                        "Transfer attempt failed, falling back"
                    );
                    let _ = self.progress_tx.send(ProgressInput::FrontendUnavailable);
                    mode = next;
                }
                _ => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        mode: TransferMode,
        file: &UploadFile,
        request: &ObjectUploadRequest,
    ) -> UploadResult<serde_json::Value> {
        match mode {
            TransferMode::Streaming => {
                let chunks = file.open_stream().await?;
                let body = ProgressStream::new(
                    chunks,
                    file.size,
                    self.clock,
                    self.config.publish_interval(),
                    self.progress_tx.clone(),
                );

                info!(
                    target: "uploader::transfer",
                    file = %request.file_name,
                    size = file.size,
                    "Starting streamed transfer"
                );
                self.backend
                    .upload_object_stream(request, Box::pin(body))
                    .await
                    .map_err(UploadError::transfer)
            }
            TransferMode::WholeBody => {
                let body = file.read_all().await?;

                debug!(
                    target: "uploader::transfer",
                    file = %request.file_name,
                    size = body.len(),
                    "Starting whole-body transfer"
                );
                self.backend
                    .upload_object(request, body)
                    .await
                    .map_err(UploadError::transfer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::testing::MockBackend;
    use futures::StreamExt;
    use ossdrive_api::models::upload::UploadDestination;
    use tokio::sync::mpsc;

    fn request(size: u64) -> ObjectUploadRequest {
        ObjectUploadRequest {
            file_name: "data.bin".into(),
            file_size: size,
            destination: UploadDestination::new("cn-east", "photos"),
            task_id: Some("T1".into()),
        }
    }

    #[test]
    fn test_fallback_happens_once() {
        assert_eq!(
            TransferMode::Streaming.fallback(),
            Some(TransferMode::WholeBody)
        );
        assert_eq!(TransferMode::WholeBody.fallback(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_stream_throttles_and_reports_final_count() {
        let chunks: Vec<io::Result<Bytes>> =
            (0..10).map(|_| Ok(Bytes::from(vec![0u8; 100]))).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut stream = ProgressStream::new(
            futures::stream::iter(chunks).boxed(),
            1000,
            ProgressClock::start(),
            Duration::from_millis(500),
            tx,
        );

        while let Some(chunk) = stream.next().await {
            chunk.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        drop(stream);

        let mut samples = Vec::new();
        while let Some(input) = rx.recv().await {
            match input {
                ProgressInput::Frontend(s) => samples.push(s),
                other => panic!("Unexpected input {:?}", other),
            }
        }

        assert_eq!(samples.first().unwrap().bytes, 0);
        assert_eq!(samples.last().unwrap().bytes, 1000);
        assert!(samples.len() <= 5, "too many samples: {}", samples.len());
        for pair in samples.windows(2) {
            assert!(pair[1].timestamp_ms - pair[0].timestamp_ms >= 500);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_count_respects_publish_interval() {
        let chunks: Vec<io::Result<Bytes>> =
            (0..3).map(|_| Ok(Bytes::from(vec![0u8; 100]))).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut stream = ProgressStream::new(
            futures::stream::iter(chunks).boxed(),
            300,
            ProgressClock::start(),
            Duration::from_millis(500),
            tx,
        );

        // First chunk lands on a tick; the rest and end of stream follow at once
        tokio::time::sleep(Duration::from_millis(500)).await;
        while let Some(chunk) = stream.next().await {
            chunk.unwrap();
        }
        drop(stream);

        let mut stamps = Vec::new();
        while let Some(ProgressInput::Frontend(s)) = rx.recv().await {
            stamps.push(s.timestamp_ms);
        }
        assert_eq!(stamps, vec![0, 500]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_success_reports_frontend_progress() {
        let backend = MockBackend::new().with_chunk_delay(Duration::from_millis(100));
        let config = UploaderConfig::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let file = UploadFile::from_bytes("data.bin", vec![1u8; 300_000]);

        let strategy = TransferStrategy::new(&backend, &config, ProgressClock::start(), tx);
        let result = strategy.run(&file, &request(file.size)).await.unwrap();
        drop(strategy);

        assert_eq!(result["size"], 300_000);
        assert_eq!(backend.stream_attempts(), 1);
        assert_eq!(backend.body_attempts(), 0);

        let mut samples = Vec::new();
        while let Some(input) = rx.recv().await {
            if let ProgressInput::Frontend(s) = input {
                samples.push(s);
            }
        }
        assert!(samples.len() > 1);
        assert!(samples.windows(2).all(|p| p[0].bytes <= p[1].bytes));
        assert!(samples.last().unwrap().bytes > 0);
    }

    #[tokio::test]
    async fn test_streaming_rejection_falls_back_to_whole_body() {
        let backend = MockBackend::new().reject_streaming();
        let config = UploaderConfig::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let file = UploadFile::from_bytes("data.bin", vec![1u8; 1024]);

        let strategy = TransferStrategy::new(&backend, &config, ProgressClock::start(), tx);
        let result = strategy.run(&file, &request(file.size)).await.unwrap();
        drop(strategy);

        assert_eq!(result["mode"], "body");
        assert_eq!(backend.stream_attempts(), 1);
        assert_eq!(backend.body_attempts(), 1);

        let mut saw_unavailable = false;
        while let Some(input) = rx.recv().await {
            if input == ProgressInput::FrontendUnavailable {
                saw_unavailable = true;
            } else {
                assert!(!saw_unavailable, "frontend sample after fallback");
            }
        }
        assert!(saw_unavailable);
    }

    #[tokio::test]
    async fn test_fallback_failure_fails_the_operation() {
        let backend = MockBackend::new().reject_streaming().reject_body(413);
        let config = UploaderConfig::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let file = UploadFile::from_bytes("data.bin", vec![1u8; 16]);

        let strategy = TransferStrategy::new(&backend, &config, ProgressClock::start(), tx);
        let err = strategy.run(&file, &request(file.size)).await.unwrap_err();

        match err {
            UploadError::Transfer { status, .. } => assert_eq!(status, Some(413)),
            other => panic!("Expected Transfer error, got {:?}", other),
        }
        assert_eq!(backend.stream_attempts(), 1);
        assert_eq!(backend.body_attempts(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_is_reported_as_network_error() {
        let backend = MockBackend::new().reject_streaming().drop_body_connection();
        let config = UploaderConfig::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let file = UploadFile::from_bytes("data.bin", vec![1u8; 16]);

        let strategy = TransferStrategy::new(&backend, &config, ProgressClock::start(), tx);
        let err = strategy.run(&file, &request(file.size)).await.unwrap_err();
        assert!(matches!(err, UploadError::Network(_)));
    }
}

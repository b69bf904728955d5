//! Upload task coordinator: registration, progress channel, transfer and
//! reconciliation for one file

use crate::config::UploaderConfig;
use crate::events::{Event, EventBroadcaster};
use crate::uploader::channel::ServerProgressChannel;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::progress::{
    NoOpProgress, ProgressArbiter, ProgressCallback, ProgressClock, ProgressInput,
    ProgressSnapshot, ProgressUpdate,
};
use crate::uploader::task::{UploadFile, UploadState, UploadTask, UploadTaskView, sanitize_file_name};
use crate::uploader::transfer::TransferStrategy;
use ossdrive_api::api::UploadsApi;
use ossdrive_api::models::upload::{ObjectUploadRequest, UploadDestination};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives one upload task through its lifecycle and owns its record
pub struct UploadTaskCoordinator<B> {
    backend: Arc<B>,
    config: UploaderConfig,
    events: EventBroadcaster,
    task: UploadTask,
    view_tx: watch::Sender<UploadTaskView>,
    callback: Arc<dyn ProgressCallback>,
}

impl<B> UploadTaskCoordinator<B>
where
    B: UploadsApi + Send + Sync + 'static,
{
    pub fn new(
        backend: Arc<B>,
        file: UploadFile,
        config: UploaderConfig,
        events: EventBroadcaster,
    ) -> Self {
        let task = UploadTask::new(file);
        let (view_tx, _) = watch::channel(task.view());
        Self {
            backend,
            config,
            events,
            task,
            view_tx,
            callback: Arc::new(NoOpProgress),
        }
    }

    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }

    pub fn state(&self) -> UploadState {
        self.task.state
    }

    /// Current projection of the task
    pub fn view(&self) -> UploadTaskView {
        self.task.view()
    }

    /// Receiver that observes every published view
    pub fn subscribe(&self) -> watch::Receiver<UploadTaskView> {
        self.view_tx.subscribe()
    }

    /// Run the task from `ready` or `error` to a terminal state. A retry
    /// re-registers and gets a fresh server task id.
    ///
    /// Cancellation leaves the record as it was at the moment of cancel and
    /// returns `UploadError::Cancelled`.
    pub async fn run(
        &mut self,
        destination: &UploadDestination,
        cancel: CancellationToken,
    ) -> UploadResult<serde_json::Value> {
        match self.task.state {
            UploadState::Ready | UploadState::Error => {}
            state => {
                return Err(UploadError::InvalidState(format!(
                    "cannot start a task in state {:?}",
                    state
                )));
            }
        }

        match self.execute(destination, &cancel).await {
            Ok(result) => Ok(result),
            Err(UploadError::Cancelled) => {
                info!(target: "uploader::coordinator", task_id = %self.task.id, "Upload cancelled");
                Err(UploadError::Cancelled)
            }
            Err(e) => {
                error!(
                    target: "uploader::coordinator",
                    task_id = %self.task.id,
                    file = %self.task.file.name,
                    error = %e,
                    "Upload failed"
                );
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        destination: &UploadDestination,
        cancel: &CancellationToken,
    ) -> UploadResult<serde_json::Value> {
        let clock = ProgressClock::start();
        let mut arbiter = ProgressArbiter::new(&self.config);

        self.update(|task| {
            task.state = UploadState::Initializing;
            task.server_task_id = None;
            task.frontend_progress = None;
            task.backend_progress = None;
            task.progress = ProgressSnapshot::default();
            task.error = None;
            task.result = None;
        });

        // Registration
        let registration = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.backend.init_upload_task(self.task.file.size) => result,
        };
        let server_task_id = registration.map_err(UploadError::registration)?.id;

        info!(
            target: "uploader::coordinator",
            task_id = %self.task.id,
            server_task_id = %server_task_id,
            size = self.task.file.size,
            "Upload task registered"
        );
        self.update(|task| {
            task.server_task_id = Some(server_task_id.clone());
            task.state = UploadState::Uploading;
        });

        // Progress channel, given a bounded head start over the transfer
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (channel, ready) = ServerProgressChannel::open(
            self.backend.clone(),
            server_task_id.clone(),
            clock,
            progress_tx.clone(),
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            opened = tokio::time::timeout(self.config.channel_ready_timeout(), ready) => match opened {
                Ok(Ok(())) => debug!(target: "uploader::coordinator", task_id = %self.task.id, "Progress channel ready"),
                Ok(Err(_)) => warn!(
                    target: "uploader::coordinator",
                    task_id = %self.task.id,
                    "Progress channel unavailable, continuing with client-side progress"
                ),
                Err(_) => warn!(
                    target: "uploader::coordinator",
                    task_id = %self.task.id,
                    timeout_ms = self.config.channel_ready_timeout_ms,
                    "Progress channel not ready in time, starting transfer anyway"
                ),
            }
        }

        // Transfer
        let request = ObjectUploadRequest {
            file_name: sanitize_file_name(&self.task.file.name),
            file_size: self.task.file.size,
            destination: destination.clone(),
            task_id: Some(server_task_id),
        };
        let file = self.task.file.clone();
        let backend = self.backend.clone();
        let config = self.config.clone();
        let strategy = TransferStrategy::new(backend.as_ref(), &config, clock, progress_tx);
        let transfer = strategy.run(&file, &request);
        tokio::pin!(transfer);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                result = &mut transfer => break result,
                Some(input) = progress_rx.recv() => self.apply_progress(&mut arbiter, input),
            }
        };

        // Late server samples must not land after reconciliation
        channel.close();

        let result = outcome?;
        let snapshot = arbiter.reconcile(self.task.file.size);
        self.update(|task| {
            task.progress = snapshot;
            task.state = UploadState::Done;
            task.result = Some(result.clone());
        });
        self.notify_progress();

        info!(
            target: "uploader::coordinator",
            task_id = %self.task.id,
            file = %request.file_name,
            "Upload complete"
        );
        self.events
            .upload_completed(self.task.id.clone(), result.clone());
        Ok(result)
    }

    fn apply_progress(&mut self, arbiter: &mut ProgressArbiter, input: ProgressInput) {
        let snapshot = arbiter.reduce(input);
        self.task.frontend_progress = arbiter.frontend_progress();
        self.task.backend_progress = arbiter.backend_progress();

        if let Some(snapshot) = snapshot {
            self.task.progress = snapshot;
            self.notify_progress();
        }
        self.publish();
    }

    fn fail(&mut self, err: UploadError) {
        let message = err.to_string();
        self.update(|task| {
            task.state = UploadState::Error;
            task.progress = ProgressSnapshot::default();
            task.error = Some(err);
        });
        self.events.upload_failed(self.task.id.clone(), message);
    }

    /// Mutate the record and publish the result
    fn update(&mut self, f: impl FnOnce(&mut UploadTask)) {
        let previous = self.task.state;
        f(&mut self.task);
        if self.task.state != previous {
            debug!(
                target: "uploader::coordinator",
                task_id = %self.task.id,
                from = ?previous,
                to = ?self.task.state,
                "Task state changed"
            );
            self.events
                .upload_state_changed(self.task.id.clone(), self.task.state);
        }
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.task.view());
    }

    fn notify_progress(&self) {
        let snapshot = self.task.progress;
        self.events.broadcast(Event::UploadProgress {
            task_id: self.task.id.clone(),
            progress: snapshot.progress,
            speed: snapshot.speed,
            eta_seconds: snapshot.eta_seconds,
            source: snapshot.source,
        });
        self.callback.on_progress(ProgressUpdate {
            task_id: self.task.id.clone(),
            snapshot,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::progress::{FnProgress, ProgressSource};
    use crate::uploader::testing::MockBackend;
    use std::sync::Mutex;
    use std::time::Duration;

    fn destination() -> UploadDestination {
        UploadDestination::new("cn-east", "photos")
    }

    fn coordinator(backend: Arc<MockBackend>, file: UploadFile) -> UploadTaskCoordinator<MockBackend> {
        UploadTaskCoordinator::new(
            backend,
            file,
            UploaderConfig::default(),
            EventBroadcaster::default(),
        )
    }

    /// Records every snapshot handed to the callback
    fn recorder() -> (Arc<dyn ProgressCallback>, Arc<Mutex<Vec<ProgressSnapshot>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: Arc<dyn ProgressCallback> = Arc::new(FnProgress(move |update: ProgressUpdate| {
            sink.lock().unwrap().push(update.snapshot);
        }));
        (callback, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_side_progress_stays_capped_until_done() {
        let backend = Arc::new(
            MockBackend::new()
                .with_task_ids(&["T1"])
                .with_chunk_delay(Duration::from_millis(100)),
        );
        let (callback, seen) = recorder();
        let mut coordinator = coordinator(backend.clone(), UploadFile::from_bytes("video.mp4", vec![0u8; 1_000_000]))
            .with_progress_callback(callback);

        let result = coordinator
            .run(&destination(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["size"], 1_000_000);

        let seen = seen.lock().unwrap();
        let (last, before) = seen.split_last().unwrap();
        assert!(before.len() > 2, "expected intermediate samples");
        assert!(before.iter().all(|s| s.progress <= 90.0));
        assert!(before.iter().all(|s| s.source == ProgressSource::Frontend));
        assert_eq!(last.progress, 100.0);

        let view = coordinator.view();
        assert_eq!(view.state, UploadState::Done);
        assert_eq!(view.progress, 100.0);
        assert_eq!(view.server_task_id.as_deref(), Some("T1"));

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].task_id.as_deref(), Some("T1"));
        assert_eq!(backend.subscriptions(), vec!["T1".to_string()]);
    }

    #[tokio::test]
    async fn test_registration_failure_skips_channel_and_transfer() {
        let backend = Arc::new(MockBackend::new().fail_registration());
        let mut coordinator = coordinator(backend.clone(), UploadFile::from_bytes("a.txt", "abc"));

        let err = coordinator
            .run(&destination(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Registration(_)));

        let view = coordinator.view();
        assert_eq!(view.state, UploadState::Error);
        assert!(view.error.unwrap().contains("500"));
        assert!(backend.subscriptions().is_empty());
        assert_eq!(backend.stream_attempts(), 0);
        assert_eq!(backend.body_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_samples_take_over_display() {
        let (backend, feed) = MockBackend::new().with_progress_feed();
        let (backend, release) = backend
            .with_chunk_delay(Duration::from_millis(200))
            .hold_transfer();
        let backend = Arc::new(backend);
        let mut coordinator = coordinator(backend.clone(), UploadFile::from_bytes("big.iso", vec![0u8; 640 * 1024]));
        let mut views = coordinator.subscribe();

        let run = tokio::spawn(async move {
            let result = coordinator.run(&destination(), CancellationToken::new()).await;
            (coordinator, result)
        });

        // Wait until the transfer has been running for a while
        tokio::time::sleep(Duration::from_millis(1500)).await;
        feed.progress(100 * 1024, 640 * 1024);
        views
            .wait_for(|v| v.progress_source == ProgressSource::Backend)
            .await
            .unwrap();
        let view = views.borrow().clone();
        assert!((view.progress - 15.625).abs() < 1e-9);
        assert!(view.frontend_progress.unwrap() > view.progress);

        // Frontend keeps advancing but the display follows the server
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(views.borrow().progress_source, ProgressSource::Backend);
        assert!((views.borrow().progress - 15.625).abs() < 1e-9);

        feed.progress(640 * 1024, 640 * 1024);
        views.wait_for(|v| v.backend_progress == Some(100.0)).await.unwrap();
        assert_eq!(views.borrow().progress, 99.0);

        release.notify_one();
        let (coordinator, result) = run.await.unwrap();
        result.unwrap();
        assert_eq!(coordinator.view().progress, 100.0);
        assert_eq!(coordinator.view().state, UploadState::Done);
    }

    #[tokio::test]
    async fn test_streaming_rejection_falls_back_and_completes() {
        let backend = Arc::new(MockBackend::new().refuse_channel().reject_streaming());
        let mut coordinator = coordinator(backend.clone(), UploadFile::from_bytes("a.bin", vec![1u8; 2048]));

        let result = coordinator
            .run(&destination(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["mode"], "body");
        assert_eq!(backend.stream_attempts(), 1);
        assert_eq!(backend.body_attempts(), 1);
        assert_eq!(coordinator.view().state, UploadState::Done);
    }

    #[tokio::test]
    async fn test_failed_fallback_moves_to_error_and_retry_reregisters() {
        let backend = Arc::new(
            MockBackend::new()
                .refuse_channel()
                .reject_streaming()
                .reject_body(413)
                .with_task_ids(&["T1", "T2"]),
        );
        let mut coordinator = coordinator(backend.clone(), UploadFile::from_bytes("a.bin", vec![1u8; 16]));

        let err = coordinator
            .run(&destination(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transfer { status: Some(413), .. }));
        assert_eq!(coordinator.state(), UploadState::Error);
        assert_eq!(coordinator.view().progress, 0.0);

        let _ = coordinator.run(&destination(), CancellationToken::new()).await;
        assert_eq!(backend.registrations(), 2);
        assert_eq!(coordinator.view().server_task_id.as_deref(), Some("T2"));
        assert_eq!(
            backend.subscriptions(),
            vec!["T1".to_string(), "T2".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_transfer() {
        let (backend, _release) = MockBackend::new().refuse_channel().hold_transfer();
        let backend = Arc::new(backend);
        let mut coordinator = coordinator(backend.clone(), UploadFile::from_bytes("a.bin", vec![1u8; 4096]));
        let mut views = coordinator.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let run = tokio::spawn(async move { coordinator.run(&destination(), token).await });

        views
            .wait_for(|v| v.state == UploadState::Uploading)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.stream_attempts(), 1);

        cancel.cancel();
        let result = run.await.unwrap();
        assert!(matches!(result, Err(UploadError::Cancelled)));
    }

    #[tokio::test]
    async fn test_running_task_cannot_be_started_twice() {
        let backend = Arc::new(MockBackend::new().refuse_channel());
        let mut coordinator = coordinator(backend, UploadFile::from_bytes("a.bin", vec![1u8; 8]));
        coordinator
            .run(&destination(), CancellationToken::new())
            .await
            .unwrap();

        let err = coordinator
            .run(&destination(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidState(_)));
    }
}

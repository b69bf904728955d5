//! Upload queue: owns one coordinator per file and exposes their views

use crate::config::UploaderConfig;
use crate::events::EventBroadcaster;
use crate::notify::{Notification, Notifier};
use crate::uploader::coordinator::UploadTaskCoordinator;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::progress::{NoOpProgress, ProgressCallback};
use crate::uploader::task::{UploadFile, UploadState, UploadTaskView};
use dashmap::DashMap;
use ossdrive_api::api::UploadsApi;
use ossdrive_api::models::upload::UploadDestination;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome counts of a settled batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

struct TaskEntry<B> {
    seq: u64,
    coordinator: Arc<Mutex<UploadTaskCoordinator<B>>>,
    view: watch::Receiver<UploadTaskView>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<UploadResult<serde_json::Value>>>,
}

pub struct UploadManager<B> {
    backend: Arc<B>,
    config: UploaderConfig,
    events: EventBroadcaster,
    notifier: Arc<dyn Notifier>,
    callback: Arc<dyn ProgressCallback>,
    tasks: DashMap<String, TaskEntry<B>>,
    next_seq: AtomicU64,
}

impl<B> UploadManager<B>
where
    B: UploadsApi + Send + Sync + 'static,
{
    pub fn new(
        backend: Arc<B>,
        config: UploaderConfig,
        events: EventBroadcaster,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            backend,
            config,
            events,
            notifier,
            callback: Arc::new(NoOpProgress),
            tasks: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Add files in `ready` state. Returns their task ids in order.
    pub fn enqueue(&self, files: Vec<UploadFile>) -> Vec<String> {
        files
            .into_iter()
            .map(|file| {
                let coordinator = UploadTaskCoordinator::new(
                    self.backend.clone(),
                    file,
                    self.config.clone(),
                    self.events.clone(),
                )
                .with_progress_callback(self.callback.clone());

                let id = coordinator.id().to_string();
                let view = coordinator.subscribe();
                let (file_name, file_size) = {
                    let v = view.borrow();
                    (v.file_name.clone(), v.file_size)
                };

                self.tasks.insert(
                    id.clone(),
                    TaskEntry {
                        seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                        coordinator: Arc::new(Mutex::new(coordinator)),
                        view,
                        cancel: CancellationToken::new(),
                        handle: None,
                    },
                );
                debug!(target: "uploader::manager", task_id = %id, file = %file_name, "Upload queued");
                self.events.upload_queued(id.clone(), file_name, file_size);
                id
            })
            .collect()
    }

    /// Start every task still in `ready`. Returns how many were started.
    pub fn start_all(&self, destination: &UploadDestination) -> usize {
        let ready: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| entry.handle.is_none() && entry.view.borrow().state == UploadState::Ready)
            .map(|entry| entry.key().clone())
            .collect();

        let started = ready
            .iter()
            .filter(|id| self.spawn(id, destination))
            .count();
        info!(target: "uploader::manager", started, "Starting uploads");
        started
    }

    /// Restart a task from `error`
    pub fn retry(&self, id: &str, destination: &UploadDestination) -> UploadResult<()> {
        let state = self
            .tasks
            .get(id)
            .map(|entry| entry.view.borrow().state)
            .ok_or_else(|| UploadError::InvalidState(format!("unknown task {}", id)))?;

        if state != UploadState::Error {
            return Err(UploadError::InvalidState(format!(
                "only failed tasks can be retried, task is {:?}",
                state
            )));
        }
        if !self.spawn(id, destination) {
            return Err(UploadError::InvalidState(format!("task {} is busy", id)));
        }
        info!(target: "uploader::manager", task_id = %id, "Retrying upload");
        Ok(())
    }

    /// Drop a task from the queue, aborting its transfer if one is in flight
    pub fn cancel(&self, id: &str) -> bool {
        match self.tasks.remove(id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                self.events.upload_removed(id.to_string());
                info!(target: "uploader::manager", task_id = %id, "Upload removed");
                true
            }
            None => false,
        }
    }

    /// Drop every finished task
    pub fn clear_completed(&self) -> usize {
        let done: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| entry.view.borrow().state == UploadState::Done)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &done {
            self.cancel(id);
        }
        done.len()
    }

    /// Views of every task, in enqueue order
    pub fn tasks(&self) -> Vec<UploadTaskView> {
        let mut entries: Vec<(u64, UploadTaskView)> = self
            .tasks
            .iter()
            .map(|entry| (entry.seq, entry.view.borrow().clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, view)| view).collect()
    }

    pub fn task(&self, id: &str) -> Option<UploadTaskView> {
        self.tasks.get(id).map(|entry| entry.view.borrow().clone())
    }

    /// Observe a single task's view as it changes
    pub fn watch(&self, id: &str) -> Option<watch::Receiver<UploadTaskView>> {
        self.tasks.get(id).map(|entry| entry.view.clone())
    }

    /// Wait for every started run to settle, then post one summary
    /// notification. Cancelled runs are not counted.
    pub async fn wait_all(&self) -> BatchSummary {
        let handles: Vec<(String, JoinHandle<UploadResult<serde_json::Value>>)> = self
            .tasks
            .iter_mut()
            .filter_map(|mut entry| {
                let id = entry.key().clone();
                entry.handle.take().map(|handle| (id, handle))
            })
            .collect();

        let mut summary = BatchSummary::default();
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(_)) => summary.succeeded += 1,
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    warn!(target: "uploader::manager", task_id = %id, error = %e, "Upload task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            target: "uploader::manager",
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Upload batch settled"
        );
        if let Some(notification) = Notification::batch_summary(summary.succeeded, summary.failed) {
            self.notifier.notify(notification);
        }
        summary
    }

    /// Spawn a run for `id`. False when the task is gone or a run is in
    /// flight.
    fn spawn(&self, id: &str, destination: &UploadDestination) -> bool {
        let Some(mut entry) = self.tasks.get_mut(id) else {
            return false;
        };
        if entry.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        entry.cancel = cancel.clone();
        let coordinator = entry.coordinator.clone();
        let destination = destination.clone();
        entry.handle = Some(tokio::spawn(async move {
            let mut coordinator = coordinator.lock().await;
            coordinator.run(&destination, cancel).await
        }));
        true
    }
}

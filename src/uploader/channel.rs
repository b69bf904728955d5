//! Server-push progress channel for one upload task

use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::progress::{ProgressClock, ProgressInput, ProgressSample};
use ossdrive_api::ProgressStreamEvent;
use ossdrive_api::api::UploadsApi;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Background listener relaying server progress into the arbiter's input
/// queue. Closing or dropping it tears down the subscription.
pub struct ServerProgressChannel {
    handle: JoinHandle<()>,
}

impl ServerProgressChannel {
    /// Subscribe to `task_id`'s progress stream. The returned receiver
    /// resolves once the subscription is open; it is dropped without a value
    /// if the subscription could not be established.
    pub fn open<B>(
        backend: Arc<B>,
        task_id: String,
        clock: ProgressClock,
        progress_tx: mpsc::UnboundedSender<ProgressInput>,
    ) -> (Self, oneshot::Receiver<()>)
    where
        B: UploadsApi + Send + Sync + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(listen(backend, task_id, clock, progress_tx, ready_tx));
        (Self { handle }, ready_rx)
    }

    pub fn close(self) {
        self.handle.abort();
    }
}

impl Drop for ServerProgressChannel {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn listen<B>(
    backend: Arc<B>,
    task_id: String,
    clock: ProgressClock,
    progress_tx: mpsc::UnboundedSender<ProgressInput>,
    ready_tx: oneshot::Sender<()>,
) where
    B: UploadsApi + Send + Sync + 'static,
{
    // Channel failures only downgrade the progress source
    if let Err(e) = relay(backend.as_ref(), &task_id, clock, &progress_tx, ready_tx).await {
        warn!(
            target: "uploader::channel",
            task_id = %task_id,
            error = %e,
            "Progress channel lost"
        );
    }
    let _ = progress_tx.send(ProgressInput::ChannelLost);
}

/// Forward server samples until the stream ends. Returns `Ok` on a clean
/// close or once nobody is listening.
async fn relay<B>(
    backend: &B,
    task_id: &str,
    clock: ProgressClock,
    progress_tx: &mpsc::UnboundedSender<ProgressInput>,
    ready_tx: oneshot::Sender<()>,
) -> UploadResult<()>
where
    B: UploadsApi + Send + Sync,
{
    let mut subscription = backend
        .subscribe_upload_progress(task_id)
        .await
        .map_err(UploadError::channel)?;

    debug!(target: "uploader::channel", task_id = %task_id, "Progress channel open");
    let _ = ready_tx.send(());

    let mut had_backend = false;
    loop {
        let event = subscription.next_event().await.map_err(|e| {
            debug!(target: "uploader::channel", task_id = %task_id, had_backend, "Progress stream failed");
            UploadError::channel(e)
        })?;

        match event {
            Some(ProgressStreamEvent::Progress(progress)) => {
                if !had_backend {
                    had_backend = true;
                    info!(
                        target: "uploader::channel",
                        task_id = %task_id,
                        "Server-side progress available"
                    );
                }
                let sample = ProgressSample::new(clock.now_ms(), progress.uploaded, progress.total);
                if progress_tx.send(ProgressInput::Backend(sample)).is_err() {
                    // Coordinator is gone
                    return Ok(());
                }
            }
            Some(ProgressStreamEvent::Message(data)) => {
                trace!(target: "uploader::channel", task_id = %task_id, data = %data, "Ignoring non-progress event");
            }
            Some(ProgressStreamEvent::Malformed(data)) => {
                debug!(target: "uploader::channel", task_id = %task_id, data = %data, "Dropping malformed progress event");
            }
            None => {
                debug!(target: "uploader::channel", task_id = %task_id, "Progress channel closed by server");
                return Ok(());
            }
        }
    }
}

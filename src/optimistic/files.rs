//! Optimistic flows over the visible file list

use super::{OptimisticAction, OptimisticUpdateManager};
use crate::notify::Notification;
use bytes::Bytes;
use chrono::Utc;
use ossdrive_api::api::FilesApi;
use ossdrive_api::models::file::{ListFileParams, OssFile};
use ossdrive_api::{ApiError, ApiResult};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct ListState {
    items: Vec<OssFile>,
    total: u64,
}

/// A file taken out of the list, with its neighbours at that moment
#[derive(Debug, Clone)]
struct RemovedSlot {
    index: usize,
    prev: Option<i64>,
    next: Option<i64>,
    file: OssFile,
}

fn index_of(items: &[OssFile], id: i64) -> Option<usize> {
    items.iter().position(|f| f.id == id)
}

/// Shared visible list of stored objects
#[derive(Debug, Clone, Default)]
pub struct FileList {
    inner: Arc<RwLock<ListState>>,
}

impl FileList {
    pub fn new(items: Vec<OssFile>) -> Self {
        let total = items.len() as u64;
        Self {
            inner: Arc::new(RwLock::new(ListState { items, total })),
        }
    }

    pub fn items(&self) -> Vec<OssFile> {
        self.read().items.clone()
    }

    pub fn total(&self) -> u64 {
        self.read().total
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<OssFile> {
        self.read().items.iter().find(|f| f.id == id).cloned()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.read().items.iter().any(|f| f.id == id)
    }

    pub fn replace(&self, items: Vec<OssFile>, total: u64) {
        let mut state = self.write();
        state.items = items;
        state.total = total;
    }

    fn prepend(&self, file: OssFile) {
        let mut state = self.write();
        state.items.insert(0, file);
        state.total += 1;
    }

    fn swap(&self, id: i64, file: OssFile) {
        let mut state = self.write();
        if let Some(slot) = state.items.iter_mut().find(|f| f.id == id) {
            *slot = file;
        }
    }

    fn remove_ids(&self, ids: &[i64]) {
        let mut state = self.write();
        let before = state.items.len();
        state.items.retain(|f| !ids.contains(&f.id));
        let removed = (before - state.items.len()) as u64;
        state.total = state.total.saturating_sub(removed);
    }

    /// Where each listed file among `ids` sits right now, in list order
    fn positions(&self, ids: &[i64]) -> Vec<RemovedSlot> {
        let state = self.read();
        let items = &state.items;
        items
            .iter()
            .enumerate()
            .filter(|(_, f)| ids.contains(&f.id))
            .map(|(index, f)| RemovedSlot {
                index,
                prev: index.checked_sub(1).map(|i| items[i].id),
                next: items.get(index + 1).map(|f| f.id),
                file: f.clone(),
            })
            .collect()
    }

    /// Reinsert removed files next to the neighbours they had, so rows the
    /// rollback never touched keep their order. `removed` must be in list
    /// order; files already listed are skipped.
    fn restore(&self, removed: &[RemovedSlot]) {
        let mut state = self.write();
        for slot in removed {
            if index_of(&state.items, slot.file.id).is_some() {
                continue;
            }
            let at = match slot.next {
                None => state.items.len(),
                Some(next) => match index_of(&state.items, next) {
                    Some(i) => i,
                    None => match slot.prev {
                        None => 0,
                        Some(prev) => index_of(&state.items, prev)
                            .map_or(slot.index.min(state.items.len()), |i| i + 1),
                    },
                },
            };
            state.items.insert(at, slot.file.clone());
            state.total += 1;
        }
    }

    // A panic while holding the lock leaves plain data behind; keep serving it
    fn read(&self) -> RwLockReadGuard<'_, ListState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ListState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Upload and delete flows that update the visible list ahead of the
/// backend and roll back on failure
pub struct FileListService<B> {
    backend: Arc<B>,
    list: FileList,
    updates: OptimisticUpdateManager,
    params: ListFileParams,
    next_temp_id: Arc<AtomicI64>,
}

impl<B> Clone for FileListService<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            list: self.list.clone(),
            updates: self.updates.clone(),
            params: self.params.clone(),
            next_temp_id: self.next_temp_id.clone(),
        }
    }
}

impl<B> FileListService<B>
where
    B: FilesApi + Send + Sync,
{
    pub fn new(backend: Arc<B>, list: FileList, updates: OptimisticUpdateManager) -> Self {
        Self {
            backend,
            list,
            updates,
            params: ListFileParams::default(),
            next_temp_id: Arc::new(AtomicI64::new(-Utc::now().timestamp_millis())),
        }
    }

    /// Query used when refreshing the list
    pub fn with_params(mut self, params: ListFileParams) -> Self {
        self.params = params;
        self
    }

    pub fn list(&self) -> &FileList {
        &self.list
    }

    pub fn updates(&self) -> &OptimisticUpdateManager {
        &self.updates
    }

    /// Replace the visible list with the backend's
    pub async fn refresh(&self) -> ApiResult<()> {
        let page = self.backend.list_files(&self.params).await?;
        self.list.replace(page.items, page.total);
        Ok(())
    }

    /// Show a placeholder at the head of the list while the file uploads
    pub async fn upload_file(&self, file_name: &str, data: Bytes) -> ApiResult<OssFile> {
        let placeholder = self.placeholder(file_name, data.len() as u64);
        let temp_id = placeholder.id;

        let list = self.list.clone();
        let undo = self.list.clone();
        let key = self.updates.start_update(
            OptimisticAction::Upload,
            file_name,
            move || list.prepend(placeholder),
            move || undo.remove_ids(&[temp_id]),
        );

        match self.backend.upload_file(file_name, data).await {
            Ok(stored) => {
                self.list.swap(temp_id, stored.clone());
                self.revalidate().await;
                self.updates.complete_update(&key);
                self.updates
                    .notifier()
                    .notify(Notification::upload_success(&stored.original_filename));
                Ok(stored)
            }
            Err(e) => {
                self.fail(&key, "Upload", &e);
                self.revalidate().await;
                Err(e)
            }
        }
    }

    pub async fn delete_file(&self, id: i64) -> ApiResult<()> {
        let removed = self.list.positions(&[id]);

        let list = self.list.clone();
        let undo = self.list.clone();
        let key = self.updates.start_update(
            OptimisticAction::Delete,
            id.to_string(),
            move || list.remove_ids(&[id]),
            move || undo.restore(&removed),
        );

        match self.backend.delete_file(id).await {
            Ok(()) => {
                self.revalidate().await;
                self.updates.complete_update(&key);
                self.updates.notifier().notify(Notification::delete_success(1));
                Ok(())
            }
            Err(e) => {
                self.fail(&key, "Delete", &e);
                self.revalidate().await;
                Err(e)
            }
        }
    }

    /// Batch delete; a single failure restores every file of the batch
    pub async fn delete_files(&self, ids: &[i64]) -> ApiResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let owned: Vec<i64> = ids.to_vec();
        let removed = self.list.positions(&owned);
        let target = owned
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let list = self.list.clone();
        let undo = self.list.clone();
        let key = self.updates.start_update(
            OptimisticAction::Delete,
            target,
            move || list.remove_ids(&owned),
            move || undo.restore(&removed),
        );

        match self.backend.delete_files(ids).await {
            Ok(()) => {
                self.revalidate().await;
                self.updates.complete_update(&key);
                self.updates
                    .notifier()
                    .notify(Notification::delete_success(ids.len()));
                Ok(())
            }
            Err(e) => {
                self.fail(&key, "Delete", &e);
                self.revalidate().await;
                Err(e)
            }
        }
    }

    /// Signed download link; failures are surfaced as a notification
    pub async fn download_url(&self, id: i64) -> ApiResult<String> {
        match self.backend.get_download_url(id).await {
            Ok(response) => Ok(response.url),
            Err(e) => {
                let name = self
                    .list
                    .get(id)
                    .map(|f| f.original_filename)
                    .unwrap_or_else(|| format!("file_{}", id));
                let notification = if e.is_network() {
                    Notification::network_error(Some("Download"))
                } else {
                    Notification::download_error(&name, Some(&failure_message(&e)))
                };
                self.updates.notifier().notify(notification);
                Err(e)
            }
        }
    }

    /// Roll back with exactly one notification: a network notice when no
    /// response arrived, the action's own failure notice otherwise
    fn fail(&self, key: &str, operation: &str, err: &ApiError) {
        if err.is_network() {
            self.updates.rollback_update(key, None);
            self.updates
                .notifier()
                .notify(Notification::network_error(Some(operation)));
        } else {
            self.updates
                .rollback_update(key, Some(&failure_message(err)));
        }
    }

    async fn revalidate(&self) {
        if let Err(e) = self.refresh().await {
            warn!(target: "optimistic::files", error = %e, "Failed to refresh file list");
        } else {
            debug!(target: "optimistic::files", count = self.list.len(), "File list refreshed");
        }
    }

    fn placeholder(&self, file_name: &str, size: u64) -> OssFile {
        let now = Utc::now();
        OssFile {
            id: self.next_temp_id.fetch_sub(1, Ordering::Relaxed),
            file_name: file_name.to_string(),
            original_filename: file_name.to_string(),
            file_size: size,
            file_type: String::new(),
            storage_type: String::new(),
            object_key: format!("temp/{}", file_name),
            config_id: 0,
            config_name: "uploading".to_string(),
            md5: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Message the backend attached to a rejection, or the error text
fn failure_message(err: &ApiError) -> String {
    match err {
        ApiError::Api { message, .. } | ApiError::Http { message, .. } if !message.is_empty() => {
            message.clone()
        }
        other => other.to_string(),
    }
}

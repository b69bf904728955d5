//! Speculative list mutations with keyed rollback

pub mod files;

pub use files::{FileList, FileListService};

use crate::notify::{Notification, Notifier};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Kind of mutation being applied ahead of its network confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimisticAction {
    Upload,
    Delete,
    Download,
    Rename,
    Update,
}

impl fmt::Display for OptimisticAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimisticAction::Upload => "upload",
            OptimisticAction::Delete => "delete",
            OptimisticAction::Download => "download",
            OptimisticAction::Rename => "rename",
            OptimisticAction::Update => "update",
        };
        f.write_str(name)
    }
}

type Rollback = Box<dyn FnOnce() + Send + Sync>;

struct LedgerEntry {
    action: OptimisticAction,
    target: String,
    rollback: Rollback,
}

/// Diagnostic view of an unresolved mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub key: String,
    pub action: OptimisticAction,
    pub target: String,
}

/// Ledger of unresolved optimistic mutations. One instance per session,
/// shared by cloning.
#[derive(Clone)]
pub struct OptimisticUpdateManager {
    ledger: Arc<DashMap<String, LedgerEntry>>,
    notifier: Arc<dyn Notifier>,
    seq: Arc<AtomicU64>,
}

impl OptimisticUpdateManager {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            ledger: Arc::new(DashMap::new()),
            notifier,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Apply `apply` right away and remember `rollback` under a fresh key.
    ///
    /// Two calls for the same action and target get distinct keys, so
    /// resolving one never touches the other.
    pub fn start_update<A, R>(
        &self,
        action: OptimisticAction,
        target: impl Into<String>,
        apply: A,
        rollback: R,
    ) -> String
    where
        A: FnOnce(),
        R: FnOnce() + Send + Sync + 'static,
    {
        let target = target.into();
        let key = format!(
            "{}-{}-{}-{}",
            action,
            target,
            chrono::Utc::now().timestamp_millis(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        );

        self.ledger.insert(
            key.clone(),
            LedgerEntry {
                action,
                target,
                rollback: Box::new(rollback),
            },
        );
        apply();

        debug!(target: "optimistic", key = %key, "Optimistic update applied");
        key
    }

    /// Forget the entry; the caller's success path already shows the final
    /// state
    pub fn complete_update(&self, key: &str) {
        if self.ledger.remove(key).is_some() {
            debug!(target: "optimistic", key = %key, "Optimistic update confirmed");
        }
    }

    /// Undo the entry's mutation and, when `error` is given, post the
    /// failure notification for its action. Unknown keys are ignored.
    pub fn rollback_update(&self, key: &str, error: Option<&str>) {
        let Some((_, entry)) = self.ledger.remove(key) else {
            return;
        };

        warn!(
            target: "optimistic",
            key = %key,
            action = %entry.action,
            target_id = %entry.target,
            error = ?error,
            "Rolling back optimistic update"
        );
        (entry.rollback)();

        if let Some(message) = error {
            self.notifier
                .notify(failure_notification(entry.action, &entry.target, message));
        }
    }

    pub fn is_pending(&self, action: OptimisticAction, target: &str) -> bool {
        self.ledger
            .iter()
            .any(|entry| entry.action == action && entry.target == target)
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.ledger
            .iter()
            .map(|entry| PendingAction {
                key: entry.key().clone(),
                action: entry.action,
                target: entry.target.clone(),
            })
            .collect()
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }
}

fn failure_notification(action: OptimisticAction, target: &str, message: &str) -> Notification {
    let message = Some(message);
    match action {
        OptimisticAction::Upload => Notification::upload_error(target, message),
        OptimisticAction::Delete => Notification::delete_error(target, message),
        OptimisticAction::Download => Notification::download_error(target, message),
        OptimisticAction::Rename => Notification::rename_error(target, message),
        OptimisticAction::Update => Notification::update_error(target, message),
    }
}

//! Application session: one set of services per running client

use crate::config::AppConfig;
use crate::events::EventBroadcaster;
use crate::logging::{LogConfig, LogGuard, init_logging};
use crate::notify::{EventNotifier, Notifier};
use crate::optimistic::{FileList, FileListService, OptimisticUpdateManager};
use crate::uploader::UploadManager;
use anyhow::{Context, Result};
use ossdrive_api::{Client, ClientConfig};
use std::sync::Arc;
use tracing::info;

/// Services shared by every view of one application session
pub struct Session {
    config: AppConfig,
    client: Arc<Client>,
    events: EventBroadcaster,
    updates: OptimisticUpdateManager,
    uploads: UploadManager<Client>,
    files: FileListService<Client>,
}

impl Session {
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = Client::new(ClientConfig::new(&config.api_base_url))
            .context("Failed to create API client")?;
        let client = Arc::new(client);

        let events = EventBroadcaster::default();
        let notifier: Arc<dyn Notifier> = Arc::new(EventNotifier::new(events.clone()));
        let updates = OptimisticUpdateManager::new(notifier.clone());

        let uploads = UploadManager::new(
            client.clone(),
            config.uploader.clone(),
            events.clone(),
            notifier,
        );
        let files = FileListService::new(client.clone(), FileList::default(), updates.clone());

        Ok(Self {
            config,
            client,
            events,
            updates,
            uploads,
            files,
        })
    }

    /// Initialise logging from `config`, then build the session. Keep the
    /// guard alive for as long as logs should be flushed.
    pub fn start(config: AppConfig) -> Result<(Self, LogGuard)> {
        let guard = init_logging(LogConfig::from(&config))?;
        let session = Self::new(config)?;
        info!(
            target: "main",
            api = %session.config.api_base_url,
            "Session started"
        );
        Ok((session, guard))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn updates(&self) -> &OptimisticUpdateManager {
        &self.updates
    }

    pub fn uploads(&self) -> &UploadManager<Client> {
        &self.uploads
    }

    pub fn files(&self) -> &FileListService<Client> {
        &self.files
    }
}

//! Queue store port definition.
//!
//! This port persists queue membership so that queued episodes survive
//! application restarts.
//!
//! # Design
//!
//! - Persists identity and the downloader flag only
//! - Status, progress and resolved media stay in memory
//! - Insertion order is the restore order

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::RepositoryError;
use crate::download::{AnimeRef, DownloadItem, DownloadKey, EpisodeRef};

/// The persisted form of a queued episode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDownload {
    pub anime: AnimeRef,
    pub episode: EpisodeRef,
    pub change_downloader: bool,
    pub queued_at: DateTime<Utc>,
}

impl StoredDownload {
    #[must_use]
    pub fn from_item(item: &DownloadItem) -> Self {
        Self {
            anime: item.anime.clone(),
            episode: item.episode.clone(),
            change_downloader: item.change_downloader,
            queued_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn key(&self) -> DownloadKey {
        DownloadKey::new(self.anime.id, self.episode.id)
    }

    #[must_use]
    pub fn into_item(self) -> DownloadItem {
        DownloadItem::new(self.anime, self.episode).with_change_downloader(self.change_downloader)
    }
}

/// Port for persisting queue membership.
///
/// Implemented by `epdl-db`; [`MemoryQueueStore`] serves tests and
/// ephemeral runs.
#[async_trait]
pub trait QueueStorePort: Send + Sync {
    /// Load every stored item in insertion order.
    async fn restore_all(&self) -> Result<Vec<StoredDownload>, RepositoryError>;

    /// Append items. Keys already stored are left in place.
    async fn add_all(&self, items: &[StoredDownload]) -> Result<(), RepositoryError>;

    /// Swap the whole stored queue for `items`, in that order. Either every
    /// record is replaced or the store is left as it was.
    async fn replace_all(&self, items: &[StoredDownload]) -> Result<(), RepositoryError>;

    async fn remove(&self, key: &DownloadKey) -> Result<(), RepositoryError>;

    async fn remove_all(&self, keys: &[DownloadKey]) -> Result<(), RepositoryError>;

    async fn clear(&self) -> Result<(), RepositoryError>;
}

/// In-memory queue store.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    items: Mutex<Vec<StoredDownload>>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, as if items had been queued in a previous run.
    #[must_use]
    pub fn with_items(items: Vec<StoredDownload>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub async fn keys(&self) -> Vec<DownloadKey> {
        self.items.lock().await.iter().map(StoredDownload::key).collect()
    }
}

#[async_trait]
impl QueueStorePort for MemoryQueueStore {
    async fn restore_all(&self) -> Result<Vec<StoredDownload>, RepositoryError> {
        Ok(self.items.lock().await.clone())
    }

    async fn add_all(&self, items: &[StoredDownload]) -> Result<(), RepositoryError> {
        let mut stored = self.items.lock().await;
        for item in items {
            if !stored.iter().any(|existing| existing.key() == item.key()) {
                stored.push(item.clone());
            }
        }
        Ok(())
    }

    async fn replace_all(&self, items: &[StoredDownload]) -> Result<(), RepositoryError> {
        let mut replacement: Vec<StoredDownload> = Vec::with_capacity(items.len());
        for item in items {
            if !replacement.iter().any(|existing| existing.key() == item.key()) {
                replacement.push(item.clone());
            }
        }
        *self.items.lock().await = replacement;
        Ok(())
    }

    async fn remove(&self, key: &DownloadKey) -> Result<(), RepositoryError> {
        self.items.lock().await.retain(|item| item.key() != *key);
        Ok(())
    }

    async fn remove_all(&self, keys: &[DownloadKey]) -> Result<(), RepositoryError> {
        self.items
            .lock()
            .await
            .retain(|item| !keys.contains(&item.key()));
        Ok(())
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        self.items.lock().await.clear();
        Ok(())
    }
}

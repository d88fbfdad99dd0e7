//! Queue snapshot DTO.
//!
//! Snapshots are immutable copies of the queue published to observers after
//! every membership or status change.

use super::events::{DownloadStatus, DownloadSummary};
use super::item::DownloadItem;
use super::types::{DownloadKey, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered copy of the queue contents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<DownloadItem>,
}

impl QueueSnapshot {
    #[must_use]
    pub const fn new(items: Vec<DownloadItem>) -> Self {
        Self { items }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, key: &DownloadKey) -> Option<&DownloadItem> {
        self.items.iter().find(|item| item.key() == *key)
    }

    /// Number of items with the given status.
    #[must_use]
    pub fn count(&self, status: DownloadStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    /// Number of items not yet in a terminal state.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|item| item.status.is_pending()).count()
    }

    /// Whether no item still needs a worker.
    #[must_use]
    pub fn all_finished(&self) -> bool {
        self.pending_count() == 0
    }

    /// The first `limit` non-terminal items in queue order.
    #[must_use]
    pub fn eligible(&self, limit: usize) -> Vec<DownloadKey> {
        self.items
            .iter()
            .filter(|item| item.status.is_pending())
            .take(limit)
            .map(DownloadItem::key)
            .collect()
    }

    /// Item count per source, used for oversize warnings.
    #[must_use]
    pub fn per_source_counts(&self) -> HashMap<SourceId, usize> {
        let mut counts = HashMap::new();
        for item in &self.items {
            *counts.entry(item.source_id()).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<DownloadSummary> {
        self.items.iter().map(DownloadItem::summary).collect()
    }
}

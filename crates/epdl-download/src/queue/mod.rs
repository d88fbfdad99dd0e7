//! Download queue management.
//!
//! This module provides a pure state machine for the download queue.
//! No I/O is performed here; [`PersistentQueue`] wraps it with the store
//! write-through and change notification.
//!
//! # Design
//!
//! - Pure synchronous state machine (no async, no IO, no tracing)
//! - Insertion order is scheduling order
//! - At most one item per `(anime, episode)` key
//! - Removal is deliberate: removed items report `NotDownloaded`, never `Error`

mod persistent;

use indexmap::IndexMap;

use epdl_core::{DownloadItem, DownloadKey, DownloadStatus, QueueSnapshot, ResolvedMedia};

pub use persistent::PersistentQueue;

/// Result of a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub key: DownloadKey,
    pub from: DownloadStatus,
    pub to: DownloadStatus,
}

/// Ordered, de-duplicated set of download items.
///
/// This is a sync type with no internal locking; the caller
/// ([`PersistentQueue`]) is responsible for synchronization.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    items: IndexMap<DownloadKey, DownloadItem>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &DownloadKey) -> bool {
        self.items.contains_key(key)
    }

    /// Keys in `items` not already queued, first occurrence wins.
    pub fn filter_new(&self, items: Vec<DownloadItem>) -> Vec<DownloadItem> {
        let mut fresh: IndexMap<DownloadKey, DownloadItem> = IndexMap::new();
        for item in items {
            let key = item.key();
            if !self.items.contains_key(&key) && !fresh.contains_key(&key) {
                fresh.insert(key, item);
            }
        }
        fresh.into_values().collect()
    }

    /// Append items as `Queued`, skipping keys already present.
    ///
    /// Returns the items actually added.
    pub fn append(&mut self, items: Vec<DownloadItem>) -> Vec<DownloadItem> {
        let mut added = Vec::new();
        for mut item in self.filter_new(items) {
            item.status = DownloadStatus::Queued;
            item.error = None;
            item.reset_progress();
            self.items.insert(item.key(), item.clone());
            added.push(item);
        }
        added
    }

    /// Remove one item. Missing keys are a no-op.
    pub fn remove(&mut self, key: &DownloadKey) -> Option<DownloadItem> {
        self.items.shift_remove(key).map(release)
    }

    /// Empty the queue, returning what was in it.
    pub fn clear(&mut self) -> Vec<DownloadItem> {
        self.items.drain(..).map(|(_, item)| release(item)).collect()
    }

    /// Move one item to `status`. Returns the transition when the status
    /// actually changed.
    pub fn set_status(&mut self, key: &DownloadKey, status: DownloadStatus) -> Option<Transition> {
        let item = self.items.get_mut(key)?;
        let from = item.status;
        if from == status {
            return None;
        }
        item.status = status;
        if status != DownloadStatus::Error {
            item.error = None;
        }
        if status == DownloadStatus::Queued {
            item.reset_progress();
        }
        Some(Transition {
            key: *key,
            from,
            to: status,
        })
    }

    /// Mark an item failed with a user-facing message.
    pub fn fail(&mut self, key: &DownloadKey, message: impl Into<String>) -> Option<Transition> {
        let transition = self.set_status(key, DownloadStatus::Error);
        if let Some(item) = self.items.get_mut(key) {
            item.error = Some(message.into());
            item.speed.clear();
        }
        transition
    }

    /// Every item not yet downloaded becomes `Queued`.
    pub fn queue_all_pending(&mut self) -> Vec<Transition> {
        let keys: Vec<DownloadKey> = self
            .items
            .values()
            .filter(|item| item.status != DownloadStatus::Downloaded)
            .map(DownloadItem::key)
            .collect();
        keys.iter()
            .filter_map(|key| self.set_status(key, DownloadStatus::Queued))
            .collect()
    }

    /// Every `Downloading` item moves to `to`.
    pub fn demote_downloading(&mut self, to: DownloadStatus) -> Vec<Transition> {
        let keys: Vec<DownloadKey> = self
            .items
            .values()
            .filter(|item| item.status == DownloadStatus::Downloading)
            .map(DownloadItem::key)
            .collect();
        keys.iter()
            .filter_map(|key| self.set_status(key, to))
            .collect()
    }

    pub fn set_resolved(&mut self, key: &DownloadKey, media: ResolvedMedia) {
        if let Some(item) = self.items.get_mut(key) {
            item.resolved = Some(media);
        }
    }

    /// Update display progress. Ignored unless the item is downloading.
    pub fn record_progress(
        &mut self,
        key: &DownloadKey,
        progress: u8,
        speed: String,
        segments: Option<(u32, u32)>,
    ) -> bool {
        match self.items.get_mut(key) {
            Some(item) if item.status == DownloadStatus::Downloading => {
                item.progress = progress.min(100);
                item.speed = speed;
                if let Some((done, total)) = segments {
                    item.downloaded_segments = Some(done);
                    item.total_segments = Some(total);
                }
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::new(self.items.values().cloned().collect())
    }
}

/// Items leaving the queue stop being pending.
fn release(mut item: DownloadItem) -> DownloadItem {
    if matches!(
        item.status,
        DownloadStatus::Queued | DownloadStatus::Downloading
    ) {
        item.status = DownloadStatus::NotDownloaded;
    }
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use epdl_core::{AnimeId, AnimeRef, EpisodeId, EpisodeRef, SourceId};

    fn item(anime: i64, episode: i64) -> DownloadItem {
        DownloadItem::new(
            AnimeRef {
                id: AnimeId(anime),
                title: format!("Show {anime}"),
                source_id: SourceId(1),
                source_name: "src".to_string(),
            },
            EpisodeRef {
                id: EpisodeId(episode),
                name: format!("Episode {episode}"),
                scanlator: None,
                source_order: episode,
                url: format!("https://example.com/{anime}/{episode}.mp4"),
            },
        )
    }

    fn key(anime: i64, episode: i64) -> DownloadKey {
        DownloadKey::new(AnimeId(anime), EpisodeId(episode))
    }

    #[test]
    fn append_skips_duplicates_and_marks_queued() {
        let mut queue = DownloadQueue::new();
        let added = queue.append(vec![item(1, 1), item(1, 2), item(1, 1)]);
        assert_eq!(added.len(), 2);

        let again = queue.append(vec![item(1, 2), item(1, 3)]);
        assert_eq!(again.len(), 1);
        assert_eq!(queue.snapshot().len(), 3);
        assert!(queue
            .snapshot()
            .items
            .iter()
            .all(|i| i.status == DownloadStatus::Queued));
    }

    #[test]
    fn removal_resets_pending_status_and_missing_key_is_noop() {
        let mut queue = DownloadQueue::new();
        queue.append(vec![item(1, 1), item(1, 2)]);
        queue.set_status(&key(1, 1), DownloadStatus::Downloading);

        let removed = queue.remove(&key(1, 1)).unwrap();
        assert_eq!(removed.status, DownloadStatus::NotDownloaded);

        assert!(queue.remove(&key(9, 9)).is_none());
        assert_eq!(queue.snapshot().len(), 1);
    }

    #[test]
    fn removal_keeps_error_status_of_failed_items() {
        let mut queue = DownloadQueue::new();
        queue.append(vec![item(1, 1), item(1, 2), item(2, 1)]);
        queue.fail(&key(1, 2), "boom");

        let removed = queue.remove(&key(1, 2)).unwrap();
        assert_eq!(removed.status, DownloadStatus::Error);
        let keys: Vec<_> = queue.snapshot().items.iter().map(DownloadItem::key).collect();
        assert_eq!(keys, vec![key(1, 1), key(2, 1)]);
    }

    #[test]
    fn demote_and_requeue() {
        let mut queue = DownloadQueue::new();
        queue.append(vec![item(1, 1), item(1, 2), item(1, 3)]);
        queue.set_status(&key(1, 1), DownloadStatus::Downloading);
        queue.set_status(&key(1, 2), DownloadStatus::Downloading);

        let demoted = queue.demote_downloading(DownloadStatus::Error);
        assert_eq!(demoted.len(), 2);
        assert_eq!(queue.snapshot().count(DownloadStatus::Error), 2);

        let requeued = queue.queue_all_pending();
        assert_eq!(requeued.len(), 2);
        assert_eq!(queue.snapshot().count(DownloadStatus::Queued), 3);
    }

    #[test]
    fn set_status_reports_only_real_changes() {
        let mut queue = DownloadQueue::new();
        queue.append(vec![item(1, 1)]);
        assert!(queue.set_status(&key(1, 1), DownloadStatus::Queued).is_none());
        let transition = queue
            .set_status(&key(1, 1), DownloadStatus::Downloading)
            .unwrap();
        assert_eq!(transition.from, DownloadStatus::Queued);
    }

    #[test]
    fn progress_only_recorded_while_downloading() {
        let mut queue = DownloadQueue::new();
        queue.append(vec![item(1, 1)]);
        assert!(!queue.record_progress(&key(1, 1), 50, "1 B/s".into(), None));

        queue.set_status(&key(1, 1), DownloadStatus::Downloading);
        assert!(queue.record_progress(&key(1, 1), 150, "1 B/s".into(), Some((3, 10))));
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.items[0].progress, 100);
        assert_eq!(snapshot.items[0].total_segments, Some(10));
    }
}

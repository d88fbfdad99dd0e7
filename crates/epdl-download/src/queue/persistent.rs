//! Write-through, observable wrapper around [`DownloadQueue`].
//!
//! Membership changes hit the store first and are applied in memory only
//! when the store accepted them, all under one lock, so memory and disk
//! never diverge. Every membership or status change publishes a fresh
//! [`QueueSnapshot`] on a watch channel the scheduler listens to.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::debug;

use epdl_core::ports::{DownloadEventEmitterPort, QueueStorePort, StoredDownload};
use epdl_core::{
    DownloadError, DownloadEvent, DownloadItem, DownloadKey, DownloadStatus, QueueSnapshot,
    ResolvedMedia,
};

use super::{DownloadQueue, Transition};

struct Inner {
    state: Mutex<DownloadQueue>,
    store: Arc<dyn QueueStorePort>,
    snapshots: watch::Sender<QueueSnapshot>,
    emitter: Box<dyn DownloadEventEmitterPort>,
}

#[derive(Clone)]
pub struct PersistentQueue {
    inner: Arc<Inner>,
}

impl PersistentQueue {
    pub fn new(store: Arc<dyn QueueStorePort>, emitter: Box<dyn DownloadEventEmitterPort>) -> Self {
        let (snapshots, _) = watch::channel(QueueSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DownloadQueue::new()),
                store,
                snapshots,
                emitter,
            }),
        }
    }

    /// Load persisted items into memory as `Queued`.
    pub async fn restore(&self) -> Result<usize, DownloadError> {
        let stored = self.inner.store.restore_all().await?;
        let mut state = self.inner.state.lock().await;
        let added = state.append(stored.into_iter().map(StoredDownload::into_item).collect());
        debug!(count = added.len(), "restored download queue");
        self.publish(&state, &[]);
        Ok(added.len())
    }

    /// Append items not already queued. Returns the items added.
    pub async fn append(&self, items: Vec<DownloadItem>) -> Result<Vec<DownloadItem>, DownloadError> {
        let mut state = self.inner.state.lock().await;
        let fresh = state.filter_new(items);
        if fresh.is_empty() {
            return Ok(Vec::new());
        }
        let records: Vec<StoredDownload> = fresh.iter().map(StoredDownload::from_item).collect();
        self.inner.store.add_all(&records).await?;

        let added = state.append(fresh);
        self.publish(&state, &[]);
        Ok(added)
    }

    /// Remove the given keys. Keys not in the queue are ignored.
    pub async fn remove(&self, keys: &[DownloadKey]) -> Result<Vec<DownloadItem>, DownloadError> {
        let mut state = self.inner.state.lock().await;
        let present: Vec<DownloadKey> = keys.iter().filter(|k| state.contains(k)).copied().collect();
        if present.is_empty() {
            return Ok(Vec::new());
        }
        self.inner.store.remove_all(&present).await?;

        let removed: Vec<DownloadItem> = present.iter().filter_map(|k| state.remove(k)).collect();
        self.publish_removed(&state, &removed);
        Ok(removed)
    }

    /// Remove every item matching `predicate`.
    pub async fn remove_where(
        &self,
        predicate: impl Fn(&DownloadItem) -> bool + Send,
    ) -> Result<Vec<DownloadItem>, DownloadError> {
        let keys: Vec<DownloadKey> = {
            let state = self.inner.state.lock().await;
            state
                .snapshot()
                .items
                .iter()
                .filter(|item| predicate(item))
                .map(DownloadItem::key)
                .collect()
        };
        self.remove(&keys).await
    }

    /// Drop a finished item: it leaves the queue as `Downloaded`.
    pub async fn complete(&self, key: &DownloadKey) -> Result<(), DownloadError> {
        let mut state = self.inner.state.lock().await;
        if !state.contains(key) {
            return Ok(());
        }
        self.inner.store.remove(key).await?;

        let transition = state.set_status(key, DownloadStatus::Downloaded);
        state.remove(key);
        let transitions: Vec<Transition> = transition.into_iter().collect();
        self.publish(&state, &transitions);
        Ok(())
    }

    pub async fn clear(&self) -> Result<Vec<DownloadItem>, DownloadError> {
        let mut state = self.inner.state.lock().await;
        self.inner.store.clear().await?;
        let removed = state.clear();
        self.publish_removed(&state, &removed);
        Ok(removed)
    }

    /// Replace the queue wholesale, persisting the new order.
    pub async fn replace(&self, items: Vec<DownloadItem>) -> Result<(), DownloadError> {
        let mut state = self.inner.state.lock().await;
        let mut staged = DownloadQueue::new();
        staged.append(items);
        let records: Vec<StoredDownload> = staged
            .snapshot()
            .items
            .iter()
            .map(StoredDownload::from_item)
            .collect();

        self.inner.store.replace_all(&records).await?;

        *state = staged;
        self.publish(&state, &[]);
        Ok(())
    }

    pub async fn set_status(&self, key: &DownloadKey, status: DownloadStatus) -> bool {
        let mut state = self.inner.state.lock().await;
        let transitions: Vec<Transition> = state.set_status(key, status).into_iter().collect();
        self.publish_if_changed(&state, &transitions)
    }

    pub async fn fail(&self, key: &DownloadKey, message: impl Into<String> + Send) -> bool {
        let mut state = self.inner.state.lock().await;
        let transitions: Vec<Transition> = state.fail(key, message).into_iter().collect();
        self.publish_if_changed(&state, &transitions)
    }

    pub async fn queue_all_pending(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let transitions = state.queue_all_pending();
        self.publish_if_changed(&state, &transitions);
        transitions.len()
    }

    pub async fn demote_downloading(&self, to: DownloadStatus) -> usize {
        let mut state = self.inner.state.lock().await;
        let transitions = state.demote_downloading(to);
        self.publish_if_changed(&state, &transitions);
        transitions.len()
    }

    /// Cache resolved media on the item. Not published.
    pub async fn set_resolved(&self, key: &DownloadKey, media: ResolvedMedia) {
        self.inner.state.lock().await.set_resolved(key, media);
    }

    /// Update display progress. Not published; observers get progress events.
    pub async fn record_progress(
        &self,
        key: &DownloadKey,
        progress: u8,
        speed: String,
        segments: Option<(u32, u32)>,
    ) -> bool {
        self.inner
            .state
            .lock()
            .await
            .record_progress(key, progress, speed, segments)
    }

    /// Current state, progress included.
    pub async fn snapshot(&self) -> QueueSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    /// Watch membership and status changes.
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.inner.snapshots.subscribe()
    }

    fn publish_if_changed(&self, state: &DownloadQueue, transitions: &[Transition]) -> bool {
        if transitions.is_empty() {
            return false;
        }
        self.publish(state, transitions);
        true
    }

    fn publish_removed(&self, state: &DownloadQueue, removed: &[DownloadItem]) {
        for item in removed {
            self.inner.emitter.emit(DownloadEvent::StatusChanged {
                key: item.key(),
                status: item.status,
            });
        }
        self.publish(state, &[]);
    }

    fn publish(&self, state: &DownloadQueue, transitions: &[Transition]) {
        for transition in transitions {
            self.inner.emitter.emit(DownloadEvent::StatusChanged {
                key: transition.key,
                status: transition.to,
            });
        }
        let snapshot = state.snapshot();
        self.inner.emitter.emit(DownloadEvent::QueueSnapshot {
            items: snapshot.summaries(),
        });
        self.inner.snapshots.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use epdl_core::ports::{MemoryQueueStore, RecordingDownloadEmitter};
    use epdl_core::{AnimeId, AnimeRef, EpisodeId, EpisodeRef, RepositoryError, SourceId};

    fn item(episode: i64) -> DownloadItem {
        DownloadItem::new(
            AnimeRef {
                id: AnimeId(1),
                title: "Show".to_string(),
                source_id: SourceId(7),
                source_name: "src".to_string(),
            },
            EpisodeRef {
                id: EpisodeId(episode),
                name: format!("Episode {episode}"),
                scanlator: None,
                source_order: episode,
                url: format!("https://example.com/{episode}.mp4"),
            },
        )
    }

    fn key(episode: i64) -> DownloadKey {
        DownloadKey::new(AnimeId(1), EpisodeId(episode))
    }

    struct FailingStore;

    #[async_trait]
    impl QueueStorePort for FailingStore {
        async fn restore_all(&self) -> Result<Vec<StoredDownload>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn add_all(&self, _items: &[StoredDownload]) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("disk full".into()))
        }
        async fn replace_all(&self, _items: &[StoredDownload]) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("disk full".into()))
        }
        async fn remove(&self, _key: &DownloadKey) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("disk full".into()))
        }
        async fn remove_all(&self, _keys: &[DownloadKey]) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("disk full".into()))
        }
        async fn clear(&self) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("disk full".into()))
        }
    }

    /// Clears fine, but rejects every write of new records.
    #[derive(Default)]
    struct ReadOnlyStore {
        inner: MemoryQueueStore,
    }

    #[async_trait]
    impl QueueStorePort for ReadOnlyStore {
        async fn restore_all(&self) -> Result<Vec<StoredDownload>, RepositoryError> {
            self.inner.restore_all().await
        }
        async fn add_all(&self, _items: &[StoredDownload]) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("read-only".into()))
        }
        async fn replace_all(&self, _items: &[StoredDownload]) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("read-only".into()))
        }
        async fn remove(&self, key: &DownloadKey) -> Result<(), RepositoryError> {
            self.inner.remove(key).await
        }
        async fn remove_all(&self, keys: &[DownloadKey]) -> Result<(), RepositoryError> {
            self.inner.remove_all(keys).await
        }
        async fn clear(&self) -> Result<(), RepositoryError> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn append_writes_through_to_store() {
        let store = Arc::new(MemoryQueueStore::new());
        let queue = PersistentQueue::new(store.clone(), Box::new(RecordingDownloadEmitter::new()));

        let added = queue.append(vec![item(1), item(2), item(1)]).await.unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(store.keys().await, vec![key(1), key(2)]);

        queue.remove(&[key(1), key(42)]).await.unwrap();
        assert_eq!(store.keys().await, vec![key(2)]);
        assert_eq!(queue.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_store_write_leaves_memory_untouched() {
        let queue = PersistentQueue::new(Arc::new(FailingStore), Box::new(RecordingDownloadEmitter::new()));
        let err = queue.append(vec![item(1)]).await.unwrap_err();
        assert!(matches!(err, DownloadError::Storage { .. }));
        assert!(queue.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn restore_marks_items_queued() {
        let stored = vec![
            StoredDownload::from_item(&item(3)),
            StoredDownload::from_item(&item(4)),
        ];
        let store = Arc::new(MemoryQueueStore::with_items(stored));
        let queue = PersistentQueue::new(store, Box::new(RecordingDownloadEmitter::new()));

        assert_eq!(queue.restore().await.unwrap(), 2);
        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot.count(DownloadStatus::Queued), 2);
    }

    #[tokio::test]
    async fn status_changes_publish_snapshots_but_progress_does_not() {
        let emitter = RecordingDownloadEmitter::new();
        let queue = PersistentQueue::new(Arc::new(MemoryQueueStore::new()), Box::new(emitter.clone()));
        let mut rx = queue.subscribe();

        queue.append(vec![item(1)]).await.unwrap();
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        assert!(queue.set_status(&key(1), DownloadStatus::Downloading).await);
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        assert!(queue.record_progress(&key(1), 40, "1 KB/s".into(), None).await);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(queue.snapshot().await.items[0].progress, 40);

        let status_events = emitter.matching(|e| {
            matches!(
                e,
                DownloadEvent::StatusChanged {
                    status: DownloadStatus::Downloading,
                    ..
                }
            )
        });
        assert_eq!(status_events.len(), 1);
    }

    #[tokio::test]
    async fn complete_removes_from_store_and_memory() {
        let store = Arc::new(MemoryQueueStore::new());
        let queue = PersistentQueue::new(store.clone(), Box::new(RecordingDownloadEmitter::new()));
        queue.append(vec![item(1), item(2)]).await.unwrap();

        queue.complete(&key(1)).await.unwrap();
        assert_eq!(store.keys().await, vec![key(2)]);
        let keys: Vec<DownloadKey> = queue.snapshot().await.items.iter().map(DownloadItem::key).collect();
        assert_eq!(keys, vec![key(2)]);
    }

    #[tokio::test]
    async fn replace_persists_new_order() {
        let store = Arc::new(MemoryQueueStore::new());
        let queue = PersistentQueue::new(store.clone(), Box::new(RecordingDownloadEmitter::new()));
        queue.append(vec![item(1), item(2)]).await.unwrap();

        queue.replace(vec![item(2), item(1)]).await.unwrap();
        assert_eq!(store.keys().await, vec![key(2), key(1)]);
    }

    #[tokio::test]
    async fn rejected_replace_keeps_memory_and_store_in_step() {
        let seeded = vec![
            StoredDownload::from_item(&item(1)),
            StoredDownload::from_item(&item(2)),
        ];
        let store = Arc::new(ReadOnlyStore {
            inner: MemoryQueueStore::with_items(seeded),
        });
        let queue = PersistentQueue::new(store.clone(), Box::new(RecordingDownloadEmitter::new()));
        queue.restore().await.unwrap();

        let err = queue.replace(vec![item(2), item(1), item(3)]).await.unwrap_err();
        assert!(matches!(err, DownloadError::Storage { .. }));

        let in_memory: Vec<DownloadKey> = queue.snapshot().await.items.iter().map(DownloadItem::key).collect();
        assert_eq!(in_memory, vec![key(1), key(2)]);
        assert_eq!(store.inner.keys().await, in_memory);
    }
}

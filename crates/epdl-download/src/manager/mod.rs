//! Download manager facade.
//!
//! [`DownloadManager`] owns the persistent queue and the scheduler run. It is
//! the only entry point callers use: enqueue, start, pause, stop, clear,
//! remove and reorder.
//!
//! # Architecture
//!
//! - **Queue**: single owned [`PersistentQueue`]; every mutation is written
//!   through to the store before it is visible
//! - **Scheduler**: one task per run, reacting to queue and preference changes
//! - **Workers**: one task per eligible item, progress through watch channels
//!
//! # Concurrency Model
//!
//! - `runner` guards the current scheduler run; a run is stopped by
//!   cancelling its token and awaiting the task, so no worker touches the
//!   queue after `pause`/`stop` return
//! - A draining run re-checks the queue under the `runner` lock before it
//!   declares itself finished, so `start` never misses freshly queued items

mod paths;
mod scheduler;
mod worker;

use std::cmp::Reverse;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use epdl_core::ports::{
    DownloadEventEmitterPort, EngineConfig, EnqueueOutcome, EnqueueRequest,
    ExternalDownloaderPort, QueueStorePort, RemuxToolkitPort, SourcePort, TorrentServicePort,
};
use epdl_core::{
    AnimeId, DownloadError, DownloadEvent, DownloadItem, DownloadKey, DownloadStatus,
    PreferencesHandle, QueueSnapshot,
};

use crate::governor::ResourceGovernor;
use crate::http::HttpBackend;
use crate::queue::PersistentQueue;
use crate::resolver::MediaResolver;

use scheduler::SchedulerExit;

pub use paths::{DownloadLayout, NO_MEDIA_FILE, TMP_DIR_SUFFIX, finalize, sanitize};
pub use worker::{JobOutcome, WorkerDeps, run_job};

/// Everything the manager is built from.
pub struct DownloadManagerDeps {
    pub store: Arc<dyn QueueStorePort>,
    pub source: Arc<dyn SourcePort>,
    pub emitter: Arc<dyn DownloadEventEmitterPort>,
    pub http: Arc<dyn HttpBackend>,
    pub remux: Arc<dyn RemuxToolkitPort>,
    pub torrent: Arc<dyn TorrentServicePort>,
    pub external: Arc<dyn ExternalDownloaderPort>,
    pub prefs: PreferencesHandle,
    pub config: EngineConfig,
}

/// Build a [`DownloadManager`] from its ports.
pub fn build_download_manager(deps: DownloadManagerDeps) -> DownloadManager {
    DownloadManager::new(deps)
}

/// One scheduler run.
struct Runner {
    stop: CancellationToken,
    done: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

impl Runner {
    fn is_active(&self) -> bool {
        !*self.done.borrow()
    }
}

struct Shared {
    deps: WorkerDeps,
    runner: Mutex<Option<Runner>>,
}

/// Public face of the download engine. Clones share one engine.
#[derive(Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

impl DownloadManager {
    pub fn new(deps: DownloadManagerDeps) -> Self {
        let config = Arc::new(deps.config);
        let queue = PersistentQueue::new(deps.store, deps.emitter.clone_box());
        let worker_deps = WorkerDeps {
            queue,
            resolver: MediaResolver::new(deps.source),
            emitter: deps.emitter,
            http: deps.http,
            governor: ResourceGovernor::new(config.fetch_slots, config.buffer_slots),
            remux: deps.remux,
            torrent: deps.torrent,
            external: deps.external,
            prefs: deps.prefs,
            layout: DownloadLayout::new(config.downloads_dir.clone()),
            config,
        };
        Self {
            shared: Arc::new(Shared {
                deps: worker_deps,
                runner: Mutex::new(None),
            }),
        }
    }

    fn deps(&self) -> &WorkerDeps {
        &self.shared.deps
    }

    pub fn layout(&self) -> &DownloadLayout {
        &self.deps().layout
    }

    pub fn governor(&self) -> &ResourceGovernor {
        &self.deps().governor
    }

    /// Load persisted items back into the queue. Returns how many were added.
    pub async fn restore(&self) -> Result<usize, DownloadError> {
        let count = self.deps().queue.restore().await?;
        info!(target: "epdl.download", count, "restored queued downloads");
        Ok(count)
    }

    /// Queue episodes of one series.
    ///
    /// Episodes already on disk or already queued are skipped; the rest are
    /// appended newest first. With `auto_start`, an idle engine is started.
    pub async fn enqueue(
        &self,
        request: EnqueueRequest,
        auto_start: bool,
    ) -> Result<EnqueueOutcome, DownloadError> {
        let requested = request.episodes.len();
        if requested == 0 {
            return Ok(EnqueueOutcome::default());
        }
        let queue = &self.deps().queue;
        let was_empty = queue.snapshot().await.is_empty();

        let mut items: Vec<DownloadItem> = request
            .episodes
            .into_iter()
            .map(|episode| {
                DownloadItem::new(request.anime.clone(), episode.episode)
                    .with_resolved(episode.resolved)
                    .with_change_downloader(episode.change_downloader)
            })
            .filter(|item| !self.layout().is_downloaded(item))
            .collect();
        items.sort_by_key(|item| Reverse(item.episode.source_order));

        let added = queue.append(items).await?.len();
        let mut outcome = EnqueueOutcome {
            added,
            skipped: requested - added,
            started: false,
        };
        debug!(anime = %request.anime.id, added, skipped = outcome.skipped, "enqueued episodes");

        if added > 0 && auto_start && (was_empty || !self.is_running().await) {
            self.warn_if_oversized().await;
            outcome.started = self.start().await;
        }
        Ok(outcome)
    }

    async fn warn_if_oversized(&self) {
        let config = &self.deps().config;
        let snapshot = self.deps().queue.snapshot().await;
        let largest_source = snapshot
            .per_source_counts()
            .into_values()
            .max()
            .unwrap_or(0);
        if snapshot.len() > config.queue_warning_threshold
            || largest_source > config.per_source_warning_threshold
        {
            warn!(target: "epdl.download", queued = snapshot.len(), largest_source, "download queue is very large");
            self.deps().emitter.emit(DownloadEvent::warning(format!(
                "{} episodes are queued. Downloading this many at once may get you blocked by the source.",
                snapshot.len()
            )));
        }
    }

    /// Start a scheduler run.
    ///
    /// Does nothing when a run is active or the queue is empty. Every item
    /// not yet downloaded is (re)queued, failed ones included. Returns
    /// whether anything was pending.
    pub async fn start(&self) -> bool {
        let mut runner = self.shared.runner.lock().await;
        if runner.as_ref().is_some_and(Runner::is_active) {
            return false;
        }
        let queue = &self.deps().queue;
        let snapshot = queue.snapshot().await;
        if snapshot.is_empty() {
            return false;
        }
        let pending = snapshot
            .items
            .iter()
            .any(|item| item.status != DownloadStatus::Downloaded);
        queue.queue_all_pending().await;

        *runner = Some(Self::launch(&self.shared));
        info!(target: "epdl.download", pending, "download queue started");
        pending
    }

    fn launch(shared: &Arc<Shared>) -> Runner {
        let stop = CancellationToken::new();
        let (done_tx, done) = watch::channel(false);
        let shared = Arc::clone(shared);
        let run_stop = stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                let exit = scheduler::run(shared.deps.clone(), run_stop.clone()).await;
                if exit == SchedulerExit::Stopped {
                    done_tx.send_replace(true);
                    return;
                }
                let guard = shared.runner.lock().await;
                if run_stop.is_cancelled() {
                    done_tx.send_replace(true);
                    return;
                }
                if shared.deps.queue.snapshot().await.pending_count() > 0 {
                    continue;
                }
                report_idle(&shared.deps, None).await;
                done_tx.send_replace(true);
                drop(guard);
                return;
            }
        });
        Runner { stop, done, handle }
    }

    /// Cancel the current run, if any, and wait for its workers to exit.
    async fn cancel_runner(&self) {
        let runner = self.shared.runner.lock().await.take();
        if let Some(runner) = runner {
            runner.stop.cancel();
            if let Err(e) = runner.handle.await {
                warn!(target: "epdl.download", error = %e, "scheduler task ended abnormally");
            }
        }
    }

    /// Cancel active downloads, keeping the queue. Items in flight go back
    /// to `Queued`.
    pub async fn pause(&self) {
        self.cancel_runner().await;
        let demoted = self
            .deps()
            .queue
            .demote_downloading(DownloadStatus::Queued)
            .await;
        info!(target: "epdl.download", demoted, "download queue paused");
    }

    /// Cancel active downloads, marking items in flight as failed.
    ///
    /// With a `reason` a warning is emitted; otherwise a paused or finished
    /// notification depending on what is left in the queue.
    pub async fn stop(&self, reason: Option<String>) {
        self.cancel_runner().await;
        self.deps()
            .queue
            .demote_downloading(DownloadStatus::Error)
            .await;
        report_idle(self.deps(), reason).await;
    }

    /// Cancel everything and empty the queue, in memory and in the store.
    pub async fn clear_queue(&self) -> Result<(), DownloadError> {
        self.cancel_runner().await;
        let removed = self.deps().queue.clear().await?;
        info!(target: "epdl.download", removed = removed.len(), "download queue cleared");
        Ok(())
    }

    /// Remove episodes by key. Unknown keys are ignored.
    pub async fn remove_episodes(&self, keys: &[DownloadKey]) -> Result<usize, DownloadError> {
        Ok(self.deps().queue.remove(keys).await?.len())
    }

    /// Remove every queued episode of one series.
    pub async fn remove_anime(&self, anime_id: AnimeId) -> Result<usize, DownloadError> {
        let removed = self
            .deps()
            .queue
            .remove_where(|item| item.anime.id == anime_id)
            .await?;
        Ok(removed.len())
    }

    /// Replace the queue with `items`, in that order.
    ///
    /// An empty list clears and stops the engine. Otherwise the engine is
    /// paused, the queue replaced, and a previously running engine restarted.
    pub async fn update_queue(&self, items: Vec<DownloadItem>) -> Result<(), DownloadError> {
        let current: Vec<DownloadKey> = self
            .snapshot()
            .await
            .items
            .iter()
            .map(DownloadItem::key)
            .collect();
        let requested: Vec<DownloadKey> = items.iter().map(DownloadItem::key).collect();
        if current == requested {
            return Ok(());
        }

        if items.is_empty() {
            self.clear_queue().await?;
            self.stop(None).await;
            return Ok(());
        }

        let was_running = self.is_running().await;
        self.pause().await;
        self.deps().queue.replace(items).await?;
        if was_running {
            self.start().await;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.deps().queue.snapshot().await
    }

    /// Watch queue membership and status changes.
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.deps().queue.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.shared
            .runner
            .lock()
            .await
            .as_ref()
            .is_some_and(Runner::is_active)
    }

    /// Wait until the current run, if any, has finished.
    pub async fn wait_idle(&self) {
        let done = self
            .shared
            .runner
            .lock()
            .await
            .as_ref()
            .map(|runner| runner.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

/// Tell observers the engine went idle.
async fn report_idle(deps: &WorkerDeps, reason: Option<String>) {
    if let Some(reason) = reason {
        warn!(target: "epdl.download", reason = %reason, "download queue stopped");
        deps.emitter.emit(DownloadEvent::warning(reason));
        return;
    }
    if deps.queue.snapshot().await.is_empty() {
        info!(target: "epdl.download", "all downloads finished");
        deps.emitter.emit(DownloadEvent::QueueFinished);
    } else {
        info!(target: "epdl.download", "download queue paused");
        deps.emitter.emit(DownloadEvent::Paused);
    }
}

//! Reactive scheduler.
//!
//! Watches queue snapshots and the concurrency preference, and keeps one
//! worker per eligible item: the first `concurrent_downloads` items that are
//! not yet terminal, in queue order. Bursts of changes are debounced so a
//! batch enqueue produces one reconciliation, not one per item.

use std::collections::HashMap;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use epdl_core::{DownloadKey, DownloadStatus};

use super::worker::{self, WorkerDeps};

/// Why a scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// No item is left that needs a worker.
    Drained,
    /// The run was cancelled from outside.
    Stopped,
}

struct RunningWorker {
    /// Distinguishes a respawned worker from a descheduled one still exiting.
    generation: u64,
    cancel: CancellationToken,
}

struct Scheduler {
    deps: WorkerDeps,
    stop: CancellationToken,
    workers: HashMap<DownloadKey, RunningWorker>,
    tasks: JoinSet<(DownloadKey, u64)>,
    next_generation: u64,
}

/// Run until the queue drains or `stop` fires. All workers have exited
/// when this returns.
pub async fn run(deps: WorkerDeps, stop: CancellationToken) -> SchedulerExit {
    let mut queue_rx = deps.queue.subscribe();
    let mut prefs_rx = deps.prefs.subscribe();
    let debounce = deps.config.debounce;
    let mut scheduler = Scheduler {
        deps,
        stop,
        workers: HashMap::new(),
        tasks: JoinSet::new(),
        next_generation: 0,
    };
    info!(target: "epdl.download", "scheduler started");

    loop {
        if scheduler.reconcile().await {
            scheduler.join_all().await;
            info!(target: "epdl.download", "queue drained");
            return SchedulerExit::Drained;
        }

        // Wait for a change, then for the changes to settle.
        tokio::select! {
            () = scheduler.stop.cancelled() => break,
            changed = queue_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = prefs_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(joined) = scheduler.tasks.join_next(), if !scheduler.tasks.is_empty() => {
                if let Ok(exited) = joined {
                    scheduler.forget(exited);
                }
            }
        }
        loop {
            let settled = tokio::select! {
                () = scheduler.stop.cancelled() => true,
                changed = queue_rx.changed() => changed.is_err(),
                changed = prefs_rx.changed() => changed.is_err(),
                () = tokio::time::sleep(debounce) => true,
            };
            if settled {
                break;
            }
        }
        if scheduler.stop.is_cancelled() {
            break;
        }
    }

    scheduler.shutdown().await;
    info!(target: "epdl.download", "scheduler stopped");
    SchedulerExit::Stopped
}

impl Scheduler {
    /// Bring running workers in line with the eligible set.
    ///
    /// Returns `true` when nothing in the queue needs a worker anymore.
    async fn reconcile(&mut self) -> bool {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Ok(exited) = joined {
                self.forget(exited);
            }
        }

        let limit = self.deps.prefs.current().effective_concurrency();
        let snapshot = self.deps.queue.snapshot().await;
        let eligible = snapshot.eligible(limit);

        let outside: Vec<DownloadKey> = self
            .workers
            .keys()
            .filter(|key| !eligible.contains(key))
            .copied()
            .collect();
        for key in outside {
            if let Some(worker) = self.workers.remove(&key) {
                worker.cancel.cancel();
            }
            let still_downloading = snapshot
                .get(&key)
                .is_some_and(|item| item.status == DownloadStatus::Downloading);
            if still_downloading {
                debug!(key = %key, "descheduled, returning item to the queue");
                self.deps.queue.set_status(&key, DownloadStatus::Queued).await;
            }
        }

        for key in &eligible {
            if self.workers.contains_key(key) {
                continue;
            }
            let Some(item) = snapshot.get(key).cloned() else {
                continue;
            };
            self.deps
                .queue
                .set_status(key, DownloadStatus::Downloading)
                .await;
            let cancel = self.stop.child_token();
            let generation = self.next_generation;
            self.next_generation += 1;
            self.workers.insert(
                *key,
                RunningWorker {
                    generation,
                    cancel: cancel.clone(),
                },
            );
            let deps = self.deps.clone();
            self.tasks.spawn(async move {
                (worker::supervise(item, deps, cancel).await, generation)
            });
            debug!(key = %key, generation, "worker started");
        }

        eligible.is_empty()
    }

    fn forget(&mut self, (key, generation): (DownloadKey, u64)) {
        if self
            .workers
            .get(&key)
            .is_some_and(|worker| worker.generation == generation)
        {
            self.workers.remove(&key);
        }
    }

    /// Wait for workers that are still finishing up.
    async fn join_all(&mut self) {
        while self.tasks.join_next().await.is_some() {}
        self.workers.clear();
    }

    async fn shutdown(&mut self) {
        for worker in self.workers.values() {
            worker.cancel.cancel();
        }
        self.join_all().await;
    }
}

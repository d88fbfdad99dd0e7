//! Per-item download worker.
//!
//! The worker owns one queued episode from `Downloading` until it is
//! finalized, handed off, fails or is cancelled. It writes progress only to
//! its [`ProgressReporter`]; a bridge task turns that into events.
//!
//! # Pipeline
//!
//! 1. Create the working directory
//! 2. Resolve media (cached descriptor or source plugin)
//! 3. Hand off to an external downloader when the preferences say so
//! 4. Accept an already fetched `.mkv`, else run the strategy with retries
//! 5. Finalize the working directory

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use epdl_core::ports::{
    DownloadEventEmitterPort, EngineConfig, ExternalDownloaderPort, HandoffRequest,
    RemuxToolkitPort, TorrentServicePort,
};
use epdl_core::{DownloadError, DownloadEvent, DownloadItem, DownloadKey, PreferencesHandle};

use super::paths::{self, DownloadLayout, sanitize};
use crate::governor::ResourceGovernor;
use crate::headers;
use crate::http::HttpBackend;
use crate::progress::{ProgressReporter, ProgressUpdate, SpeedMeter, format_speed};
use crate::queue::PersistentQueue;
use crate::resolver::MediaResolver;
use crate::strategy::{FetchContext, FetchStrategy};

const BRIDGE_TICK: Duration = Duration::from_millis(250);

/// Shared dependencies, cloned into every worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: PersistentQueue,
    pub resolver: MediaResolver,
    pub emitter: Arc<dyn DownloadEventEmitterPort>,
    pub http: Arc<dyn HttpBackend>,
    pub governor: ResourceGovernor,
    pub remux: Arc<dyn RemuxToolkitPort>,
    pub torrent: Arc<dyn TorrentServicePort>,
    pub external: Arc<dyn ExternalDownloaderPort>,
    pub prefs: PreferencesHandle,
    pub config: Arc<EngineConfig>,
    pub layout: DownloadLayout,
}

/// How a successful job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Fetched and moved to its final directory.
    Completed(PathBuf),
    /// Passed to an external program.
    HandedOff { program: Option<String> },
}

/// Run one job to completion.
///
/// Returns `Err(DownloadError::Cancelled)` when `cancel` fires; the caller
/// decides which status the item falls back to.
pub async fn run_job(
    item: &DownloadItem,
    deps: &WorkerDeps,
    progress: ProgressReporter,
    cancel: CancellationToken,
) -> Result<JobOutcome, DownloadError> {
    let key = item.key();
    let tmp_dir = deps.layout.tmp_dir(item);
    tokio::fs::create_dir_all(&tmp_dir).await?;

    let media = tokio::select! {
        () = cancel.cancelled() => return Err(DownloadError::Cancelled),
        media = deps.resolver.resolve(item) => media?,
    };
    deps.queue.set_resolved(&key, media.clone()).await;
    let request_headers = deps.resolver.request_headers(item, &media);

    let prefs = deps.prefs.current();
    if prefs.routes_externally(item.change_downloader) {
        let request = HandoffRequest {
            program: prefs.external_downloader.clone(),
            url: media.url.clone(),
            headers: headers::for_remux(&request_headers, &media.url),
            file_name: format!(
                "{}.mkv",
                sanitize(&format!("{} - {}", item.anime.title, item.episode.name))
            ),
            target_dir: deps.layout.anime_dir(item),
        };
        deps.external.hand_off(&request).await?;
        paths::remove_dir(&tmp_dir).await;
        info!(key = %key, program = ?request.program, "handed off to external downloader");
        return Ok(JobOutcome::HandedOff {
            program: request.program,
        });
    }

    let filename = DownloadLayout::file_name(item);
    let existing = tmp_dir.join(format!("{filename}.mkv"));
    if tokio::fs::try_exists(&existing).await? {
        remove_stale(&tmp_dir.join(format!("{filename}.tmp"))).await?;
        info!(key = %key, "found finished file, skipping fetch");
    } else {
        let ctx = FetchContext {
            key,
            anime_title: item.anime.title.clone(),
            episode_name: item.episode.name.clone(),
            media,
            headers: request_headers,
            tmp_dir: tmp_dir.clone(),
            filename,
            threads: prefs.download_threads,
            config: Arc::clone(&deps.config),
            http: Arc::clone(&deps.http),
            governor: deps.governor.clone(),
            remux: Arc::clone(&deps.remux),
            torrent: Arc::clone(&deps.torrent),
            progress,
            cancel: cancel.clone(),
        };
        fetch_with_retries(&ctx, deps).await?;
    }

    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    let path = paths::finalize(&tmp_dir, &deps.layout.final_dir(item)).await?;
    Ok(JobOutcome::Completed(path))
}

/// The attempt loop around one strategy.
async fn fetch_with_retries(ctx: &FetchContext, deps: &WorkerDeps) -> Result<PathBuf, DownloadError> {
    let strategy = FetchStrategy::select(&ctx.media.url);
    let attempts = deps.config.retry_attempts.max(1);
    debug!(key = %ctx.key, strategy = strategy.name(), "selected fetch strategy");

    let mut attempt = 1;
    loop {
        match strategy.fetch(ctx).await {
            Ok(path) => return Ok(path),
            Err(e) if e.is_cancelled() || ctx.cancel.is_cancelled() => {
                return Err(DownloadError::Cancelled);
            }
            Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
            Err(e) => {
                warn!(key = %ctx.key, attempt, max_attempts = attempts, error = %e, "download attempt failed");
                deps.emitter.emit(DownloadEvent::Retrying {
                    key: ctx.key,
                    attempt,
                    max_attempts: attempts,
                    message: e.user_message(),
                });
                tokio::select! {
                    () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
                    () = tokio::time::sleep(deps.config.retry_backoff) => {}
                }
                ctx.progress.reset();
                attempt += 1;
            }
        }
    }
}

async fn remove_stale(path: &std::path::Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Worker boundary: run the job, catch panics, and apply the outcome to
/// the queue. Never propagates a failure to the scheduler.
pub async fn supervise(item: DownloadItem, deps: WorkerDeps, cancel: CancellationToken) -> DownloadKey {
    let key = item.key();
    let (progress, progress_rx) = ProgressReporter::channel();
    let bridge_stop = CancellationToken::new();
    let bridge = spawn_progress_bridge(key, progress_rx, deps.clone(), bridge_stop.clone());

    let result = AssertUnwindSafe(run_job(&item, &deps, progress, cancel.clone()))
        .catch_unwind()
        .await;

    bridge_stop.cancel();
    if let Err(e) = bridge.await {
        debug!(key = %key, error = %e, "progress bridge ended abnormally");
    }

    match result {
        Ok(Ok(outcome)) => {
            if let Err(e) = deps.queue.complete(&key).await {
                warn!(key = %key, error = %e, "could not remove finished item from the queue");
            }
            match outcome {
                JobOutcome::Completed(path) => {
                    info!(key = %key, path = %path.display(), "download completed");
                    deps.emitter.emit(DownloadEvent::ItemCompleted { key, path });
                }
                JobOutcome::HandedOff { program } => {
                    deps.emitter.emit(DownloadEvent::HandedOff { key, program });
                }
            }
        }
        Ok(Err(DownloadError::Cancelled)) => {
            debug!(key = %key, "download cancelled");
        }
        Ok(Err(e)) if cancel.is_cancelled() => {
            debug!(key = %key, error = %e, "download stopped while cancelling");
        }
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "download failed");
            report_failure(&item, &deps, e.user_message()).await;
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            error!(key = %key, panic = %message, "download worker panicked");
            report_failure(&item, &deps, format!("Unexpected error: {message}")).await;
        }
    }
    key
}

async fn report_failure(item: &DownloadItem, deps: &WorkerDeps, message: String) {
    let key = item.key();
    deps.queue.fail(&key, message.clone()).await;
    deps.emitter.emit(DownloadEvent::Failed {
        key,
        anime_title: item.anime.title.clone(),
        episode_name: item.episode.name.clone(),
        message,
    });
}

/// Forward progress snapshots as throttled events until `stop` fires.
fn spawn_progress_bridge(
    key: DownloadKey,
    mut rx: watch::Receiver<ProgressUpdate>,
    deps: WorkerDeps,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(BRIDGE_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut meter = SpeedMeter::new();
        let mut last_seq = 0u64;

        loop {
            tokio::select! {
                biased;

                () = stop.cancelled() => break,

                _ = tick.tick() => {
                    let current = rx.borrow_and_update().clone();
                    if current.seq == last_seq {
                        continue;
                    }
                    last_seq = current.seq;
                    let speed = format_speed(meter.record(current.downloaded_bytes, Instant::now()));
                    let percent = current.percent();
                    let segments = current.downloaded_segments.zip(current.total_segments);

                    let live = deps
                        .queue
                        .record_progress(&key, percent, speed.clone(), segments)
                        .await;
                    if !live {
                        continue;
                    }
                    deps.emitter.emit(DownloadEvent::Progress {
                        key,
                        progress: percent,
                        speed,
                        downloaded_bytes: current.downloaded_bytes,
                        total_bytes: current.total_bytes,
                        downloaded_segments: current.downloaded_segments,
                        total_segments: current.total_segments,
                    });
                }
            }
        }
    })
}

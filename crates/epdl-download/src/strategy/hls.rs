//! Native HLS segment fetch.
//!
//! Segments download concurrently but reach the disk strictly in playlist
//! order through a [`WriteCursor`]. Each segment holds a buffer permit from
//! the moment its download starts until its bytes are written, so the
//! number of payloads in memory never exceeds the buffer gate, whatever the
//! concurrency. Buffer permits are taken in playlist order, which keeps the
//! next segment to be written always able to make progress.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use epdl_core::{DownloadError, HeaderList, IntegrityKind};

use super::{FetchContext, remove_quietly};
use super::write_cursor::WriteCursor;
use crate::governor::ResourceGovernor;
use crate::headers;
use crate::http::{HttpBackend, HttpRequest, send_within};
use crate::progress::ProgressReporter;

/// A parsed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playlist {
    /// Variant streams of a master playlist, with their declared bandwidth.
    Master(Vec<(u64, String)>),
    /// Absolute segment URLs in playback order.
    Media { segments: Vec<String>, encrypted: bool },
}

/// Parse an M3U8 body. Relative URIs are resolved against `base`.
pub fn parse_playlist(base: &Url, body: &str) -> Playlist {
    let mut variants = Vec::new();
    let mut segments = Vec::new();
    let mut pending_bandwidth: Option<u64> = None;
    let mut encrypted = false;

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending_bandwidth = Some(bandwidth_of(attrs));
            continue;
        }
        if let Some(attrs) = line.strip_prefix("#EXT-X-KEY:") {
            encrypted |= !attrs.contains("METHOD=NONE");
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let absolute = base
            .join(line)
            .map_or_else(|_| line.to_string(), String::from);
        match pending_bandwidth.take() {
            Some(bandwidth) => variants.push((bandwidth, absolute)),
            None => segments.push(absolute),
        }
    }

    if variants.is_empty() {
        Playlist::Media {
            segments,
            encrypted,
        }
    } else {
        Playlist::Master(variants)
    }
}

fn bandwidth_of(attrs: &str) -> u64 {
    attrs
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == "BANDWIDTH")
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

pub(super) async fn fetch(ctx: &FetchContext) -> Result<PathBuf, DownloadError> {
    let hls = &ctx.config.hls;
    let request_headers = headers::for_native_hls(&ctx.headers, &ctx.media.url);
    let segments = load_segments(ctx, &request_headers).await?;
    let total = segments.len();

    let concurrency = hls.concurrency.unwrap_or_else(|| dynamic_concurrency(ctx.threads));
    info!(key = %ctx.key, segments = total, concurrency, "starting native HLS fetch");

    let tmp_path = ctx.tmp_path();
    let file = File::create(&tmp_path).await?;
    let total_segments = u32::try_from(total).unwrap_or(u32::MAX);
    ctx.progress.set_segments(0, total_segments);

    let shared = Arc::new(SegmentShared {
        http: Arc::clone(&ctx.http),
        governor: ctx.governor.clone(),
        headers: request_headers,
        attempts: hls.segment_attempts.max(1),
        backoff_unit: hls.backoff_unit,
        read_timeout: ctx.config.read_timeout,
        writer: Mutex::new(SegmentWriter {
            file,
            cursor: WriteCursor::new(),
            written: 0,
            failed: 0,
            total_segments,
            progress: ctx.progress.clone(),
        }),
    });

    let slots = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for (index, url) in segments.into_iter().enumerate() {
        let buffer = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            permit = ctx.governor.acquire_buffer() => permit?,
        };
        let slot = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            permit = Arc::clone(&slots).acquire_owned() => permit
                .map_err(|_| DownloadError::other("segment slots closed"))?,
        };
        while let Some(joined) = tasks.try_join_next() {
            check_task(joined)?;
        }
        tasks.spawn(download_segment(Arc::clone(&shared), index, url, buffer, slot));
    }

    loop {
        let joined = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            joined = tasks.join_next() => joined,
        };
        match joined {
            Some(result) => check_task(result)?,
            None => break,
        }
    }

    let mut writer = shared.writer.lock().await;
    writer.file.flush().await?;
    writer.file.sync_all().await?;
    let failed = writer.failed;
    drop(writer);

    if u64::from(failed) * 100 > u64::from(hls.max_failed_segment_percent) * u64::from(total_segments) {
        remove_quietly(&tmp_path).await;
        return Err(DownloadError::integrity(
            IntegrityKind::TooManyFailedSegments,
            format!(
                "{failed} of {total} segments failed (limit {}%)",
                hls.max_failed_segment_percent
            ),
        ));
    }
    if failed > 0 {
        warn!(key = %ctx.key, failed, total, "accepting HLS download with missing segments");
    }

    let output = ctx.output_path();
    tokio::fs::rename(&tmp_path, &output).await?;
    Ok(output)
}

/// Fetch the manifest, following one master-playlist hop to its best variant.
async fn load_segments(
    ctx: &FetchContext,
    request_headers: &HeaderList,
) -> Result<Vec<String>, DownloadError> {
    let mut manifest_url = ctx.media.url.clone();
    for _ in 0..2 {
        let base = Url::parse(&manifest_url)
            .map_err(|e| DownloadError::invalid_input(format!("bad manifest URL: {e}")))?;
        let body = fetch_manifest(ctx, &manifest_url, request_headers).await?;
        match parse_playlist(&base, &body) {
            Playlist::Master(variants) => {
                let Some((bandwidth, url)) = variants.into_iter().max_by_key(|(bw, _)| *bw) else {
                    break;
                };
                debug!(key = %ctx.key, bandwidth, "selected HLS variant");
                manifest_url = url;
            }
            Playlist::Media { encrypted: true, .. } => {
                return Err(DownloadError::other(
                    "encrypted HLS is not supported natively",
                ));
            }
            Playlist::Media { segments, .. } if segments.is_empty() => break,
            Playlist::Media { segments, .. } => return Ok(segments),
        }
    }
    Err(DownloadError::other("no segments found in playlist"))
}

async fn fetch_manifest(
    ctx: &FetchContext,
    url: &str,
    request_headers: &HeaderList,
) -> Result<String, DownloadError> {
    let attempts = ctx.config.hls.manifest_attempts.max(1);
    let mut last_error = DownloadError::other("manifest was not requested");
    for attempt in 1..=attempts {
        ctx.check_cancelled()?;
        let result: Result<String, DownloadError> = async {
            let _fetch = ctx.governor.acquire_fetch().await?;
            let response = send_within(
                ctx.http.as_ref(),
                HttpRequest::get(url, request_headers.clone()),
                ctx.config.read_timeout,
            )
            .await?;
            if !response.is_success() {
                return Err(DownloadError::network_with_status(
                    format!("failed to fetch playlist: HTTP {}", response.status),
                    response.status,
                ));
            }
            response.text().await
        }
        .await;

        match result {
            Ok(body) => return Ok(body),
            Err(e) => {
                debug!(key = %ctx.key, attempt, error = %e, "manifest fetch failed");
                last_error = e;
                if attempt < attempts {
                    tokio::time::sleep(ctx.config.hls.backoff_unit * attempt).await;
                }
            }
        }
    }
    Err(last_error)
}

/// Segment concurrency scaled to the machine, never below the user's
/// thread preference or four, capped at 32.
fn dynamic_concurrency(threads: usize) -> usize {
    threads.max(4).max(num_cpus::get() * 2).min(32)
}

struct SegmentShared {
    http: Arc<dyn HttpBackend>,
    governor: ResourceGovernor,
    headers: HeaderList,
    attempts: u32,
    backoff_unit: Duration,
    read_timeout: Duration,
    writer: Mutex<SegmentWriter>,
}

/// A completed segment and the buffer permit its payload occupies.
type Buffered = (Option<Bytes>, OwnedSemaphorePermit);

struct SegmentWriter {
    file: File,
    cursor: WriteCursor<Buffered>,
    written: u32,
    failed: u32,
    total_segments: u32,
    progress: ProgressReporter,
}

impl SegmentWriter {
    /// Write every segment that is now contiguous with the file's end.
    async fn flush_ready(&mut self) -> Result<(), DownloadError> {
        while let Some((payload, permit)) = self.cursor.pop_ready() {
            if let Some(bytes) = payload {
                self.file.write_all(&bytes).await?;
                self.progress.add_bytes(bytes.len() as u64);
            }
            drop(permit);
            self.written += 1;
            self.progress.set_segments(self.written, self.total_segments);
        }
        Ok(())
    }
}

async fn download_segment(
    shared: Arc<SegmentShared>,
    index: usize,
    url: String,
    buffer: OwnedSemaphorePermit,
    slot: OwnedSemaphorePermit,
) -> Result<(), DownloadError> {
    let payload = fetch_segment(&shared, index, &url).await;
    drop(slot);

    let mut writer = shared.writer.lock().await;
    match payload {
        Ok(bytes) => writer.cursor.insert(index, (Some(bytes), buffer)),
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            warn!(segment = index, error = %e, "segment failed permanently, writing placeholder");
            writer.failed += 1;
            writer.cursor.insert(index, (None, buffer));
        }
    }
    writer.flush_ready().await
}

async fn fetch_segment(
    shared: &SegmentShared,
    index: usize,
    url: &str,
) -> Result<Bytes, DownloadError> {
    let mut last_error = DownloadError::other("segment was not requested");
    for attempt in 1..=shared.attempts {
        let result: Result<Bytes, DownloadError> = async {
            let _fetch = shared.governor.acquire_fetch().await?;
            let response = send_within(
                shared.http.as_ref(),
                HttpRequest::get(url, shared.headers.clone()),
                shared.read_timeout,
            )
            .await?;
            if !response.is_success() {
                return Err(DownloadError::network_with_status(
                    format!("segment {index} failed: HTTP {}", response.status),
                    response.status,
                ));
            }
            response.bytes().await
        }
        .await;

        match result {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if matches!(
                    e,
                    DownloadError::Network {
                        status_code: Some(403),
                        ..
                    }
                ) {
                    warn!(segment = index, attempt, "segment blocked (403)");
                } else {
                    debug!(segment = index, attempt, error = %e, "segment attempt failed");
                }
                last_error = e;
                if attempt < shared.attempts {
                    tokio::time::sleep(shared.backoff_unit * attempt).await;
                }
            }
        }
    }
    Err(last_error)
}

fn check_task(
    joined: Result<Result<(), DownloadError>, tokio::task::JoinError>,
) -> Result<(), DownloadError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(DownloadError::Cancelled),
        Err(e) => Err(DownloadError::other(format!("segment task panicked: {e}"))),
    }
}

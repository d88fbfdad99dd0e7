//! Parallel range fetch for progressive files.
//!
//! A leader request (`Range: bytes=0-`) discovers the size and streams the
//! first span straight into the file. The rest of the file is split into
//! fixed-size spans that workers claim through an atomic index and write at
//! their own offsets, so writes never overlap and need no reordering.
//!
//! A span that cannot be fetched after its retries fails the whole download:
//! a hole in a progressive container is corruption, not a tolerable loss.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use epdl_core::ports::RangeConfig;
use epdl_core::{DownloadError, HeaderList, IntegrityKind};

use super::{FetchContext, remove_quietly};
use crate::governor::ResourceGovernor;
use crate::headers;
use crate::http::{ByteRange, HttpBackend, HttpRequest, HttpResponse, send_within};
use crate::progress::ProgressReporter;

pub(super) async fn fetch(ctx: &FetchContext) -> Result<PathBuf, DownloadError> {
    let tmp_path = ctx.tmp_path();
    if let Err(e) = fetch_into(ctx, &tmp_path).await {
        if !e.is_cancelled() && !ctx.cancel.is_cancelled() {
            remove_quietly(&tmp_path).await;
        }
        return Err(e);
    }

    let output = ctx.output_path();
    tokio::fs::rename(&tmp_path, &output).await?;
    Ok(output)
}

/// Fill `tmp_path` completely or fail. A failed fill leaves the partial file
/// for the caller to discard.
async fn fetch_into(ctx: &FetchContext, tmp_path: &Path) -> Result<(), DownloadError> {
    let request_headers = headers::for_progressive(&ctx.headers);
    let mut file = File::create(tmp_path).await?;

    let leader = {
        let _fetch = ctx.governor.acquire_fetch().await?;
        let response = send_within(
            ctx.http.as_ref(),
            HttpRequest::get(ctx.media.url.clone(), request_headers.clone())
                .with_range(ByteRange::from(0)),
            ctx.config.read_timeout,
        )
        .await?;
        if !response.is_success() {
            return Err(DownloadError::network_with_status(
                format!("failed to start download: HTTP {}", response.status),
                response.status,
            ));
        }

        let total = response.total_length();
        ctx.progress.set_total_bytes(total);
        match total {
            Some(total) if response.is_partial() => {
                file.set_len(total).await?;
                let first_span = ctx.config.range.segment_size.min(total);
                let written = stream_into(ctx, &mut file, response, Some(first_span)).await?;
                Leader::Partial { total, written }
            }
            _ => {
                // No usable range support: take the whole body in order.
                let written = stream_into(ctx, &mut file, response, None).await?;
                Leader::Complete { expected: total, written }
            }
        }
    };

    match leader {
        Leader::Complete { expected, written } => {
            if let Some(expected) = expected.filter(|e| written < *e) {
                return Err(DownloadError::network(format!(
                    "connection closed after {written} of {expected} bytes"
                )));
            }
        }
        Leader::Partial { total, written } => {
            let spans = plan_spans(total, written, ctx.config.range.segment_size);
            if !spans.is_empty() {
                let workers = ctx
                    .threads
                    .max(ctx.config.range.min_workers)
                    .min(spans.len());
                info!(key = %ctx.key, total, spans = spans.len(), workers, "starting parallel range fetch");
                run_workers(ctx, tmp_path, &request_headers, spans, workers).await?;
            }
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

enum Leader {
    /// The leader fetched the whole body sequentially.
    Complete { expected: Option<u64>, written: u64 },
    /// The leader wrote the first `written` bytes of a `total`-byte file.
    Partial { total: u64, written: u64 },
}

/// Copy a response body into `file` at its current position, stopping after
/// `limit` bytes when given.
async fn stream_into(
    ctx: &FetchContext,
    file: &mut File,
    response: HttpResponse,
    limit: Option<u64>,
) -> Result<u64, DownloadError> {
    let mut body = response.body;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        ctx.check_cancelled()?;
        let chunk = chunk?;
        let take = match limit {
            Some(limit) => usize::try_from(limit - written)
                .unwrap_or(usize::MAX)
                .min(chunk.len()),
            None => chunk.len(),
        };
        file.write_all(&chunk[..take]).await?;
        written += take as u64;
        ctx.progress.add_bytes(take as u64);
        if limit.is_some_and(|limit| written >= limit) {
            break;
        }
    }
    Ok(written)
}

/// Inclusive spans still to fetch after the leader wrote `[0, written)`.
fn plan_spans(total: u64, written: u64, segment_size: u64) -> Vec<ByteRange> {
    let segment_size = segment_size.max(1);
    let mut spans = Vec::new();
    let first_end = segment_size.min(total);
    if written < first_end {
        spans.push(ByteRange::bounded(written, first_end - 1));
    }
    let mut start = first_end;
    while start < total {
        let end = (start + segment_size).min(total) - 1;
        spans.push(ByteRange::bounded(start, end));
        start = end + 1;
    }
    spans
}

struct RangeShared {
    url: String,
    path: PathBuf,
    headers: HeaderList,
    spans: Vec<ByteRange>,
    next: AtomicUsize,
    http: Arc<dyn HttpBackend>,
    governor: ResourceGovernor,
    config: RangeConfig,
    read_timeout: Duration,
    progress: ProgressReporter,
    /// Child of the download's token; cancelled when any span is lost.
    abort: CancellationToken,
}

async fn run_workers(
    ctx: &FetchContext,
    path: &Path,
    request_headers: &HeaderList,
    spans: Vec<ByteRange>,
    workers: usize,
) -> Result<(), DownloadError> {
    let shared = Arc::new(RangeShared {
        url: ctx.media.url.clone(),
        path: path.to_path_buf(),
        headers: request_headers.clone(),
        spans,
        next: AtomicUsize::new(0),
        http: Arc::clone(&ctx.http),
        governor: ctx.governor.clone(),
        config: ctx.config.range.clone(),
        read_timeout: ctx.config.read_timeout,
        progress: ctx.progress.clone(),
        abort: ctx.cancel.child_token(),
    });

    let mut tasks = JoinSet::new();
    for worker in 0..workers {
        tasks.spawn(range_worker(Arc::clone(&shared), worker));
    }

    let mut failure: Option<DownloadError> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(DownloadError::other(format!("range worker panicked: {e}"))),
        };
        if let Err(e) = result {
            shared.abort.cancel();
            if failure.as_ref().is_none_or(DownloadError::is_cancelled) {
                failure = Some(e);
            }
        }
    }

    if ctx.cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    failure.map_or(Ok(()), Err)
}

async fn range_worker(shared: Arc<RangeShared>, worker: usize) -> Result<(), DownloadError> {
    let mut file = OpenOptions::new().write(true).open(&shared.path).await?;
    loop {
        if shared.abort.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let index = shared.next.fetch_add(1, Ordering::Relaxed);
        let Some(span) = shared.spans.get(index).copied() else {
            return Ok(());
        };
        fetch_span(&shared, &mut file, span, worker).await?;
    }
}

/// Fetch one span with retries, resuming after partial reads.
async fn fetch_span(
    shared: &RangeShared,
    file: &mut File,
    span: ByteRange,
    worker: usize,
) -> Result<(), DownloadError> {
    let Some(end) = span.end else {
        return Err(DownloadError::invalid_input("range span must be bounded"));
    };
    let mut position = span.start;
    let attempts = shared.config.attempts.max(1);
    let mut last_error = DownloadError::other("span was not requested");

    for attempt in 1..=attempts {
        match write_span(shared, file, &mut position, end).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                debug!(worker, start = position, end, attempt, error = %e, "range attempt failed");
                last_error = e;
                if attempt < attempts {
                    tokio::select! {
                        () = shared.abort.cancelled() => return Err(DownloadError::Cancelled),
                        () = tokio::time::sleep(shared.config.backoff_unit * attempt) => {}
                    }
                }
            }
        }
    }

    warn!(worker, start = position, end, error = %last_error, "range span failed permanently");
    shared.abort.cancel();
    Err(DownloadError::integrity(
        IntegrityKind::IncompleteRanges,
        format!(
            "bytes {position}-{end} could not be fetched after {attempts} attempts: {}",
            last_error.user_message()
        ),
    ))
}

async fn write_span(
    shared: &RangeShared,
    file: &mut File,
    position: &mut u64,
    end: u64,
) -> Result<(), DownloadError> {
    let _fetch = tokio::select! {
        () = shared.abort.cancelled() => return Err(DownloadError::Cancelled),
        permit = shared.governor.acquire_fetch() => permit?,
    };
    let response = send_within(
        shared.http.as_ref(),
        HttpRequest::get(shared.url.clone(), shared.headers.clone())
            .with_range(ByteRange::bounded(*position, end)),
        shared.read_timeout,
    )
    .await?;
    if !response.is_partial() {
        return Err(DownloadError::network_with_status(
            format!("expected partial content, got HTTP {}", response.status),
            response.status,
        ));
    }

    file.seek(SeekFrom::Start(*position)).await?;
    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        if shared.abort.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let chunk = chunk?;
        let remaining = end + 1 - *position;
        let take = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(chunk.len());
        file.write_all(&chunk[..take]).await?;
        *position += take as u64;
        shared.progress.add_bytes(take as u64);
        if *position > end {
            file.flush().await?;
            return Ok(());
        }
    }
    file.flush().await?;
    Err(DownloadError::network(format!(
        "short read: stopped at byte {position} of span ending at {end}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_cover_the_file_after_the_leader() {
        let spans = plan_spans(10, 4, 4);
        assert_eq!(
            spans,
            vec![ByteRange::bounded(4, 7), ByteRange::bounded(8, 9)]
        );
    }

    #[test]
    fn short_leader_leaves_its_remainder_as_a_span() {
        let spans = plan_spans(10, 2, 4);
        assert_eq!(
            spans,
            vec![
                ByteRange::bounded(2, 3),
                ByteRange::bounded(4, 7),
                ByteRange::bounded(8, 9)
            ]
        );
    }

    #[test]
    fn small_file_needs_no_workers() {
        assert!(plan_spans(3, 3, 4).is_empty());
    }
}

//! Remux fallback: hand the streams to the external toolkit and copy them
//! into a Matroska container without re-encoding.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use epdl_core::ports::{RemuxJob, RemuxStats};
use epdl_core::{DownloadError, ResolvedMedia, Track};

use super::FetchContext;
use super::verify::{is_movie_like, verify_remux_output};
use crate::headers;

/// Input options that keep long network reads alive across hiccups.
const RECONNECT_OPTIONS: &[&str] = &[
    "-reconnect",
    "1",
    "-reconnect_at_eof",
    "1",
    "-reconnect_streamed",
    "1",
    "-reconnect_delay_max",
    "30",
    "-rw_timeout",
    "15000000",
    "-reconnect_on_network_error",
    "1",
    "-reconnect_on_http_error",
    "4xx,5xx",
];

fn is_http(url: &str) -> bool {
    url.starts_with("http")
}

fn push_input(args: &mut Vec<String>, url: &str, header_blob: &str) {
    if is_http(url) {
        args.extend(RECONNECT_OPTIONS.iter().map(ToString::to_string));
        if !header_blob.is_empty() {
            args.push("-headers".to_string());
            args.push(header_blob.to_string());
        }
    }
    args.push("-i".to_string());
    args.push(url.to_string());
}

fn push_metadata(args: &mut Vec<String>, tracks: &[Track], stream_type: &str) {
    for (index, track) in tracks.iter().enumerate() {
        args.push(format!("-metadata:s:{stream_type}:{index}"));
        args.push(format!("title={}", track.lang));
    }
}

/// Full argument list for one remux session.
///
/// Input order is video, subtitles, audio. The main input's own audio and
/// subtitle streams are mapped as optional so sources without them still
/// succeed.
pub fn build_remux_args(media: &ResolvedMedia, header_blob: &str, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-err_detect", "explode", "-thread_queue_size", "4096"]
        .iter()
        .map(ToString::to_string)
        .collect();

    push_input(&mut args, &media.url, header_blob);
    for track in &media.subtitle_tracks {
        push_input(&mut args, &track.url, header_blob);
    }
    for track in &media.audio_tracks {
        push_input(&mut args, &track.url, header_blob);
    }

    let subtitles = media.subtitle_tracks.len();
    args.extend(["-map".to_string(), "0:v".to_string()]);
    for index in 0..media.audio_tracks.len() {
        args.push("-map".to_string());
        args.push(format!("{}:a", index + 1 + subtitles));
    }
    args.extend(["-map".to_string(), "0:a?".to_string()]);
    for index in 0..subtitles {
        args.push("-map".to_string());
        args.push(format!("{}:s", index + 1));
    }
    args.extend(
        ["-map", "0:s?", "-map", "0:t?", "-f", "matroska", "-c:a", "copy", "-c:v", "copy", "-c:s", "copy"]
            .iter()
            .map(ToString::to_string),
    );

    push_metadata(&mut args, &media.subtitle_tracks, "s");
    push_metadata(&mut args, &media.audio_tracks, "a");

    args.push(output.to_string_lossy().into_owned());
    args
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn remux_percent(out_time_secs: f64, duration_secs: f64) -> Option<u8> {
    (duration_secs > 0.0 && out_time_secs > 0.0)
        .then(|| (out_time_secs * 100.0 / duration_secs).clamp(0.0, 100.0) as u8)
}

pub(super) async fn fetch(ctx: &FetchContext) -> Result<PathBuf, DownloadError> {
    let request_headers = headers::for_remux(&ctx.headers, &ctx.media.url);
    let header_blob = headers::to_header_blob(&request_headers);
    let tmp_path = ctx.tmp_path();
    remove_if_exists(&tmp_path).await?;

    // One fetch slot for the whole session; the toolkit owns its own I/O.
    let _session = tokio::select! {
        () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
        permit = ctx.governor.acquire_fetch() => permit?,
    };

    let blob = is_http(&ctx.media.url).then_some(header_blob.as_str());
    let duration = ctx
        .remux
        .probe_duration(&ctx.media.url, blob)
        .await
        .unwrap_or(0.0);
    info!(key = %ctx.key, duration_secs = duration, "starting remux session");

    let job = RemuxJob {
        args: build_remux_args(&ctx.media, &header_blob, &tmp_path),
        output: tmp_path.clone(),
    };
    let progress = ctx.progress.clone();
    let on_stats = move |stats: RemuxStats| {
        if let Some(percent) = remux_percent(stats.out_time_secs, duration) {
            progress.set_percent(percent);
        }
        progress.set_bytes(stats.total_size);
    };

    let outcome = tokio::select! {
        () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
        outcome = ctx.remux.remux(&job, &on_stats) => outcome,
    };
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            discard(&tmp_path).await;
            return Err(e);
        }
    };
    if !outcome.success {
        discard(&tmp_path).await;
        return Err(DownloadError::remux(match outcome.exit_code {
            Some(code) => format!("remux exited with code {code}"),
            None => "remux was terminated".to_string(),
        }));
    }

    let size = match tokio::fs::metadata(&tmp_path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Err(DownloadError::remux("remux output not found")),
    };
    let movie_like = is_movie_like(&ctx.anime_title, &ctx.episode_name);
    if let Err(e) = verify_remux_output(
        &ctx.config.verification,
        movie_like,
        duration,
        outcome.output_duration_secs,
        size,
    ) {
        warn!(key = %ctx.key, error = %e, "rejecting remux output");
        discard(&tmp_path).await;
        return Err(e);
    }

    let output = ctx.output_path();
    tokio::fs::rename(&tmp_path, &output).await?;
    Ok(output)
}

async fn remove_if_exists(path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        debug!(path = %path.display(), error = %e, "could not remove remux output");
    }
}

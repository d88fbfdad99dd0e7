//! Torrent adapter: turn a magnet/torrent reference into an HTTP play link
//! served by the local torrent service, then remux it.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use epdl_core::DownloadError;

use super::FetchContext;
use super::remux;

const READY_POLL: Duration = Duration::from_millis(250);

/// File index inside a multi-file torrent, from an `index=` query value.
pub fn torrent_file_index(link: &str) -> u32 {
    link.split_once("index=")
        .and_then(|(_, rest)| rest.split('&').next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

pub(super) async fn fetch(ctx: &FetchContext) -> Result<PathBuf, DownloadError> {
    let service = &ctx.torrent;
    service.start().await?;

    let wait = ctx.config.torrent_wait;
    let ready = tokio::time::timeout(wait, async {
        loop {
            if service.is_ready().await {
                return;
            }
            tokio::time::sleep(READY_POLL).await;
        }
    });
    tokio::select! {
        () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
        result = ready => result.map_err(|_| {
            DownloadError::torrent_unavailable(format!(
                "torrent service not ready after {}s",
                wait.as_secs()
            ))
        })?,
    }

    let title = if ctx.media.quality.is_empty() {
        ctx.anime_title.as_str()
    } else {
        ctx.media.quality.as_str()
    };
    let hash = service.add_torrent(&ctx.media.url, title).await?;
    let index = torrent_file_index(&ctx.media.url);
    let play_link = service.play_link(&hash, index);
    info!(key = %ctx.key, hash = %hash, index, "torrent resolved to play link");

    remux::fetch(&ctx.with_media_url(play_link)).await
}

//! Fetch strategies.
//!
//! The worker classifies the resolved media URL with [`FetchStrategy::select`]
//! and runs the chosen strategy. Every strategy writes into
//! `<tmp_dir>/<filename>.tmp` and, on success, renames it to
//! `<filename>.mkv` and returns that path.
//!
//! Strategies hold governor permits only around their smallest unit of work,
//! except remux sessions which hold one fetch slot for their whole duration.
//! Child tasks live in `JoinSet`s, so dropping a strategy future aborts them.

mod hls;
mod range;
mod remux;
mod torrent;
mod verify;
mod write_cursor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use epdl_core::ports::{EngineConfig, RemuxToolkitPort, TorrentServicePort};
use epdl_core::{DownloadError, DownloadKey, HeaderList, ResolvedMedia};

use crate::governor::ResourceGovernor;
use crate::http::HttpBackend;
use crate::progress::ProgressReporter;

pub use hls::{Playlist, parse_playlist};
pub use remux::build_remux_args;
pub use torrent::torrent_file_index;
pub use verify::{is_movie_like, verify_remux_output};
pub use write_cursor::WriteCursor;

/// Everything a strategy needs for one attempt.
#[derive(Clone)]
pub struct FetchContext {
    pub key: DownloadKey,
    pub anime_title: String,
    pub episode_name: String,
    pub media: ResolvedMedia,
    /// Request headers before per-strategy adaptation.
    pub headers: HeaderList,
    pub tmp_dir: PathBuf,
    /// Base file name, without extension.
    pub filename: String,
    /// User thread-count preference for range fetches.
    pub threads: usize,
    pub config: Arc<EngineConfig>,
    pub http: Arc<dyn HttpBackend>,
    pub governor: ResourceGovernor,
    pub remux: Arc<dyn RemuxToolkitPort>,
    pub torrent: Arc<dyn TorrentServicePort>,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

impl FetchContext {
    pub fn tmp_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("{}.tmp", self.filename))
    }

    pub fn output_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("{}.mkv", self.filename))
    }

    /// Same attempt, different media URL (torrent play links).
    fn with_media_url(&self, url: String) -> Self {
        let mut ctx = self.clone();
        ctx.media.url = url;
        ctx
    }

    fn check_cancelled(&self) -> Result<(), DownloadError> {
        if self.cancel.is_cancelled() {
            Err(DownloadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Parallel `Range` requests into a pre-sized file.
    ParallelRange,
    /// Native segment fetch with ordered writes, falling back to remux.
    NativeHls,
    /// External remux toolkit session.
    Remux,
    /// Torrent reference resolved to an HTTP play link, then remuxed.
    Torrent,
}

impl FetchStrategy {
    /// Classify a media URL.
    pub fn select(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("magnet") || lower.ends_with(".torrent") {
            Self::Torrent
        } else if lower.contains(".m3u8") || lower.contains(".mpd") {
            Self::NativeHls
        } else {
            Self::ParallelRange
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ParallelRange => "range",
            Self::NativeHls => "hls",
            Self::Remux => "remux",
            Self::Torrent => "torrent",
        }
    }

    /// Run the strategy. Returns the finished `.mkv` path.
    ///
    /// Cancelling `ctx.cancel` drops the attempt wherever it is waiting.
    pub async fn fetch(self, ctx: &FetchContext) -> Result<PathBuf, DownloadError> {
        ctx.check_cancelled()?;
        tokio::select! {
            biased;

            () = ctx.cancel.cancelled() => Err(DownloadError::Cancelled),
            result = self.run(ctx) => result,
        }
    }

    async fn run(self, ctx: &FetchContext) -> Result<PathBuf, DownloadError> {
        match self {
            Self::ParallelRange => range::fetch(ctx).await,
            Self::Remux => remux::fetch(ctx).await,
            Self::Torrent => torrent::fetch(ctx).await,
            Self::NativeHls => match hls::fetch(ctx).await {
                Err(e) if !e.is_cancelled() && !ctx.cancel.is_cancelled() => {
                    warn!(key = %ctx.key, error = %e, "native HLS failed, falling back to remux");
                    ctx.progress.reset();
                    remux::fetch(ctx).await
                }
                result => result,
            },
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "could not remove partial output");
    }
}

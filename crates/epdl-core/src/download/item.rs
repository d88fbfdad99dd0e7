//! The queued download record.

use super::events::{DownloadStatus, DownloadSummary};
use super::types::{AnimeRef, DownloadKey, EpisodeRef, ResolvedMedia, SourceId};
use serde::{Deserialize, Serialize};

/// A single episode tracked by the download queue.
///
/// Only identity and the downloader flag survive restarts; resolved media,
/// status and progress are runtime state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub anime: AnimeRef,
    pub episode: EpisodeRef,
    /// Inverts the user's internal/external downloader preference for this item.
    #[serde(default)]
    pub change_downloader: bool,
    /// Media descriptor, either supplied by the caller or resolved lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedMedia>,
    #[serde(default)]
    pub status: DownloadStatus,
    /// Percent complete, 0-100.
    #[serde(default)]
    pub progress: u8,
    /// Human readable transfer rate, empty when idle.
    #[serde(default)]
    pub speed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_segments: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_segments: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadItem {
    /// Create a fresh item in `NotDownloaded` state.
    #[must_use]
    pub fn new(anime: AnimeRef, episode: EpisodeRef) -> Self {
        Self {
            anime,
            episode,
            change_downloader: false,
            resolved: None,
            status: DownloadStatus::NotDownloaded,
            progress: 0,
            speed: String::new(),
            total_segments: None,
            downloaded_segments: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_resolved(mut self, media: Option<ResolvedMedia>) -> Self {
        self.resolved = media;
        self
    }

    #[must_use]
    pub const fn with_change_downloader(mut self, change_downloader: bool) -> Self {
        self.change_downloader = change_downloader;
        self
    }

    #[must_use]
    pub const fn key(&self) -> DownloadKey {
        DownloadKey::new(self.anime.id, self.episode.id)
    }

    #[must_use]
    pub const fn source_id(&self) -> SourceId {
        self.anime.source_id
    }

    /// Clear transient progress, keeping identity and resolved media.
    pub fn reset_progress(&mut self) {
        self.progress = 0;
        self.speed.clear();
        self.total_segments = None;
        self.downloaded_segments = None;
    }

    #[must_use]
    pub fn summary(&self) -> DownloadSummary {
        DownloadSummary {
            key: self.key(),
            anime_title: self.anime.title.clone(),
            episode_name: self.episode.name.clone(),
            status: self.status,
            progress: self.progress,
            speed: self.speed.clone(),
            error: self.error.clone(),
        }
    }
}

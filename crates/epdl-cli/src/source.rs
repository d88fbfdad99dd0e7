//! Source adapter for episodes added by URL.

use async_trait::async_trait;

use epdl_core::ports::SourcePort;
use epdl_core::{AnimeRef, DownloadError, EpisodeRef, ResolvedMedia};

/// Treats the episode URL as the media URL.
///
/// Episodes added from the command line carry their stream already
/// resolved. Resolution only happens for items restored from the queue
/// database, where request headers were not persisted.
#[derive(Debug, Clone, Default)]
pub struct DirectUrlSource;

#[async_trait]
impl SourcePort for DirectUrlSource {
    async fn fetch_media(
        &self,
        _anime: &AnimeRef,
        episode: &EpisodeRef,
    ) -> Result<Vec<ResolvedMedia>, DownloadError> {
        let url = episode.url.trim();
        if url.is_empty() {
            return Err(DownloadError::resolution_failed(format!(
                "{} has no media URL",
                episode.name
            )));
        }
        Ok(vec![ResolvedMedia::new(url)])
    }
}

//! Source plugin port.
//!
//! Source plugins turn an episode into one or more fetchable media
//! descriptors. The engine picks one with [`select_best_media`].
//!
//! [`select_best_media`]: crate::download::select_best_media

use async_trait::async_trait;

use crate::download::{AnimeRef, DownloadError, EpisodeRef, HeaderList, SourceId};
use crate::download::ResolvedMedia;

#[async_trait]
pub trait SourcePort: Send + Sync {
    /// List candidate streams for an episode.
    ///
    /// An empty list is a resolution failure for the caller.
    async fn fetch_media(
        &self,
        anime: &AnimeRef,
        episode: &EpisodeRef,
    ) -> Result<Vec<ResolvedMedia>, DownloadError>;

    /// Headers used when a stream carries none of its own.
    fn default_headers(&self, _source: SourceId) -> HeaderList {
        HeaderList::new()
    }
}

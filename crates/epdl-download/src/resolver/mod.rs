//! Media resolution through the owning source plugin.
//!
//! This module turns a queued episode into one playable [`ResolvedMedia`]
//! using the `SourcePort` abstraction.

use std::sync::Arc;

use tracing::debug;

use epdl_core::ports::SourcePort;
use epdl_core::{DownloadError, DownloadItem, HeaderList, ResolvedMedia, select_best_media};

/// Resolver backed by a source plugin.
#[derive(Clone)]
pub struct MediaResolver {
    source: Arc<dyn SourcePort>,
}

impl MediaResolver {
    pub fn new(source: Arc<dyn SourcePort>) -> Self {
        Self { source }
    }

    /// Media for `item`: the cached descriptor when present, otherwise the
    /// best candidate the source returns.
    ///
    /// Every failure is a [`DownloadError::ResolutionFailed`], which the
    /// attempt loop does not retry.
    pub async fn resolve(&self, item: &DownloadItem) -> Result<ResolvedMedia, DownloadError> {
        if let Some(media) = item.resolved.as_ref().filter(|m| !m.url.is_empty()) {
            return Ok(media.clone());
        }

        let candidates = self
            .source
            .fetch_media(&item.anime, &item.episode)
            .await
            .map_err(|e| match e {
                DownloadError::Cancelled | DownloadError::ResolutionFailed { .. } => e,
                other => DownloadError::resolution_failed(other.user_message()),
            })?;
        debug!(key = %item.key(), candidates = candidates.len(), "source returned media");

        select_best_media(candidates)
            .filter(|media| !media.url.is_empty())
            .ok_or_else(|| {
                DownloadError::resolution_failed(format!(
                    "no video available for {}",
                    item.episode.name
                ))
            })
    }

    /// Request headers for `media`: its own when it carries any, else the
    /// source's defaults.
    pub fn request_headers(&self, item: &DownloadItem, media: &ResolvedMedia) -> HeaderList {
        if media.headers.is_empty() {
            self.source.default_headers(item.source_id())
        } else {
            media.headers.clone()
        }
    }
}

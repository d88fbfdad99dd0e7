//! Core identifiers and media descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered list of HTTP header name/value pairs.
///
/// Order is preserved so that adapters forward headers exactly as the
/// source plugin produced them.
pub type HeaderList = Vec<(String, String)>;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(
    /// Identifier of the library item (series) that owns an episode.
    AnimeId
);
id_newtype!(
    /// Identifier of a single episode.
    EpisodeId
);
id_newtype!(
    /// Identifier of the content source (plugin) an item belongs to.
    SourceId
);

/// Unique key of a queued download.
///
/// An episode appears at most once in the queue; the pair of owning series
/// and episode identifies it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownloadKey {
    /// Owning library item.
    pub anime_id: AnimeId,
    /// Episode within that item.
    pub episode_id: EpisodeId,
}

impl DownloadKey {
    /// Create a key from raw identifiers.
    #[must_use]
    pub const fn new(anime_id: AnimeId, episode_id: EpisodeId) -> Self {
        Self {
            anime_id,
            episode_id,
        }
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.anime_id, self.episode_id)
    }
}

/// The library item (series) an episode belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeRef {
    pub id: AnimeId,
    pub title: String,
    pub source_id: SourceId,
    /// Display name of the source, used as the top-level download directory.
    pub source_name: String,
}

/// A single episode of a library item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub id: EpisodeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanlator: Option<String>,
    /// Position of the episode as reported by the source. Higher values come
    /// first in source listings.
    pub source_order: i64,
    /// Source-relative locator the plugin uses to resolve media.
    pub url: String,
}

/// An auxiliary audio or subtitle track muxed alongside the main video.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub url: String,
    pub lang: String,
}

impl Track {
    pub fn new(url: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            lang: lang.into(),
        }
    }
}

/// A fetchable media descriptor produced by a source plugin.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMedia {
    /// Direct URL, manifest URL, or torrent/magnet link.
    pub url: String,
    /// Human-readable quality label ("1080p", "Sub - 720p").
    pub quality: String,
    /// Request headers required by the host.
    #[serde(default)]
    pub headers: HeaderList,
    #[serde(default)]
    pub audio_tracks: Vec<Track>,
    #[serde(default)]
    pub subtitle_tracks: Vec<Track>,
    /// Marked by the plugin as the stream it recommends.
    #[serde(default)]
    pub preferred: bool,
}

impl ResolvedMedia {
    /// Create a descriptor with only a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_audio_track(mut self, track: Track) -> Self {
        self.audio_tracks.push(track);
        self
    }

    #[must_use]
    pub fn with_subtitle_track(mut self, track: Track) -> Self {
        self.subtitle_tracks.push(track);
        self
    }

    #[must_use]
    pub const fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    /// Whether the descriptor carries extra tracks that require muxing.
    #[must_use]
    pub fn has_extra_tracks(&self) -> bool {
        !self.audio_tracks.is_empty() || !self.subtitle_tracks.is_empty()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Pick the best candidate among the streams a plugin returned.
///
/// A stream flagged `preferred` wins; otherwise the highest numeric quality
/// (e.g. `1080p` over `720p`) is chosen, and ties keep the plugin's order.
pub fn select_best_media(candidates: Vec<ResolvedMedia>) -> Option<ResolvedMedia> {
    if let Some(index) = candidates.iter().position(|media| media.preferred) {
        return candidates.into_iter().nth(index);
    }

    let mut best: Option<(u32, ResolvedMedia)> = None;
    for media in candidates {
        let rank = quality_rank(&media.quality);
        match &best {
            Some((best_rank, _)) if *best_rank >= rank => {}
            _ => best = Some((rank, media)),
        }
    }
    best.map(|(_, media)| media)
}

/// Extract the vertical resolution from a quality label, or 0 when absent.
fn quality_rank(quality: &str) -> u32 {
    let bytes = quality.as_bytes();
    let mut rank = 0;
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index].is_ascii_digit() {
            let start = index;
            while index < bytes.len() && bytes[index].is_ascii_digit() {
                index += 1;
            }
            let followed_by_p = bytes
                .get(index)
                .is_some_and(|b| b.eq_ignore_ascii_case(&b'p'));
            if followed_by_p {
                if let Ok(value) = quality[start..index].parse::<u32>() {
                    rank = rank.max(value);
                }
            }
        } else {
            index += 1;
        }
    }
    rank
}

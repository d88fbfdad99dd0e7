//! Download domain types, events and errors.
//!
//! This module contains pure data types for the download system. No I/O,
//! networking, or runtime dependencies allowed.
//!
//! # Structure
//!
//! - `types` - Identifiers and media descriptors (`DownloadKey`, `ResolvedMedia`)
//! - `item` - The queued record (`DownloadItem`)
//! - `events` - Status lifecycle and notifications (`DownloadStatus`, `DownloadEvent`)
//! - `errors` - Error taxonomy (`DownloadError`)
//! - `queue` - Immutable queue snapshots (`QueueSnapshot`)

pub mod errors;
pub mod events;
pub mod item;
pub mod queue;
pub mod types;

pub use errors::{DownloadError, DownloadResult, IntegrityKind};
pub use events::{DownloadEvent, DownloadStatus, DownloadSummary};
pub use item::DownloadItem;
pub use queue::QueueSnapshot;
pub use types::{
    AnimeId, AnimeRef, DownloadKey, EpisodeId, EpisodeRef, HeaderList, ResolvedMedia, SourceId,
    Track, select_best_media,
};

//! Core domain types and port definitions for the episode download engine.
//!
//! This crate has no I/O of its own. Persistence, HTTP, subprocesses and
//! the engine itself live in adapter crates that depend on these types.

#![deny(unsafe_code)]

pub mod download;
pub mod ports;
pub mod settings;

pub use download::{
    AnimeId, AnimeRef, DownloadError, DownloadEvent, DownloadItem, DownloadKey, DownloadResult,
    DownloadStatus, DownloadSummary, EpisodeId, EpisodeRef, HeaderList, IntegrityKind,
    QueueSnapshot, ResolvedMedia, SourceId, Track, select_best_media,
};
pub use ports::{
    DownloadEventEmitterPort, EngineConfig, EnqueueOutcome, EnqueueRequest, EpisodeRequest,
    QueueStorePort, RepositoryError, SourcePort, StoredDownload,
};
pub use settings::{DownloadPreferences, PreferencesHandle, SettingsError};


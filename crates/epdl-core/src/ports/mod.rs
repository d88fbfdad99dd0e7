//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the engine expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx`, `reqwest` or subprocess types in any signature
//! - Repositories are intent-based, not generic CRUD
//! - Cancellation is expressed by dropping futures, never by leaking tokens

pub mod download_event_emitter;
pub mod download_manager;
pub mod external_downloader;
pub mod queue_store;
pub mod remux;
pub mod source;
pub mod torrent;

use thiserror::Error;

pub use download_event_emitter::{
    ChannelDownloadEmitter, DownloadEventEmitterPort, NoopDownloadEmitter,
    RecordingDownloadEmitter,
};
pub use download_manager::{
    EngineConfig, EnqueueOutcome, EnqueueRequest, EpisodeRequest, HlsConfig, RangeConfig,
    VerificationPolicy,
};
pub use external_downloader::{ExternalDownloaderPort, HandoffRequest, NoExternalDownloader};
pub use queue_store::{MemoryQueueStore, QueueStorePort, StoredDownload};
pub use remux::{RemuxJob, RemuxOutcome, RemuxStats, RemuxToolkitPort};
pub use source::SourcePort;
pub use torrent::{TorrentServicePort, UnavailableTorrentService};

/// Domain-specific errors for repository operations.
///
/// Abstracts storage implementation details (e.g., sqlx errors).
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage backend error (database, filesystem, etc.).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<RepositoryError> for crate::download::DownloadError {
    fn from(err: RepositoryError) -> Self {
        Self::storage(err.to_string())
    }
}

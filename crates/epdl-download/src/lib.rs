//! Episode download engine.
//!
//! Owns a persistent, ordered queue of episodes and downloads them with a
//! bounded number of concurrent workers. Each worker resolves the episode's
//! media through a source plugin, fetches it with the strategy its URL calls
//! for and moves the result into the library layout.
//!
//! # Modules
//!
//! - `manager` - the [`DownloadManager`] facade, scheduler and workers
//! - `queue` - in-memory queue with write-through persistence
//! - `strategy` - range, native HLS, remux and torrent fetches
//! - `governor` - process-wide fetch and buffer budgets
//! - `progress` - progress reporting, speed and throttling
//! - `toolkit` - ffmpeg/ffprobe adapter
//! - `torrent_server` - `TorrServer` HTTP adapter

// Re-export core types for convenience
pub use epdl_core::download::{
    DownloadError, DownloadEvent, DownloadItem, DownloadKey, DownloadStatus, DownloadSummary,
    QueueSnapshot, ResolvedMedia,
};
pub use epdl_core::ports::{
    EngineConfig, EnqueueOutcome, EnqueueRequest, EpisodeRequest, HlsConfig, RangeConfig,
    VerificationPolicy,
};

pub mod governor;
pub mod headers;
pub mod http;
pub mod progress;
pub mod strategy;

pub(crate) mod queue;
mod resolver;

pub use governor::ResourceGovernor;
pub use progress::ProgressThrottle;
pub use queue::PersistentQueue;
pub use resolver::MediaResolver;

// Subprocess and service adapters
pub mod toolkit;
pub mod torrent_server;

pub use toolkit::FfmpegToolkit;
pub use torrent_server::{DEFAULT_TORRSERVER_URL, TorrServerClient};

// Public API
mod manager;

pub use manager::{
    DownloadLayout, DownloadManager, DownloadManagerDeps, JobOutcome, NO_MEDIA_FILE,
    TMP_DIR_SUFFIX, WorkerDeps, build_download_manager, finalize, run_job, sanitize,
};

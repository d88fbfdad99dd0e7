//! Download manager request and configuration types.
//!
//! These are the inputs of the download facade. No cancellation tokens,
//! HTTP clients or subprocess types appear here.

use std::path::PathBuf;
use std::time::Duration;

use crate::download::{AnimeRef, EpisodeRef, ResolvedMedia};

/// Request to queue one episode.
#[derive(Debug, Clone)]
pub struct EpisodeRequest {
    pub episode: EpisodeRef,
    /// Media already resolved by the caller; skips the source plugin.
    pub resolved: Option<ResolvedMedia>,
    pub change_downloader: bool,
}

impl EpisodeRequest {
    #[must_use]
    pub const fn new(episode: EpisodeRef) -> Self {
        Self {
            episode,
            resolved: None,
            change_downloader: false,
        }
    }

    #[must_use]
    pub fn with_resolved(mut self, media: ResolvedMedia) -> Self {
        self.resolved = Some(media);
        self
    }

    #[must_use]
    pub const fn with_change_downloader(mut self, change_downloader: bool) -> Self {
        self.change_downloader = change_downloader;
        self
    }
}

/// Episodes of one library item to enqueue together.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub anime: AnimeRef,
    pub episodes: Vec<EpisodeRequest>,
}

impl EnqueueRequest {
    #[must_use]
    pub const fn new(anime: AnimeRef, episodes: Vec<EpisodeRequest>) -> Self {
        Self { anime, episodes }
    }
}

/// What an enqueue call actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub added: usize,
    /// Already queued or already on disk.
    pub skipped: usize,
    /// Whether this call started the engine.
    pub started: bool,
}

/// Tuning for the native HLS strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsConfig {
    pub manifest_attempts: u32,
    pub segment_attempts: u32,
    /// Attempt `n` waits `n * backoff_unit` before retrying.
    pub backoff_unit: Duration,
    /// Largest share of failed segments accepted, in percent.
    pub max_failed_segment_percent: u32,
    /// Fixed per-item segment concurrency; `None` derives it from the device.
    pub concurrency: Option<usize>,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            manifest_attempts: 3,
            segment_attempts: 5,
            backoff_unit: Duration::from_secs(1),
            max_failed_segment_percent: 20,
            concurrency: None,
        }
    }
}

/// Tuning for the parallel range strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeConfig {
    pub segment_size: u64,
    /// Lower bound on workers regardless of the thread preference.
    pub min_workers: usize,
    pub attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            segment_size: 4 * 1024 * 1024,
            min_workers: 8,
            attempts: 5,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Anti-trap thresholds for remuxed output.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPolicy {
    /// Probed durations at or below this are not trusted.
    pub min_trusted_duration_secs: f64,
    /// Output may be shorter than the source by this fraction.
    pub duration_tolerance: f64,
    /// Titles that look like movies must produce at least this much.
    pub movie_min_duration_secs: f64,
    /// Size floor for movie-like titles.
    pub movie_min_bytes: u64,
    /// Size floor for everything else.
    pub min_bytes: u64,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            min_trusted_duration_secs: 60.0,
            duration_tolerance: 0.05,
            movie_min_duration_secs: 3600.0,
            movie_min_bytes: 100 * 1024 * 1024,
            min_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Configuration for creating a download manager.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the on-disk library layout.
    pub downloads_dir: PathBuf,
    /// Concurrent network fetches across all items.
    pub fetch_slots: usize,
    /// Downloaded-but-unwritten segments across all items.
    pub buffer_slots: usize,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    /// Quiet window for coalescing queue and preference changes.
    pub debounce: Duration,
    pub queue_warning_threshold: usize,
    pub per_source_warning_threshold: usize,
    /// How long to wait for the torrent service to come up.
    pub torrent_wait: Duration,
    /// Longest silence tolerated from a server, for the response head and
    /// between body chunks.
    pub read_timeout: Duration,
    pub hls: HlsConfig,
    pub range: RangeConfig,
    pub verification: VerificationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            fetch_slots: 10,
            buffer_slots: 80,
            retry_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            debounce: Duration::from_millis(100),
            queue_warning_threshold: 500,
            per_source_warning_threshold: 500,
            torrent_wait: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            hls: HlsConfig::default(),
            range: RangeConfig::default(),
            verification: VerificationPolicy::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new(downloads_dir: PathBuf) -> Self {
        Self {
            downloads_dir,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_fetch_slots(mut self, slots: usize) -> Self {
        self.fetch_slots = slots;
        self
    }

    #[must_use]
    pub const fn with_buffer_slots(mut self, slots: usize) -> Self {
        self.buffer_slots = slots;
        self
    }

    /// Set the outer attempt count and the pause between attempts.
    #[must_use]
    pub const fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub const fn with_torrent_wait(mut self, wait: Duration) -> Self {
        self.torrent_wait = wait;
        self
    }

    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_hls(mut self, hls: HlsConfig) -> Self {
        self.hls = hls;
        self
    }

    #[must_use]
    pub fn with_range(mut self, range: RangeConfig) -> Self {
        self.range = range;
        self
    }

    #[must_use]
    pub fn with_verification(mut self, verification: VerificationPolicy) -> Self {
        self.verification = verification;
        self
    }
}

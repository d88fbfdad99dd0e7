//! Download events and the item status lifecycle.

use super::types::DownloadKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle status of a queued episode.
///
/// Variants are declared in their numeric order; `Ord` follows it, so
/// `status <= DownloadStatus::Downloading` selects the non-terminal states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Not scheduled. Items removed from the queue fall back here.
    #[default]
    NotDownloaded,
    /// Waiting for a worker.
    Queued,
    /// A worker currently owns the item.
    Downloading,
    /// Fetched and finalized.
    Downloaded,
    /// Failed after all retries.
    Error,
}

impl DownloadStatus {
    /// Numeric value exposed to consumers.
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::NotDownloaded => 0,
            Self::Queued => 1,
            Self::Downloading => 2,
            Self::Downloaded => 3,
            Self::Error => 4,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotDownloaded => "not_downloaded",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Error => "error",
        }
    }

    /// Whether the item still needs a worker (`NotDownloaded`, `Queued`, `Downloading`).
    #[must_use]
    pub const fn is_pending(self) -> bool {
        self.value() <= Self::Downloading.value()
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Downloaded | Self::Error)
    }
}

/// A summary of a queued episode (for snapshots and UI display).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSummary {
    pub key: DownloadKey,
    pub anime_title: String,
    pub episode_name: String,
    pub status: DownloadStatus,
    /// Percent complete, 0-100.
    pub progress: u8,
    pub speed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Single discriminated union for all engine notifications.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// Membership or status of the queue changed.
    QueueSnapshot { items: Vec<DownloadSummary> },

    /// One item changed status.
    StatusChanged {
        key: DownloadKey,
        status: DownloadStatus,
    },

    /// Throttled progress report for an item in flight.
    Progress {
        key: DownloadKey,
        progress: u8,
        speed: String,
        downloaded_bytes: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        downloaded_segments: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_segments: Option<u32>,
    },

    /// An attempt failed and another one will follow.
    Retrying {
        key: DownloadKey,
        attempt: u32,
        max_attempts: u32,
        message: String,
    },

    /// An item failed permanently.
    Failed {
        key: DownloadKey,
        anime_title: String,
        episode_name: String,
        message: String,
    },

    /// An item finished and was moved to its final directory.
    ItemCompleted { key: DownloadKey, path: PathBuf },

    /// An item was passed to an external download program.
    HandedOff {
        key: DownloadKey,
        #[serde(skip_serializing_if = "Option::is_none")]
        program: Option<String>,
    },

    /// Non-fatal notice (oversized queue, explicit stop reason).
    Warning { message: String },

    /// The scheduler stopped with items still pending.
    Paused,

    /// Every item in the queue reached a terminal state.
    QueueFinished,
}

impl DownloadEvent {
    /// Key of the item the event refers to, if any.
    #[must_use]
    pub const fn key(&self) -> Option<DownloadKey> {
        match self {
            Self::StatusChanged { key, .. }
            | Self::Progress { key, .. }
            | Self::Retrying { key, .. }
            | Self::Failed { key, .. }
            | Self::ItemCompleted { key, .. }
            | Self::HandedOff { key, .. } => Some(*key),
            Self::QueueSnapshot { .. } | Self::Warning { .. } | Self::Paused | Self::QueueFinished => {
                None
            }
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }
}

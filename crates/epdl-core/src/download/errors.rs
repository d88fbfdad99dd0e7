//! Download error types.
//!
//! These errors are serializable and do not carry external error types like
//! `std::io::Error`. For I/O errors, the kind and message are captured as
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which integrity rule a fetched artifact violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityKind {
    /// Output duration is shorter than the source duration.
    Truncated,
    /// Output is smaller than the minimum plausible size.
    Undersized,
    /// Too many HLS segments failed to download.
    TooManyFailedSegments,
    /// A byte range could not be fetched.
    IncompleteRanges,
}

impl fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Truncated => "truncated",
            Self::Undersized => "undersized",
            Self::TooManyFailedSegments => "too many failed segments",
            Self::IncompleteRanges => "incomplete ranges",
        };
        f.write_str(label)
    }
}

/// Error type for download operations.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadError {
    /// No usable media could be obtained from the source.
    #[error("Resolution failed: {message}")]
    ResolutionFailed { message: String },

    /// Network/HTTP error during a transfer.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// The fetched artifact failed verification.
    #[error("Integrity check failed ({kind}): {message}")]
    Integrity { kind: IntegrityKind, message: String },

    /// Local resource failure (directory creation, disk write).
    #[error("I/O error ({kind}): {message}")]
    Io { kind: String, message: String },

    /// The torrent streaming service did not become ready.
    #[error("Torrent service unavailable: {message}")]
    TorrentUnavailable { message: String },

    /// Moving the finished artifact into place failed.
    #[error("Finalization failed: {message}")]
    Finalization { message: String },

    /// The external downloader could not be launched.
    #[error("External downloader failed: {message}")]
    Handoff { message: String },

    /// The remux toolkit exited unsuccessfully.
    #[error("Remux failed: {message}")]
    Remux { message: String },

    /// The queue store rejected a write.
    #[error("Queue store error: {message}")]
    Storage { message: String },

    /// Caller supplied something unusable.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Download was cancelled by pause, stop or removal.
    #[error("Download cancelled")]
    Cancelled,

    /// General/uncategorized error.
    #[error("{message}")]
    Other { message: String },
}

impl DownloadError {
    pub fn resolution_failed(message: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn network_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Network {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn integrity(kind: IntegrityKind, message: impl Into<String>) -> Self {
        Self::Integrity {
            kind,
            message: message.into(),
        }
    }

    pub fn io(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error from a `std::io::Error`.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        let kind = err.kind();
        Self::Io {
            kind: format!("{kind:?}"),
            message: err.to_string(),
        }
    }

    pub fn torrent_unavailable(message: impl Into<String>) -> Self {
        Self::TorrentUnavailable {
            message: message.into(),
        }
    }

    pub fn finalization(message: impl Into<String>) -> Self {
        Self::Finalization {
            message: message.into(),
        }
    }

    pub fn handoff(message: impl Into<String>) -> Self {
        Self::Handoff {
            message: message.into(),
        }
    }

    pub fn remux(message: impl Into<String>) -> Self {
        Self::Remux {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the outer attempt loop should try again after this error.
    ///
    /// Cancellation, resolution failures, integrity violations and local
    /// resource errors are final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled
                | Self::ResolutionFailed { .. }
                | Self::Integrity { .. }
                | Self::Io { .. }
                | Self::InvalidInput { .. }
                | Self::Storage { .. }
        )
    }

    /// Convert to a user-friendly message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ResolutionFailed { message } => format!("Could not resolve a video: {message}"),
            Self::Network {
                message,
                status_code: Some(code),
            } => format!("Network error (HTTP {code}): {message}"),
            Self::Network { message, .. } => format!("Network error: {message}"),
            Self::Integrity { kind, message } => {
                format!("Downloaded file failed verification ({kind}): {message}")
            }
            Self::Io { message, .. } => format!("File operation failed: {message}"),
            Self::TorrentUnavailable { message } => {
                format!("Torrent service is not available: {message}")
            }
            Self::Finalization { message } => format!("Could not finish the download: {message}"),
            Self::Handoff { message } => format!("External downloader failed: {message}"),
            Self::Remux { message } => format!("ffmpeg failed: {message}"),
            Self::Storage { message } => format!("Could not save the download queue: {message}"),
            Self::InvalidInput { message } => message.clone(),
            Self::Cancelled => "Download was cancelled.".to_string(),
            Self::Other { message } => message.clone(),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io_error(&err)
    }
}

/// Convenience result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = DownloadError::from_io_error(&io_err);

        match err {
            DownloadError::Io { kind, message } => {
                assert_eq!(kind, "NotFound");
                assert!(message.contains("file not found"));
            }
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_error_serialization() {
        let err = DownloadError::network_with_status("timeout", 408);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("408"));

        let parsed: DownloadError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn test_retry_classification() {
        assert!(DownloadError::network("reset").is_retryable());
        assert!(DownloadError::remux("exit 1").is_retryable());
        assert!(DownloadError::torrent_unavailable("timeout").is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
        assert!(!DownloadError::integrity(IntegrityKind::Truncated, "short").is_retryable());
        assert!(!DownloadError::resolution_failed("no video").is_retryable());
        assert!(!DownloadError::io("PermissionDenied", "read-only").is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = DownloadError::integrity(IntegrityKind::Undersized, "12 bytes");
        assert_eq!(
            err.user_message(),
            "Downloaded file failed verification (undersized): 12 bytes"
        );
        let err = DownloadError::integrity(IntegrityKind::TooManyFailedSegments, "9 of 30");
        assert_eq!(
            err.user_message(),
            "Downloaded file failed verification (too many failed segments): 9 of 30"
        );
        assert!(DownloadError::Cancelled.is_cancelled());
    }
}

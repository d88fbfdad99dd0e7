//! External downloader hand-off port.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::download::{DownloadError, HeaderList};

/// Everything an external download program needs to take over an episode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffRequest {
    /// Program or package selected in preferences; `None` lets the adapter choose.
    pub program: Option<String>,
    pub url: String,
    pub headers: HeaderList,
    /// Suggested file name, `"<anime> - <episode>.mkv"`.
    pub file_name: String,
    pub target_dir: PathBuf,
}

impl HandoffRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait ExternalDownloaderPort: Send + Sync {
    /// Launch the external program. Success means it accepted the job.
    async fn hand_off(&self, request: &HandoffRequest) -> Result<(), DownloadError>;
}

/// Rejects every hand-off.
#[derive(Debug, Clone, Default)]
pub struct NoExternalDownloader;

#[async_trait]
impl ExternalDownloaderPort for NoExternalDownloader {
    async fn hand_off(&self, _request: &HandoffRequest) -> Result<(), DownloadError> {
        Err(DownloadError::handoff("no external downloader available"))
    }
}

//! Torrent streaming service port.
//!
//! The engine never speaks BitTorrent itself. A local streaming service
//! (TorrServer-compatible) accepts a magnet or `.torrent` link and exposes
//! the selected file as a plain HTTP stream, which is then remuxed.

use async_trait::async_trait;

use crate::download::DownloadError;

#[async_trait]
pub trait TorrentServicePort: Send + Sync {
    /// Ask the service to start. Returns once the start request is issued.
    async fn start(&self) -> Result<(), DownloadError>;

    /// Whether the service answers requests.
    async fn is_ready(&self) -> bool;

    /// Register a torrent and return its info hash.
    async fn add_torrent(&self, link: &str, title: &str) -> Result<String, DownloadError>;

    /// HTTP URL streaming the file at `index` of a registered torrent.
    fn play_link(&self, hash: &str, index: u32) -> String;
}

/// Stand-in used when no torrent service is configured.
#[derive(Debug, Clone, Default)]
pub struct UnavailableTorrentService;

#[async_trait]
impl TorrentServicePort for UnavailableTorrentService {
    async fn start(&self) -> Result<(), DownloadError> {
        Err(DownloadError::torrent_unavailable(
            "no torrent streaming service configured",
        ))
    }

    async fn is_ready(&self) -> bool {
        false
    }

    async fn add_torrent(&self, _link: &str, _title: &str) -> Result<String, DownloadError> {
        Err(DownloadError::torrent_unavailable(
            "no torrent streaming service configured",
        ))
    }

    fn play_link(&self, _hash: &str, _index: u32) -> String {
        String::new()
    }
}

//! TorrServer client.
//!
//! TorrServer streams torrent content over HTTP. The engine only needs four
//! things from it: start it, wait for `/echo` to answer, register a link
//! through `/torrents`, and build a `/stream` URL for one file of the
//! torrent.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use epdl_core::DownloadError;
use epdl_core::ports::TorrentServicePort;

/// Default address of a locally running TorrServer.
pub const DEFAULT_TORRSERVER_URL: &str = "http://127.0.0.1:8090";

#[derive(Debug, Serialize)]
struct AddTorrentRequest<'a> {
    action: &'static str,
    link: &'a str,
    title: &'a str,
    save_to_db: bool,
}

#[derive(Debug, Deserialize)]
struct TorrentStatus {
    hash: String,
}

/// Client for a TorrServer instance, optionally owning its process.
pub struct TorrServerClient {
    base_url: String,
    binary: Option<PathBuf>,
    http: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl TorrServerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DownloadError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| DownloadError::other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            binary: None,
            http,
            child: Mutex::new(None),
        })
    }

    /// Spawn this TorrServer binary on `start` when the server is not already up.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[async_trait]
impl TorrentServicePort for TorrServerClient {
    async fn start(&self) -> Result<(), DownloadError> {
        let Some(binary) = &self.binary else {
            return Ok(());
        };
        if self.is_ready().await {
            return Ok(());
        }

        let mut child = self.child.lock().await;
        if let Some(running) = child.as_mut() {
            if matches!(running.try_wait(), Ok(None)) {
                return Ok(());
            }
        }
        let spawned = Command::new(binary)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DownloadError::torrent_unavailable(format!(
                    "failed to start {}: {e}",
                    binary.display()
                ))
            })?;
        info!(program = %binary.display(), "started torrent server");
        *child = Some(spawned);
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        match self.http.get(self.endpoint("echo")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "torrent server not reachable");
                false
            }
        }
    }

    async fn add_torrent(&self, link: &str, title: &str) -> Result<String, DownloadError> {
        let body = AddTorrentRequest {
            action: "add",
            link,
            title,
            save_to_db: false,
        };
        let response = self
            .http
            .post(self.endpoint("torrents"))
            .json(&body)
            .send()
            .await
            .map_err(|e| DownloadError::torrent_unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::network_with_status(
                format!("torrent server rejected link: HTTP {}", status.as_u16()),
                status.as_u16(),
            ));
        }
        let torrent: TorrentStatus = response
            .json()
            .await
            .map_err(|e| DownloadError::network(format!("invalid torrent server reply: {e}")))?;
        Ok(torrent.hash)
    }

    fn play_link(&self, hash: &str, index: u32) -> String {
        play_link(&self.base_url, hash, index)
    }
}

fn play_link(base_url: &str, hash: &str, index: u32) -> String {
    format!(
        "{base_url}/stream/video.mkv?link={}&index={index}&play",
        urlencoding::encode(hash)
    )
}

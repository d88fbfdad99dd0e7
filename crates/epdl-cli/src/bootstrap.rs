//! CLI bootstrap - the composition root.
//!
//! This module is the only place where infrastructure is wired together:
//! - queue database (via epdl-db)
//! - HTTP backend, ffmpeg toolkit and `TorrServer` client (via epdl-download)
//! - source and external downloader adapters (this crate)
//!
//! Handlers receive the composed [`CliContext`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use epdl_core::ports::ChannelDownloadEmitter;
use epdl_core::{DownloadEvent, DownloadPreferences, EngineConfig, PreferencesHandle};
use epdl_db::{SqliteQueueStore, setup_database};
use epdl_download::http::ReqwestBackend;
use epdl_download::{
    DownloadManager, DownloadManagerDeps, FfmpegToolkit, TorrServerClient, build_download_manager,
};

use crate::handoff::ProcessHandoff;
use crate::parser::Cli;
use crate::source::DirectUrlSource;

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub downloads_dir: PathBuf,
    pub database_path: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub torrserver_url: String,
    pub torrserver_bin: Option<PathBuf>,
    pub preferences: DownloadPreferences,
}

impl CliConfig {
    /// Merge command-line flags with platform defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let downloads_dir = match &cli.downloads_dir {
            Some(dir) => dir.clone(),
            None => default_downloads_dir()?,
        };
        let database_path = match &cli.database {
            Some(path) => path.clone(),
            None => default_database_path()?,
        };

        let mut preferences = DownloadPreferences::default();
        if let Some(count) = cli.concurrency {
            preferences = preferences.with_concurrent_downloads(count);
        }
        if let Some(threads) = cli.threads {
            preferences = preferences.with_download_threads(threads);
        }
        if let Some(program) = &cli.external_downloader {
            preferences = preferences.with_external_downloader(true, Some(program.clone()));
        }

        Ok(Self {
            downloads_dir,
            database_path,
            ffmpeg: cli.ffmpeg.clone(),
            ffprobe: cli.ffprobe.clone(),
            torrserver_url: cli.torrserver_url.clone(),
            torrserver_bin: cli.torrserver_bin.clone(),
            preferences,
        })
    }
}

/// `<Downloads>/epdl`, falling back to the home directory.
pub fn default_downloads_dir() -> Result<PathBuf> {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join("epdl"))
        .context("could not determine a downloads directory; pass --downloads-dir")
}

/// `<local data dir>/epdl/queue.db`.
pub fn default_database_path() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("epdl").join("queue.db"))
        .context("could not determine a data directory; pass --db")
}

/// Composed application context for CLI commands.
pub struct CliContext {
    pub manager: DownloadManager,
    pub preferences: PreferencesHandle,
    pub config: CliConfig,
    events: Option<mpsc::UnboundedReceiver<DownloadEvent>>,
}

impl CliContext {
    /// Access the download manager.
    pub const fn manager(&self) -> &DownloadManager {
        &self.manager
    }

    /// Take the engine's event stream. Only the first caller gets it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DownloadEvent>> {
        self.events.take()
    }
}

/// Bootstrap the CLI application.
///
/// Opens the queue database, builds every adapter, constructs the
/// download manager and restores the persisted queue.
pub async fn bootstrap(config: CliConfig) -> Result<CliContext> {
    let pool = setup_database(&config.database_path)
        .await
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let store = Arc::new(SqliteQueueStore::new(pool));

    let preferences = PreferencesHandle::default();
    preferences
        .update(config.preferences.clone())
        .context("invalid download preferences")?;

    let mut torrent = TorrServerClient::new(config.torrserver_url.clone())?;
    if let Some(binary) = &config.torrserver_bin {
        torrent = torrent.with_binary(binary);
    }

    let (emitter, events) = ChannelDownloadEmitter::new();
    let manager = build_download_manager(DownloadManagerDeps {
        store,
        source: Arc::new(DirectUrlSource),
        emitter: Arc::new(emitter),
        http: Arc::new(ReqwestBackend::new()?),
        remux: Arc::new(FfmpegToolkit::new(&config.ffmpeg, &config.ffprobe)),
        torrent: Arc::new(torrent),
        external: Arc::new(ProcessHandoff::default()),
        prefs: preferences.clone(),
        config: EngineConfig::new(config.downloads_dir.clone()),
    });

    let restored = manager.restore().await?;
    tracing::debug!(restored, "queue restored");

    Ok(CliContext {
        manager,
        preferences,
        config,
        events: Some(events),
    })
}

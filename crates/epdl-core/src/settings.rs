//! User download preferences.
//!
//! The engine only reads preferences. Changes are published through a
//! [`PreferencesHandle`] so that a running scheduler can react to them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Default number of episodes downloaded at once.
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 2;

/// Default worker count for ranged progressive downloads.
pub const DEFAULT_DOWNLOAD_THREADS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadPreferences {
    /// Maximum number of items in `Downloading` at once (at least 1).
    pub concurrent_downloads: usize,
    /// Worker count hint for range fetches.
    pub download_threads: usize,
    /// Hand episodes to an external program instead of fetching them.
    pub use_external_downloader: bool,
    /// Program used for hand-offs; `None` lets the adapter choose.
    pub external_downloader: Option<String>,
}

impl Default for DownloadPreferences {
    fn default() -> Self {
        Self {
            concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
            download_threads: DEFAULT_DOWNLOAD_THREADS,
            use_external_downloader: false,
            external_downloader: None,
        }
    }
}

impl DownloadPreferences {
    #[must_use]
    pub const fn with_concurrent_downloads(mut self, count: usize) -> Self {
        self.concurrent_downloads = count;
        self
    }

    #[must_use]
    pub const fn with_download_threads(mut self, threads: usize) -> Self {
        self.download_threads = threads;
        self
    }

    #[must_use]
    pub fn with_external_downloader(mut self, enabled: bool, program: Option<String>) -> Self {
        self.use_external_downloader = enabled;
        self.external_downloader = program;
        self
    }

    /// Concurrency limit with the lower bound applied.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.concurrent_downloads.max(1)
    }

    /// Whether an item should bypass internal fetching.
    #[must_use]
    pub const fn routes_externally(&self, change_downloader: bool) -> bool {
        self.use_external_downloader != change_downloader
    }
}

/// Errors that can occur during preference validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("concurrent downloads must be between 1 and {max}, got {value}")]
    InvalidConcurrency { value: usize, max: usize },

    #[error("download threads must be between 1 and {max}, got {value}")]
    InvalidThreads { value: usize, max: usize },
}

/// Validate preferences before they are published.
pub fn validate_preferences(prefs: &DownloadPreferences) -> Result<(), SettingsError> {
    const MAX_CONCURRENT: usize = 16;
    const MAX_THREADS: usize = 64;

    if prefs.concurrent_downloads == 0 || prefs.concurrent_downloads > MAX_CONCURRENT {
        return Err(SettingsError::InvalidConcurrency {
            value: prefs.concurrent_downloads,
            max: MAX_CONCURRENT,
        });
    }
    if prefs.download_threads == 0 || prefs.download_threads > MAX_THREADS {
        return Err(SettingsError::InvalidThreads {
            value: prefs.download_threads,
            max: MAX_THREADS,
        });
    }
    Ok(())
}

/// Shared, observable view of the current preferences.
#[derive(Debug, Clone)]
pub struct PreferencesHandle {
    tx: Arc<watch::Sender<DownloadPreferences>>,
}

impl PreferencesHandle {
    #[must_use]
    pub fn new(initial: DownloadPreferences) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn current(&self) -> DownloadPreferences {
        self.tx.borrow().clone()
    }

    /// Validate and publish new preferences.
    pub fn update(&self, prefs: DownloadPreferences) -> Result<(), SettingsError> {
        validate_preferences(&prefs)?;
        self.tx.send_replace(prefs);
        Ok(())
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DownloadPreferences> {
        self.tx.subscribe()
    }
}

impl Default for PreferencesHandle {
    fn default() -> Self {
        Self::new(DownloadPreferences::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_routing_flips_with_change_downloader() {
        let internal = DownloadPreferences::default();
        assert!(!internal.routes_externally(false));
        assert!(internal.routes_externally(true));

        let external = DownloadPreferences::default().with_external_downloader(true, None);
        assert!(external.routes_externally(false));
        assert!(!external.routes_externally(true));
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let prefs = DownloadPreferences::default().with_concurrent_downloads(0);
        assert!(matches!(
            validate_preferences(&prefs),
            Err(SettingsError::InvalidConcurrency { value: 0, .. })
        ));
        assert_eq!(prefs.effective_concurrency(), 1);
    }

    #[test]
    fn test_handle_publishes_updates() {
        let handle = PreferencesHandle::default();
        let mut rx = handle.subscribe();
        handle
            .update(DownloadPreferences::default().with_concurrent_downloads(4))
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().concurrent_downloads, 4);
        assert_eq!(handle.current().concurrent_downloads, 4);
    }

    #[test]
    fn test_invalid_update_is_not_published() {
        let handle = PreferencesHandle::default();
        let result = handle.update(DownloadPreferences::default().with_download_threads(0));
        assert!(result.is_err());
        assert_eq!(handle.current().download_threads, DEFAULT_DOWNLOAD_THREADS);
    }
}

//! Process-wide resource governor.
//!
//! Two counting gates shared by every download in the process:
//!
//! - fetch slots bound concurrent network requests,
//! - buffer slots bound segments held in memory before they are written.
//!
//! Permits are RAII guards. Callers take them around the smallest unit of
//! work (one segment GET, one range GET) and drop them right after.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use epdl_core::DownloadError;

#[derive(Debug, Clone)]
pub struct ResourceGovernor {
    fetch: Arc<Semaphore>,
    buffers: Arc<Semaphore>,
    fetch_capacity: usize,
    buffer_capacity: usize,
}

impl ResourceGovernor {
    /// Create the governor. Zero capacities are raised to one.
    #[must_use]
    pub fn new(fetch_slots: usize, buffer_slots: usize) -> Self {
        let fetch_capacity = fetch_slots.max(1);
        let buffer_capacity = buffer_slots.max(1);
        Self {
            fetch: Arc::new(Semaphore::new(fetch_capacity)),
            buffers: Arc::new(Semaphore::new(buffer_capacity)),
            fetch_capacity,
            buffer_capacity,
        }
    }

    pub async fn acquire_fetch(&self) -> Result<OwnedSemaphorePermit, DownloadError> {
        Arc::clone(&self.fetch)
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::other("fetch gate closed"))
    }

    pub async fn acquire_buffer(&self) -> Result<OwnedSemaphorePermit, DownloadError> {
        Arc::clone(&self.buffers)
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::other("buffer gate closed"))
    }

    #[must_use]
    pub fn fetches_in_flight(&self) -> usize {
        self.fetch_capacity - self.fetch.available_permits()
    }

    #[must_use]
    pub fn buffers_in_use(&self) -> usize {
        self.buffer_capacity - self.buffers.available_permits()
    }

    #[must_use]
    pub const fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

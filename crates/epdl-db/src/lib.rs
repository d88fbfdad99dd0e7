//! `SQLite` persistence for the download queue.
//!
//! [`SqliteQueueStore`] implements [`epdl_core::QueueStorePort`]; entry
//! points open the pool with [`setup_database`].

#![deny(unsafe_code)]

pub mod repositories;
pub mod setup;

pub use repositories::SqliteQueueStore;

pub use setup::setup_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;

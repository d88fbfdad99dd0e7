//! Repository implementations backed by `SQLite`.

mod sqlite_queue_store;

pub use sqlite_queue_store::SqliteQueueStore;

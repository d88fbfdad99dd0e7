//! `SQLite` implementation of the `QueueStorePort` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use epdl_core::{DownloadKey, QueueStorePort, RepositoryError, StoredDownload};

/// Persists queue membership to `SQLite` so it survives restarts.
///
/// Rows are restored in `position` order; new rows are appended after the
/// current maximum.
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStorePort for SqliteQueueStore {
    async fn restore_all(&self) -> Result<Vec<StoredDownload>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT anime_json, episode_json, change_downloader, queued_at
            FROM download_queue
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        rows.iter().map(row_to_stored_download).collect()
    }

    async fn add_all(&self, items: &[StoredDownload]) -> Result<(), RepositoryError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        for item in items {
            let anime_json = serde_json::to_string(&item.anime)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
            let episode_json = serde_json::to_string(&item.episode)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO download_queue (
                    anime_id, episode_id, position, anime_json, episode_json,
                    change_downloader, queued_at
                ) VALUES (
                    ?, ?, (SELECT COALESCE(MAX(position), 0) + 1 FROM download_queue),
                    ?, ?, ?, ?
                )
                ON CONFLICT(anime_id, episode_id) DO NOTHING
                "#,
            )
            .bind(item.anime.id.0)
            .bind(item.episode.id.0)
            .bind(&anime_json)
            .bind(&episode_json)
            .bind(item.change_downloader)
            .bind(item.queued_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        tracing::debug!(count = items.len(), "stored queued episodes");
        Ok(())
    }

    async fn replace_all(&self, items: &[StoredDownload]) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM download_queue")
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        for (position, item) in (1_i64..).zip(items) {
            let anime_json = serde_json::to_string(&item.anime)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
            let episode_json = serde_json::to_string(&item.episode)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO download_queue (
                    anime_id, episode_id, position, anime_json, episode_json,
                    change_downloader, queued_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(anime_id, episode_id) DO NOTHING
                "#,
            )
            .bind(item.anime.id.0)
            .bind(item.episode.id.0)
            .bind(position)
            .bind(&anime_json)
            .bind(&episode_json)
            .bind(item.change_downloader)
            .bind(item.queued_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        }

        // Dropping `tx` on any error above rolls the DELETE back.
        tx.commit()
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        tracing::debug!(count = items.len(), "replaced stored queue");
        Ok(())
    }

    async fn remove(&self, key: &DownloadKey) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM download_queue WHERE anime_id = ? AND episode_id = ?")
            .bind(key.anime_id.0)
            .bind(key.episode_id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn remove_all(&self, keys: &[DownloadKey]) -> Result<(), RepositoryError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        for key in keys {
            sqlx::query("DELETE FROM download_queue WHERE anime_id = ? AND episode_id = ?")
                .bind(key.anime_id.0)
                .bind(key.episode_id.0)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM download_queue")
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn row_to_stored_download(row: &sqlx::sqlite::SqliteRow) -> Result<StoredDownload, RepositoryError> {
    let anime_json: String = row.try_get("anime_json").map_err(map_column_error)?;
    let episode_json: String = row.try_get("episode_json").map_err(map_column_error)?;
    let change_downloader: bool = row.try_get("change_downloader").map_err(map_column_error)?;
    let queued_at: String = row.try_get("queued_at").map_err(map_column_error)?;

    let anime = serde_json::from_str(&anime_json)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    let episode = serde_json::from_str(&episode_json)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    let queued_at = DateTime::parse_from_rfc3339(&queued_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    Ok(StoredDownload {
        anime,
        episode,
        change_downloader,
        queued_at,
    })
}

fn map_column_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(format!("Column read error: {e}"))
}

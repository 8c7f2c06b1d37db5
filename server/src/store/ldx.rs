use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::{Store, StoreResult};

/// Metadata captured for a file the watcher has processed.
#[derive(Debug, Clone)]
pub struct LdxFileMeta {
    pub file_name: String,
    pub size: i64,
    pub modified_at: DateTime<Utc>,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LdxFileRow {
    pub file_name: String,
    pub size: i64,
    pub modified_at: DateTime<Utc>,
    pub content_hash: String,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InjectionInsert {
    pub field_id: String,
    pub value: String,
    pub was_update: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InjectionRow {
    pub id: i64,
    pub file_name: String,
    pub field_id: String,
    pub value: String,
    pub was_update: bool,
    pub injected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LdxStats {
    pub file_name: String,
    pub entries: i64,
    pub updates: i64,
}

impl Store {
    pub async fn ldx_file_exists(&self, file_name: &str) -> StoreResult<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM ldx_files WHERE file_name = ?")
                .bind(file_name)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.is_some())
    }

    /// Mark a file as processed. Returns false when a row for that name
    /// already exists (the file has been handled before).
    pub async fn record_ldx_file(&self, meta: &LdxFileMeta) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO ldx_files (file_name, size, modified_at, content_hash, first_seen_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(file_name) DO NOTHING",
        )
        .bind(&meta.file_name)
        .bind(meta.size)
        .bind(meta.modified_at)
        .bind(&meta.content_hash)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append the injection rows for one file as a single transaction.
    pub async fn append_injection(
        &self,
        file_name: &str,
        rows: &[InjectionInsert],
    ) -> StoreResult<()> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO injection_log (file_name, field_id, value, was_update, injected_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(file_name)
            .bind(&row.field_id)
            .bind(&row.value)
            .bind(row.was_update)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_ldx_files(&self) -> StoreResult<Vec<LdxFileRow>> {
        let rows = sqlx::query_as(
            "SELECT file_name, size, modified_at, content_hash, first_seen_at
             FROM ldx_files ORDER BY first_seen_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn list_injections(&self, file_name: &str) -> StoreResult<Vec<InjectionRow>> {
        let rows = sqlx::query_as(
            "SELECT id, file_name, field_id, value, was_update, injected_at
             FROM injection_log WHERE file_name = ? ORDER BY id",
        )
        .bind(file_name)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Per-file injected-entry counts for the admin stats view.
    pub async fn ldx_stats(&self) -> StoreResult<Vec<LdxStats>> {
        let rows = sqlx::query_as(
            "SELECT f.file_name AS file_name,
                    COUNT(i.id) AS entries,
                    COALESCE(SUM(i.was_update), 0) AS updates
             FROM ldx_files f
             LEFT JOIN injection_log i ON i.file_name = f.file_name
             GROUP BY f.file_name
             ORDER BY f.first_seen_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// `first_seen_at` of the most recently processed file. Drives the
    /// touched-since-last-file classification for fields without a validity
    /// window.
    pub async fn latest_ldx_first_seen(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT first_seen_at FROM ldx_files ORDER BY first_seen_at DESC LIMIT 1")
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(ts,)| ts))
    }
}

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

pub mod ldx;
pub mod sensors;
pub mod settings;
pub mod users;
pub mod values;

pub use ldx::{InjectionInsert, InjectionRow, LdxFileMeta, LdxFileRow, LdxStats};
pub use sensors::Sensor;
pub use users::UserRecord;
pub use values::{AuditEntry, AuditPage, FormValueRow};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("integrity: {0}")]
    Integrity(String),
    #[error("storage: {0}")]
    Storage(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::Integrity(db.message().to_string())
            }
            _ => StoreError::Storage(err),
        }
    }
}

/// Handle to the single SQLite database backing all persistent state.
/// Cloneable; created once at boot and passed by reference.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database file and run pending migrations.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// In-memory database for tests. A single connection keeps the same
    /// memory database alive across all queries.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Storage(sqlx::Error::Migrate(Box::new(err))))?;
        Ok(())
    }

    /// Direct pool access for transactional callers (Value Service, tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Consistent single-file copy of the database. `VACUUM INTO` takes a
    /// shared lock for the duration of the copy, so writers are only briefly
    /// quiesced.
    pub async fn export_snapshot(&self, destination: &Path) -> StoreResult<()> {
        let dest = destination
            .to_str()
            .ok_or_else(|| StoreError::Validation("export path is not valid UTF-8".into()))?;
        sqlx::query("VACUUM INTO ?")
            .bind(dest)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Wipe runtime data (form values, audit, LDX bookkeeping, injection log)
    /// while preserving users, sensors, and configuration.
    pub async fn clear_runtime_data(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM injection_log")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ldx_files")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM audit_entries")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM form_values")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Close the pool, flushing WAL state. Called on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

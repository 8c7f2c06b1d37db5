use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::forms::FormRegistry;
use crate::metrics::DashMetrics;
use crate::store::{InjectionInsert, LdxFileMeta, Store, StoreError};

pub mod inject;

pub use inject::InjectError;

/// Files modified more recently than this are assumed to still be written.
const DEBOUNCE: Duration = Duration::from_millis(500);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("i/o error on {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error(transparent)]
    Inject(#[from] InjectError),
    #[error("writing {0} timed out")]
    WriteTimeout(PathBuf),
}

/// Background task that folds current form values into newly observed LDX
/// log files. One file failing never stops the loop; the file is retried on
/// the next tick because no `ldx_files` row was recorded for it.
pub struct LdxWatcher {
    store: Store,
    registry: FormRegistry,
    metrics: std::sync::Arc<DashMetrics>,
    poll_interval: Duration,
}

impl LdxWatcher {
    pub fn new(
        store: Store,
        registry: FormRegistry,
        metrics: std::sync::Arc<DashMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("ldx watcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.scan_once().await {
                warn!(error = %err, "ldx scan failed");
            }
        }
        info!("ldx watcher stopped");
    }

    /// One pass over the watch directory. Public so tests can drive the
    /// watcher without waiting on the timer.
    pub async fn scan_once(&self) -> Result<(), WatchError> {
        let Some(dir) = self.store.watch_dir().await? else {
            return Ok(());
        };
        let dir = PathBuf::from(dir);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "watch directory missing");
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|err| WatchError::Io(dir.clone(), err))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| WatchError::Io(dir.clone(), err))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !name.to_ascii_lowercase().ends_with(".ldx") {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    warn!(file = name, error = %err, "failed to stat candidate");
                    continue;
                }
            };

            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified.elapsed().map(|age| age < DEBOUNCE).unwrap_or(true) {
                // Still being written; pick it up next tick.
                continue;
            }

            if self.store.ldx_file_exists(name).await? {
                continue;
            }

            let meta = LdxFileMeta {
                file_name: name.to_string(),
                size: metadata.len() as i64,
                modified_at: DateTime::<Utc>::from(modified),
                content_hash: String::new(),
            };

            if let Err(err) = self.process_file(&path, meta).await {
                warn!(file = name, error = %err, "ldx injection failed; will retry");
            }
        }

        Ok(())
    }

    async fn process_file(&self, path: &Path, mut meta: LdxFileMeta) -> Result<(), WatchError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| WatchError::Io(path.to_path_buf(), err))?;
        meta.content_hash = hex::encode(Sha256::digest(&bytes));

        let rows = self.build_entries().await?;
        let injected = inject::inject_entries(&bytes, &rows)?;

        tokio::time::timeout(WRITE_TIMEOUT, write_atomic(path, &injected))
            .await
            .map_err(|_| WatchError::WriteTimeout(path.to_path_buf()))?
            .map_err(|err| WatchError::Io(path.to_path_buf(), err))?;

        // Only now does the file become "processed": a failed write above
        // leaves no row, so the next tick retries.
        if self.store.record_ldx_file(&meta).await? {
            self.store.append_injection(&meta.file_name, &rows).await?;
            self.metrics.ldx_file_processed(rows.len());
            info!(
                file = %meta.file_name,
                entries = rows.len(),
                "injected form values into ldx file"
            );
        }

        Ok(())
    }

    /// Snapshot of every injectable field across all schemas, classified as
    /// fresh or stale for the injection log.
    async fn build_entries(&self) -> Result<Vec<InjectionInsert>, WatchError> {
        let now = Utc::now();
        let last_processed = self.store.latest_ldx_first_seen().await?;
        let mut rows = Vec::new();

        for schema in self.registry.all() {
            let stored = self.store.list_values(schema.role).await?;
            for field in &schema.fields {
                let Some(row) = stored.get(&field.name) else {
                    continue;
                };
                let Some(value) = row.value.clone() else {
                    continue;
                };

                let was_update = match field.validity_window {
                    Some(window) => (now - row.updated_at).num_seconds() <= window,
                    None => match last_processed {
                        Some(previous) => row.updated_at > previous,
                        None => true,
                    },
                };

                rows.push(InjectionInsert {
                    field_id: field.inject_id().to_string(),
                    value,
                    was_update,
                });
            }
        }

        Ok(rows)
    }
}

/// Write to a sibling `<name>.tmp`, fsync, then rename over the original.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("ldx-out");
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}

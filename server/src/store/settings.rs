use uuid::Uuid;

use crate::telemetry::{SerialSettings, SourcePreference};

use super::{Store, StoreError, StoreResult};

const KEY_WATCH_DIR: &str = "watch_dir";
const KEY_SERIAL_CONFIG: &str = "serial_config";
const KEY_SOURCE_PREFERENCE: &str = "source_preference";

impl Store {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn watch_dir(&self) -> StoreResult<Option<String>> {
        self.get_setting(KEY_WATCH_DIR).await
    }

    pub async fn set_watch_dir(&self, path: Option<&str>) -> StoreResult<()> {
        match path {
            Some(path) if !path.trim().is_empty() => {
                self.set_setting(KEY_WATCH_DIR, path.trim()).await
            }
            _ => self.delete_setting(KEY_WATCH_DIR).await,
        }
    }

    pub async fn serial_settings(&self) -> StoreResult<SerialSettings> {
        match self.get_setting(KEY_SERIAL_CONFIG).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|err| {
                StoreError::Integrity(format!("stored serial config is malformed: {err}"))
            }),
            None => Ok(SerialSettings::default()),
        }
    }

    pub async fn set_serial_settings(&self, settings: &SerialSettings) -> StoreResult<()> {
        let raw = serde_json::to_string(settings)
            .map_err(|err| StoreError::Validation(err.to_string()))?;
        self.set_setting(KEY_SERIAL_CONFIG, &raw).await
    }

    pub async fn source_preference(&self) -> StoreResult<SourcePreference> {
        match self.get_setting(KEY_SOURCE_PREFERENCE).await? {
            Some(raw) => SourcePreference::parse(&raw).ok_or_else(|| {
                StoreError::Integrity(format!("stored source preference '{raw}' is unknown"))
            }),
            None => Ok(SourcePreference::Auto),
        }
    }

    pub async fn set_source_preference(&self, preference: SourcePreference) -> StoreResult<()> {
        self.set_setting(KEY_SOURCE_PREFERENCE, preference.as_str())
            .await
    }

    pub async fn user_pref(&self, user_id: Uuid, key: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_prefs WHERE user_id = ? AND key = ?")
                .bind(user_id.to_string())
                .bind(key)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set_user_pref(&self, user_id: Uuid, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO user_prefs (user_id, key, value) VALUES (?, ?, ?)
             ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(user_id.to_string())
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

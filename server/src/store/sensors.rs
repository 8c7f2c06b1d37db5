use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Store, StoreError, StoreResult};

/// One telemetry channel. `sensor_id` is the wire key used in frames.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Sensor {
    pub sensor_id: String,
    pub name: String,
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
    #[sqlx(rename = "group_name")]
    #[serde(rename = "group")]
    pub group: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Store {
    pub async fn list_sensors(&self, enabled_only: bool) -> StoreResult<Vec<Sensor>> {
        let sql = if enabled_only {
            "SELECT sensor_id, name, unit, min_value, max_value, group_name, sort_order, enabled
             FROM sensors WHERE enabled = 1 ORDER BY sort_order, sensor_id"
        } else {
            "SELECT sensor_id, name, unit, min_value, max_value, group_name, sort_order, enabled
             FROM sensors ORDER BY sort_order, sensor_id"
        };
        let rows = sqlx::query_as(sql).fetch_all(self.pool()).await?;
        Ok(rows)
    }

    pub async fn get_sensor(&self, sensor_id: &str) -> StoreResult<Option<Sensor>> {
        let row = sqlx::query_as(
            "SELECT sensor_id, name, unit, min_value, max_value, group_name, sort_order, enabled
             FROM sensors WHERE sensor_id = ?",
        )
        .bind(sensor_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn upsert_sensor(&self, sensor: &Sensor) -> StoreResult<()> {
        if sensor.max_value < sensor.min_value {
            return Err(StoreError::Validation(format!(
                "sensor '{}' has max_value below min_value",
                sensor.sensor_id
            )));
        }
        sqlx::query(
            "INSERT INTO sensors (sensor_id, name, unit, min_value, max_value, group_name, sort_order, enabled)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(sensor_id) DO UPDATE SET
                 name = excluded.name,
                 unit = excluded.unit,
                 min_value = excluded.min_value,
                 max_value = excluded.max_value,
                 group_name = excluded.group_name,
                 sort_order = excluded.sort_order,
                 enabled = excluded.enabled",
        )
        .bind(&sensor.sensor_id)
        .bind(&sensor.name)
        .bind(&sensor.unit)
        .bind(sensor.min_value)
        .bind(sensor.max_value)
        .bind(&sensor.group)
        .bind(sensor.sort_order)
        .bind(sensor.enabled)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_sensor(&self, sensor_id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM sensors WHERE sensor_id = ?")
            .bind(sensor_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn count_sensors(&self) -> StoreResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sensors")
            .fetch_one(self.pool())
            .await?;
        Ok(count.0)
    }
}

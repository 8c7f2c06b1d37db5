use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pitwall_auth::Role;
use serde::Serialize;
use sqlx::{FromRow, Sqlite, Transaction};
use uuid::Uuid;

use super::{Store, StoreResult};

#[derive(Debug, Clone, FromRow)]
pub struct FormValueRow {
    pub field_name: String,
    pub value: Option<String>,
    pub previous_value: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub form_name: String,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub items: Vec<AuditEntry>,
    pub total: i64,
}

#[derive(FromRow)]
struct CurrentValue {
    value: Option<String>,
    previous_value: Option<String>,
}

impl Store {
    /// Write one field inside the caller's transaction. When the stored value
    /// differs from `new_value` the row is upserted, `previous_value` advances
    /// to the pre-upsert value, and one audit row is appended. Returns
    /// `(old_value, previous_value)` as of before the call.
    pub async fn upsert_form_value(
        tx: &mut Transaction<'_, Sqlite>,
        role: Role,
        form_name: &str,
        field_name: &str,
        new_value: Option<&str>,
        changed_by: Option<Uuid>,
    ) -> StoreResult<(Option<String>, Option<String>)> {
        let current: Option<CurrentValue> = sqlx::query_as(
            "SELECT value, previous_value FROM form_values
             WHERE role = ? AND field_name = ?",
        )
        .bind(role.as_str())
        .bind(field_name)
        .fetch_optional(&mut **tx)
        .await?;

        let old_value = current.as_ref().and_then(|row| row.value.clone());
        let old_previous = current.as_ref().and_then(|row| row.previous_value.clone());

        if old_value.as_deref() == new_value {
            return Ok((old_value, old_previous));
        }

        let now = Utc::now();
        let changed_by = changed_by.map(|id| id.to_string());

        sqlx::query(
            "INSERT INTO form_values (role, field_name, value, previous_value, updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(role, field_name) DO UPDATE SET
                 value = excluded.value,
                 previous_value = excluded.previous_value,
                 updated_at = excluded.updated_at,
                 updated_by = excluded.updated_by",
        )
        .bind(role.as_str())
        .bind(field_name)
        .bind(new_value)
        .bind(&old_value)
        .bind(now)
        .bind(&changed_by)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "INSERT INTO audit_entries (form_name, field_name, old_value, new_value, changed_at, changed_by)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(form_name)
        .bind(field_name)
        .bind(&old_value)
        .bind(new_value)
        .bind(now)
        .bind(&changed_by)
        .execute(&mut **tx)
        .await?;

        Ok((old_value, old_previous))
    }

    pub async fn list_values(&self, role: Role) -> StoreResult<HashMap<String, FormValueRow>> {
        let rows: Vec<FormValueRow> = sqlx::query_as(
            "SELECT field_name, value, previous_value, updated_at, updated_by
             FROM form_values WHERE role = ?",
        )
        .bind(role.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.field_name.clone(), row))
            .collect())
    }

    /// Newest-first audit page plus the total row count.
    pub async fn list_audit(&self, offset: i64, limit: i64) -> StoreResult<AuditPage> {
        let items: Vec<AuditEntry> = sqlx::query_as(
            "SELECT id, form_name, field_name, old_value, new_value, changed_at, changed_by
             FROM audit_entries ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_entries")
            .fetch_one(self.pool())
            .await?;

        Ok(AuditPage {
            items,
            total: total.0,
        })
    }
}

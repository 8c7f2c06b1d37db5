use std::collections::HashMap;
use std::sync::Arc;

use pitwall_auth::Role;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::forms::{FieldType, FormField, FormRegistry};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no form is defined for role '{0}'")]
    UnknownForm(Role),
    #[error("field '{field}': {reason}")]
    Invalid { field: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize)]
pub struct Prefill {
    pub values: HashMap<String, Option<String>>,
    /// UNIX seconds of the last update per field.
    pub timestamps: HashMap<String, i64>,
    /// Present only for fields with `lookback: true`.
    pub previous_values: HashMap<String, Option<String>>,
}

/// Prefill, validation, diffing, and audited writes for form submissions.
/// Submissions are serialized per role so audit ordering is linear.
pub struct ValueService {
    store: Store,
    registry: FormRegistry,
    locks: std::sync::Mutex<HashMap<Role, Arc<Mutex<()>>>>,
}

impl ValueService {
    pub fn new(store: Store, registry: FormRegistry) -> Self {
        Self {
            store,
            registry,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn role_lock(&self, role: Role) -> Arc<Mutex<()>> {
        let mut guard = self.locks.lock().expect("role lock table poisoned");
        guard.entry(role).or_default().clone()
    }

    pub async fn get_prefill(&self, role: Role) -> Result<Prefill, SubmitError> {
        let schema = self
            .registry
            .get(role)
            .ok_or(SubmitError::UnknownForm(role))?;
        let stored = self.store.list_values(role).await?;

        let mut values = HashMap::new();
        let mut timestamps = HashMap::new();
        let mut previous_values = HashMap::new();

        for field in &schema.fields {
            let Some(row) = stored.get(&field.name) else {
                continue;
            };
            values.insert(field.name.clone(), row.value.clone());
            timestamps.insert(field.name.clone(), row.updated_at.timestamp());
            if field.lookback {
                previous_values.insert(field.name.clone(), row.previous_value.clone());
            }
        }

        Ok(Prefill {
            values,
            timestamps,
            previous_values,
        })
    }

    /// Validate and persist a submission. Returns the number of fields that
    /// actually changed (each producing exactly one audit row).
    pub async fn submit(
        &self,
        role: Role,
        user_id: Uuid,
        values_in: &HashMap<String, serde_json::Value>,
    ) -> Result<u64, SubmitError> {
        let schema = self
            .registry
            .get(role)
            .ok_or(SubmitError::UnknownForm(role))?;

        // Keys not in the schema are ignored; submitted fields are coerced
        // and validated before anything is written.
        let mut incoming: Vec<(&FormField, Option<String>)> = Vec::new();
        for field in &schema.fields {
            let Some(raw) = values_in.get(&field.name) else {
                continue;
            };
            incoming.push((field, normalize_value(field, raw)?));
        }

        let lock = self.role_lock(role);
        let _guard = lock.lock().await;

        let stored = self.store.list_values(role).await?;
        let changes: Vec<(&FormField, Option<String>)> = incoming
            .into_iter()
            .filter(|(field, new_value)| {
                let current = stored.get(&field.name).and_then(|row| row.value.clone());
                current != *new_value
            })
            .collect();

        if changes.is_empty() {
            return Ok(0);
        }

        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;
        for (field, new_value) in &changes {
            Store::upsert_form_value(
                &mut tx,
                role,
                &schema.form_name,
                &field.name,
                new_value.as_deref(),
                Some(user_id),
            )
            .await?;
        }
        tx.commit().await.map_err(StoreError::from)?;

        Ok(changes.len() as u64)
    }
}

/// Coerce an incoming JSON value to the stored string form. Trimmed; the
/// empty string becomes null; comparison downstream is plain string equality.
fn normalize_value(
    field: &FormField,
    raw: &serde_json::Value,
) -> Result<Option<String>, SubmitError> {
    let text = match raw {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => {
            return Err(SubmitError::Invalid {
                field: field.name.clone(),
                reason: "expected a scalar value".into(),
            })
        }
    };

    let Some(text) = text else {
        if field.required {
            return Err(SubmitError::Invalid {
                field: field.name.clone(),
                reason: "value is required".into(),
            });
        }
        return Ok(None);
    };

    match field.field_type {
        FieldType::Number => {
            if text.parse::<f64>().is_err() {
                return Err(SubmitError::Invalid {
                    field: field.name.clone(),
                    reason: format!("'{text}' is not a number"),
                });
            }
        }
        FieldType::Select => {
            let allowed = field
                .options
                .as_ref()
                .map(|options| options.iter().any(|option| option == &text))
                .unwrap_or(false);
            if !allowed {
                return Err(SubmitError::Invalid {
                    field: field.name.clone(),
                    reason: format!("'{text}' is not one of the allowed options"),
                });
            }
        }
        FieldType::Text | FieldType::Textarea => {}
    }

    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, field_type: FieldType) -> FormField {
        FormField {
            name: name.to_string(),
            label: name.to_string(),
            field_type,
            required: false,
            options: None,
            placeholder: None,
            unit: None,
            tab: None,
            lookback: false,
            validity_window: None,
            unix_timestamp: false,
            inject: None,
        }
    }

    #[test]
    fn normalize_trims_and_nulls_empty() {
        let f = field("notes", FieldType::Text);
        assert_eq!(
            normalize_value(&f, &json!("  hi  ")).unwrap(),
            Some("hi".to_string())
        );
        assert_eq!(normalize_value(&f, &json!("   ")).unwrap(), None);
        assert_eq!(normalize_value(&f, &json!(null)).unwrap(), None);
    }

    #[test]
    fn normalize_rejects_non_numeric_for_number_fields() {
        let f = field("rate", FieldType::Number);
        assert_eq!(
            normalize_value(&f, &json!("100")).unwrap(),
            Some("100".to_string())
        );
        assert_eq!(
            normalize_value(&f, &json!(12.5)).unwrap(),
            Some("12.5".to_string())
        );
        assert!(matches!(
            normalize_value(&f, &json!("fast")),
            Err(SubmitError::Invalid { .. })
        ));
    }

    #[test]
    fn normalize_checks_select_options() {
        let mut f = field("mode", FieldType::Select);
        f.options = Some(vec!["continuous".into(), "burst".into()]);
        assert_eq!(
            normalize_value(&f, &json!("burst")).unwrap(),
            Some("burst".to_string())
        );
        assert!(normalize_value(&f, &json!("other")).is_err());
    }

    #[test]
    fn normalize_keeps_numeric_text_as_submitted() {
        // "100" and "100.0" stay distinct: comparison is textual.
        let f = field("rate", FieldType::Number);
        assert_eq!(
            normalize_value(&f, &json!("100.0")).unwrap(),
            Some("100.0".to_string())
        );
    }

    #[test]
    fn required_field_rejects_null() {
        let mut f = field("rate", FieldType::Number);
        f.required = true;
        assert!(matches!(
            normalize_value(&f, &json!(null)),
            Err(SubmitError::Invalid { .. })
        ));
    }
}

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use pitwall_auth::{Claims, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("failed to read form directory {0}: {1}")]
    Dir(String, std::io::Error),
    #[error("failed to read descriptor {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse descriptor {0}: {1}")]
    Parse(String, serde_yaml::Error),
    #[error("descriptor {file}: select field '{field}' has no options")]
    SelectWithoutOptions { file: String, field: String },
    #[error("role '{role}' is described by both {first} and {second}")]
    DuplicateRole {
        role: Role,
        first: String,
        second: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Textarea,
    Select,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    #[serde(default)]
    pub lookback: bool,
    /// Seconds a value stays fresh for LDX classification; null = no staleness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_window: Option<i64>,
    /// Display hint: render the value as a UNIX timestamp.
    #[serde(default)]
    pub unix_timestamp: bool,
    /// LDX entry id alias; falls back to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<String>,
}

impl FormField {
    pub fn inject_id(&self) -> &str {
        self.inject.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    pub form_name: String,
    pub role: Role,
    pub fields: Vec<FormField>,
}

impl FormSchema {
    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Ordered distinct non-null tab names, in field order.
    pub fn tabs(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for field in &self.fields {
            if let Some(tab) = &field.tab {
                if !seen.contains(tab) {
                    seen.push(tab.clone());
                }
            }
        }
        seen
    }
}

/// Immutable snapshot of all loaded schemas, swapped atomically on reload.
#[derive(Clone, Debug)]
pub struct FormRegistry {
    inner: Arc<RwLock<Arc<HashMap<Role, FormSchema>>>>,
}

impl FormRegistry {
    /// Load every `*.yaml` / `*.yml` descriptor in the directory.
    pub fn load(dir: &Path) -> Result<Self, FormError> {
        let schemas = load_dir(dir)?;
        info!(forms = schemas.len(), dir = %dir.display(), "form registry loaded");
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(schemas))),
        })
    }

    /// Re-read the directory and swap the snapshot. The old snapshot stays
    /// valid for in-flight requests.
    pub fn reload(&self, dir: &Path) -> Result<usize, FormError> {
        let schemas = load_dir(dir)?;
        let count = schemas.len();
        let mut guard = self.inner.write().expect("form registry lock poisoned");
        *guard = Arc::new(schemas);
        info!(forms = count, "form registry reloaded");
        Ok(count)
    }

    fn snapshot(&self) -> Arc<HashMap<Role, FormSchema>> {
        self.inner.read().expect("form registry lock poisoned").clone()
    }

    pub fn get(&self, role: Role) -> Option<FormSchema> {
        self.snapshot().get(&role).cloned()
    }

    pub fn all(&self) -> Vec<FormSchema> {
        let snapshot = self.snapshot();
        let mut schemas: Vec<FormSchema> = snapshot.values().cloned().collect();
        schemas.sort_by_key(|schema| schema.role);
        schemas
    }

    /// Schemas the caller may read: everything for admins, own subteams
    /// otherwise.
    pub fn list_for_user(&self, claims: &Claims) -> Vec<FormSchema> {
        self.all()
            .into_iter()
            .filter(|schema| claims.is_admin || claims.has_role(schema.role))
            .collect()
    }
}

fn load_dir(dir: &Path) -> Result<HashMap<Role, FormSchema>, FormError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| FormError::Dir(dir.display().to_string(), err))?;

    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut schemas: HashMap<Role, FormSchema> = HashMap::new();
    let mut sources: HashMap<Role, String> = HashMap::new();

    for path in files {
        let name = path.display().to_string();
        let raw = std::fs::read_to_string(&path)
            .map_err(|err| FormError::Read(name.clone(), err))?;
        let schema: FormSchema =
            serde_yaml::from_str(&raw).map_err(|err| FormError::Parse(name.clone(), err))?;

        validate_schema(&schema, &name)?;

        if let Some(first) = sources.get(&schema.role) {
            return Err(FormError::DuplicateRole {
                role: schema.role,
                first: first.clone(),
                second: name,
            });
        }
        sources.insert(schema.role, name);
        schemas.insert(schema.role, schema);
    }

    Ok(schemas)
}

fn validate_schema(schema: &FormSchema, file: &str) -> Result<(), FormError> {
    for field in &schema.fields {
        let has_options = field
            .options
            .as_ref()
            .map(|options| !options.is_empty())
            .unwrap_or(false);
        if field.field_type == FieldType::Select && !has_options {
            return Err(FormError::SelectWithoutOptions {
                file: file.to_string(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

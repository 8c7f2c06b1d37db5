use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Environment-driven server configuration, resolved once at boot.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub data_dir: PathBuf,
    pub forms_dir: PathBuf,
    pub jwt_secret: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub allowed_origins: Vec<String>,
    /// Initial watch directory, adopted only when the store has none.
    pub ldx_watch_dir: Option<String>,
}

impl ServerConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("pitwall.db")
    }
}

pub fn load_config() -> Result<ServerConfig> {
    let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    if jwt_secret.trim().is_empty() {
        anyhow::bail!("JWT_SECRET must not be empty");
    }

    let http_port = env::var("HTTP_PORT")
        .ok()
        .map(|value| {
            value
                .parse::<u16>()
                .with_context(|| format!("HTTP_PORT '{value}' is not a port number"))
        })
        .transpose()?
        .unwrap_or(8000);

    let data_dir = PathBuf::from(env::var("PITWALL_DATA_DIR").unwrap_or_else(|_| "./data".into()));
    let forms_dir =
        PathBuf::from(env::var("PITWALL_FORMS_DIR").unwrap_or_else(|_| "./forms".into()));

    let allowed_origins = env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|value| parse_origins(&value))
        .unwrap_or_else(default_origins);

    Ok(ServerConfig {
        http_port,
        data_dir,
        forms_dir,
        jwt_secret,
        admin_username: env::var("ADMIN_USERNAME").ok().and_then(normalize_optional),
        admin_password: env::var("ADMIN_PASSWORD").ok().and_then(normalize_optional),
        allowed_origins,
        ldx_watch_dir: env::var("LDX_WATCH_DIR").ok().and_then(normalize_optional),
    })
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|item| {
            let origin = item.trim();
            if origin.is_empty() {
                None
            } else {
                Some(origin.to_string())
            }
        })
        .collect()
}

fn default_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

fn normalize_optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_origins_splits_and_trims() {
        let origins = parse_origins("http://a.example , http://b.example,,");
        assert_eq!(origins, vec!["http://a.example", "http://b.example"]);
    }

    #[test]
    fn normalize_optional_drops_blank() {
        assert_eq!(normalize_optional("  ".to_string()), None);
        assert_eq!(normalize_optional(" x ".to_string()), Some("x".to_string()));
    }
}

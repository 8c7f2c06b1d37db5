#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::Request;
use http_body_util::BodyExt;
use pitwall_auth::{JwtConfig, JwtVerifier, Role};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use pitwall_server::app_state::AppState;
use pitwall_server::config::ServerConfig;
use pitwall_server::forms::FormRegistry;
use pitwall_server::handlers::{self, user_handlers};
use pitwall_server::metrics::DashMetrics;
use pitwall_server::store::Store;
use pitwall_server::telemetry::{SerialStatus, SourcePreference, TelemetryHub};
use pitwall_server::values::ValueService;

pub const DAQ_FORM: &str = r#"
form_name: DAQ Setup
role: DAQ
fields:
  - name: sampling_rate
    label: Sampling rate
    type: number
    lookback: true
    validity_window: 3600
  - name: run_label
    label: Run label
    type: text
  - name: notes
    label: Notes
    type: textarea
"#;

pub const AERO_FORM: &str = r#"
form_name: Aero Setup
role: aero
fields:
  - name: front_wing_deg
    label: Front wing angle
    type: number
"#;

pub fn write_form(dir: &Path, file: &str, body: &str) {
    std::fs::write(dir.join(file), body).expect("write form descriptor");
}

/// In-memory store plus the full AppState the router needs.
pub async fn test_state(forms_dir: &Path) -> AppState {
    let store = Store::open_in_memory().await.expect("open store");
    let registry = FormRegistry::load(forms_dir).expect("load forms");
    let values = Arc::new(ValueService::new(store.clone(), registry.clone()));
    let (serial_commands, _commands_rx) = mpsc::channel(4);
    let (preference_tx, _preference_rx) = watch::channel(SourcePreference::Auto);

    let config = ServerConfig {
        http_port: 0,
        data_dir: std::env::temp_dir(),
        forms_dir: forms_dir.to_path_buf(),
        jwt_secret: "integration-test-secret".to_string(),
        admin_username: None,
        admin_password: None,
        allowed_origins: vec!["http://localhost:3000".to_string()],
        ldx_watch_dir: None,
    };

    AppState {
        store,
        verifier: Arc::new(JwtVerifier::new(JwtConfig::new("integration-test-secret"))),
        registry,
        values,
        hub: TelemetryHub::new(),
        serial_status: SerialStatus::new(),
        serial_commands,
        preference_tx: Arc::new(preference_tx),
        metrics: Arc::new(DashMetrics::new().expect("metrics")),
        config: Arc::new(config),
        shutdown: CancellationToken::new(),
    }
}

pub async fn create_user(state: &AppState, username: &str, password: &str, is_admin: bool, roles: &[Role]) {
    let hash = user_handlers::hash_password(password).expect("hash password");
    state
        .store
        .create_user(username, &hash, is_admin, roles)
        .await
        .expect("create user");
}

/// Log in through the router and return the bearer token.
pub async fn login(state: &AppState, username: &str, password: &str) -> String {
    let app = handlers::api_router(state.clone());
    let request = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("username={username}&password={password}")))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK, "login failed");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["access_token"].as_str().expect("token").to_string()
}

pub async fn get_json(
    state: &AppState,
    token: &str,
    uri: &str,
) -> (axum::http::StatusCode, serde_json::Value) {
    let app = handlers::api_router(state.clone());
    let request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub async fn post_json(
    state: &AppState,
    token: &str,
    uri: &str,
    body: serde_json::Value,
) -> (axum::http::StatusCode, serde_json::Value) {
    let app = handlers::api_router(state.clone());
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

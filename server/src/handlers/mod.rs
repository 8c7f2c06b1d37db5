use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use pitwall_auth::{AuthContext, Claims, Role};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::store::UserRecord;

pub mod auth_handlers;
pub mod form_handlers;
pub mod ldx_handlers;
pub mod sensor_handlers;
pub mod serial_handlers;
pub mod telemetry_handlers;
pub mod user_handlers;
pub mod ws;

/// Verified token plus the live user row. A token whose user has been
/// deleted since issue is rejected here.
pub struct CurrentUser {
    pub record: UserRecord,
    pub claims: Claims,
}

impl CurrentUser {
    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        pitwall_auth::ensure_admin(&self.claims).map_err(ApiError::from)
    }

    pub fn ensure_form_access(&self, role: Role) -> Result<(), ApiError> {
        pitwall_auth::ensure_form_access(&self.claims, role).map_err(ApiError::from)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state)
            .await
            .map_err(|err| ApiError::Unauthorized(err.to_string()))?;

        let record = state
            .store
            .get_user(auth.claims.user_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("token user no longer exists".into()))?;

        Ok(Self {
            record,
            claims: auth.claims,
        })
    }
}

pub(crate) fn parse_role(raw: &str) -> Result<Role, ApiError> {
    Role::parse(raw).ok_or_else(|| ApiError::not_found(format!("unknown role '{raw}'")))
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(resp) => resp,
        Err(err) => {
            warn!(?err, "Failed to render metrics");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                .body(axum::body::Body::from("metrics unavailable"))
                .expect("failed to build metrics response")
        }
    }
}

/// Assemble the full route table plus CORS and request tracing.
pub fn api_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            state
                .config
                .allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("authorization"),
        ]);

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/me", get(auth_handlers::me))
        .route("/roles", get(auth_handlers::list_roles))
        .route("/forms", get(form_handlers::list_forms))
        .route("/forms/:role/values", get(form_handlers::get_values))
        .route("/forms/:role/submit", post(form_handlers::submit))
        .route("/forms/:role/tabs", get(form_handlers::tabs))
        .route(
            "/admin/users",
            get(user_handlers::list_users).post(user_handlers::create_user),
        )
        .route(
            "/admin/users/:user_id",
            axum::routing::delete(user_handlers::delete_user),
        )
        .route(
            "/admin/users/:user_id/password",
            put(user_handlers::reset_password),
        )
        .route("/admin/audit", get(user_handlers::list_audit))
        .route(
            "/admin/watch-directory",
            get(ldx_handlers::get_watch_directory).put(ldx_handlers::put_watch_directory),
        )
        .route("/admin/ldx-files", get(ldx_handlers::list_files))
        .route(
            "/admin/ldx-files/:name/injections",
            get(ldx_handlers::list_injections),
        )
        .route("/admin/ldx-stats", get(ldx_handlers::stats))
        .route("/admin/export-db", post(ldx_handlers::export_db))
        .route("/admin/clear-data", post(ldx_handlers::clear_data))
        .route("/admin/forms/reload", post(form_handlers::reload))
        .route(
            "/admin/sensors",
            get(sensor_handlers::list_sensors).post(sensor_handlers::create_sensor),
        )
        .route(
            "/admin/sensors/:sensor_id",
            put(sensor_handlers::update_sensor).delete(sensor_handlers::delete_sensor),
        )
        .route(
            "/admin/serial/config",
            get(serial_handlers::get_config).put(serial_handlers::put_config),
        )
        .route("/admin/serial/source", put(serial_handlers::put_source))
        .route("/admin/serial/restart", post(serial_handlers::restart))
        .route("/telemetry/channels", get(telemetry_handlers::channels))
        .route("/telemetry/source", get(telemetry_handlers::source_status))
        .route(
            "/telemetry/preferences",
            get(telemetry_handlers::get_preferences).put(telemetry_handlers::put_preferences),
        )
        .route("/ws/telemetry", get(ws::ws_telemetry))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(cors)
}

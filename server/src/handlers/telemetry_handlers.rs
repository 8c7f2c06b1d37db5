use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::ApiResult;
use crate::store::Sensor;
use crate::telemetry::serial::SerialStatusView;
use crate::telemetry::source::select_active;
use crate::telemetry::{SourceKind, SourcePreference};

use super::CurrentUser;

const DASHBOARD_PREF_KEY: &str = "dashboard";

pub async fn channels(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> ApiResult<Json<Vec<Sensor>>> {
    Ok(Json(state.store.list_sensors(true).await?))
}

#[derive(Serialize)]
pub struct SourceStatus {
    pub preference: SourcePreference,
    pub active: SourceKind,
    pub serial: SerialStatusView,
    pub hub: HubStatus,
}

#[derive(Serialize)]
pub struct HubStatus {
    pub subscribers: usize,
    pub frames_published: u64,
}

pub async fn source_status(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> ApiResult<Json<SourceStatus>> {
    let preference = state.store.source_preference().await?;
    let active = select_active(preference, &state.serial_status);

    Ok(Json(SourceStatus {
        preference,
        active,
        serial: state.serial_status.snapshot(),
        hub: HubStatus {
            subscribers: state.hub.subscriber_count(),
            frames_published: state.hub.published_count(),
        },
    }))
}

#[derive(Serialize, Deserialize)]
pub struct PreferencesBody {
    pub config: Option<String>,
}

/// Per-user dashboard layout blob, opaque to the server.
pub async fn get_preferences(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<PreferencesBody>> {
    let config = state
        .store
        .user_pref(user.record.id, DASHBOARD_PREF_KEY)
        .await?;
    Ok(Json(PreferencesBody { config }))
}

pub async fn put_preferences(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<PreferencesBody>,
) -> ApiResult<StatusCode> {
    let config = body.config.unwrap_or_default();
    state
        .store
        .set_user_pref(user.record.id, DASHBOARD_PREF_KEY, &config)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

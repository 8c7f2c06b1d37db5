use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::telemetry::{SerialCommand, SerialSettings, SourcePreference};

use super::CurrentUser;

pub async fn get_config(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<SerialSettings>> {
    user.ensure_admin()?;
    Ok(Json(state.store.serial_settings().await?))
}

/// Persist new port settings and bounce the reader so they take effect.
pub async fn put_config(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(settings): Json<SerialSettings>,
) -> ApiResult<StatusCode> {
    user.ensure_admin()?;
    validate_settings(&settings)?;

    state.store.set_serial_settings(&settings).await?;
    request_restart(&state);
    info!(port = %settings.port, baud = settings.baud_rate, "serial config updated");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SourceBody {
    pub source: String,
}

pub async fn put_source(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<SourceBody>,
) -> ApiResult<StatusCode> {
    user.ensure_admin()?;

    let preference = SourcePreference::parse(&body.source).ok_or_else(|| {
        ApiError::validation(format!(
            "source must be one of auto, serial, simulated (got '{}')",
            body.source
        ))
    })?;

    state.store.set_source_preference(preference).await?;
    // The supervisor watches this channel and re-evaluates immediately.
    let _ = state.preference_tx.send(preference);
    info!(source = preference.as_str(), "source preference updated");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restart(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<StatusCode> {
    user.ensure_admin()?;
    request_restart(&state);
    Ok(StatusCode::ACCEPTED)
}

fn request_restart(state: &AppState) {
    if state
        .serial_commands
        .try_send(SerialCommand::Restart)
        .is_err()
    {
        // A restart is already pending; the reader will pick up the stored
        // config when it processes it.
        warn!("serial restart already queued");
    }
}

fn validate_settings(settings: &SerialSettings) -> Result<(), ApiError> {
    if settings.port.trim().is_empty() {
        return Err(ApiError::validation("port must not be empty"));
    }
    if settings.baud_rate == 0 {
        return Err(ApiError::validation("baud_rate must be positive"));
    }
    if settings.csv_separator.is_empty() {
        return Err(ApiError::validation("csv_separator must not be empty"));
    }
    if settings.timeout <= 0.0 {
        return Err(ApiError::validation("timeout must be positive"));
    }
    if settings.reconnect_interval <= 0.0 {
        return Err(ApiError::validation("reconnect_interval must be positive"));
    }
    if settings
        .csv_channel_order
        .iter()
        .any(|id| id.trim().is_empty())
    {
        return Err(ApiError::validation("csv_channel_order contains an empty id"));
    }
    Ok(())
}

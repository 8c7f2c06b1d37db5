use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::store::Sensor;

use super::CurrentUser;

pub async fn list_sensors(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Sensor>>> {
    user.ensure_admin()?;
    Ok(Json(state.store.list_sensors(false).await?))
}

pub async fn create_sensor(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(sensor): Json<Sensor>,
) -> ApiResult<(StatusCode, Json<Sensor>)> {
    user.ensure_admin()?;
    validate_sensor(&sensor)?;

    if state.store.get_sensor(&sensor.sensor_id).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "sensor '{}' already exists",
            sensor.sensor_id
        )));
    }

    state.store.upsert_sensor(&sensor).await?;
    info!(sensor_id = %sensor.sensor_id, "sensor created");
    Ok((StatusCode::CREATED, Json(sensor)))
}

pub async fn update_sensor(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(sensor_id): Path<String>,
    Json(mut sensor): Json<Sensor>,
) -> ApiResult<Json<Sensor>> {
    user.ensure_admin()?;
    sensor.sensor_id = sensor_id.clone();
    validate_sensor(&sensor)?;

    if state.store.get_sensor(&sensor_id).await?.is_none() {
        return Err(ApiError::not_found(format!("sensor '{sensor_id}' is unknown")));
    }

    state.store.upsert_sensor(&sensor).await?;
    Ok(Json(sensor))
}

pub async fn delete_sensor(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(sensor_id): Path<String>,
) -> ApiResult<StatusCode> {
    user.ensure_admin()?;
    state.store.delete_sensor(&sensor_id).await?;
    info!(%sensor_id, "sensor deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn validate_sensor(sensor: &Sensor) -> Result<(), ApiError> {
    if sensor.sensor_id.trim().is_empty() {
        return Err(ApiError::validation("sensor_id must not be empty"));
    }
    if sensor.max_value < sensor.min_value {
        return Err(ApiError::validation("max_value must not be below min_value"));
    }
    Ok(())
}

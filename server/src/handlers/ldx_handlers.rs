use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::store::{InjectionRow, LdxFileRow, LdxStats};

use super::CurrentUser;

#[derive(Serialize, Deserialize)]
pub struct WatchDirectory {
    pub path: Option<String>,
}

pub async fn get_watch_directory(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<WatchDirectory>> {
    user.ensure_admin()?;
    Ok(Json(WatchDirectory {
        path: state.store.watch_dir().await?,
    }))
}

pub async fn put_watch_directory(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<WatchDirectory>,
) -> ApiResult<StatusCode> {
    user.ensure_admin()?;
    state.store.set_watch_dir(body.path.as_deref()).await?;
    info!(path = body.path.as_deref().unwrap_or("<none>"), "watch directory updated");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_files(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<LdxFileRow>>> {
    user.ensure_admin()?;
    Ok(Json(state.store.list_ldx_files().await?))
}

pub async fn list_injections(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<InjectionRow>>> {
    user.ensure_admin()?;
    if !state.store.ldx_file_exists(&name).await? {
        return Err(ApiError::not_found(format!("ldx file '{name}' is unknown")));
    }
    Ok(Json(state.store.list_injections(&name).await?))
}

pub async fn stats(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<LdxStats>>> {
    user.ensure_admin()?;
    Ok(Json(state.store.ldx_stats().await?))
}

#[derive(Serialize)]
pub struct ExportResponse {
    pub status: &'static str,
    pub filename: String,
}

/// Snapshot the database into the watch directory (or the data directory
/// when no watch directory is configured).
pub async fn export_db(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<ExportResponse>> {
    user.ensure_admin()?;

    let dir = match state.store.watch_dir().await? {
        Some(dir) => std::path::PathBuf::from(dir),
        None => state.config.data_dir.clone(),
    };

    let filename = format!("pitwall-export-{}.db", Utc::now().format("%Y%m%d-%H%M%S"));
    let destination = dir.join(&filename);
    state.store.export_snapshot(&destination).await?;
    info!(file = %destination.display(), "database exported");

    Ok(Json(ExportResponse {
        status: "ok",
        filename,
    }))
}

pub async fn clear_data(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<StatusCode> {
    user.ensure_admin()?;
    state.store.clear_runtime_data().await?;
    info!("runtime data cleared");
    Ok(StatusCode::NO_CONTENT)
}

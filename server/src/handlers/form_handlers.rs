use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::forms::FormSchema;
use crate::values::Prefill;

use super::{parse_role, CurrentUser};

pub async fn list_forms(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Json<Vec<FormSchema>> {
    Json(state.registry.list_for_user(&user.claims))
}

pub async fn get_values(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(role): Path<String>,
) -> ApiResult<Json<Prefill>> {
    let role = parse_role(&role)?;
    user.ensure_form_access(role)?;
    let prefill = state.values.get_prefill(role).await?;
    Ok(Json(prefill))
}

#[derive(Deserialize)]
pub struct SubmitBody {
    pub values: HashMap<String, serde_json::Value>,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub saved: u64,
}

pub async fn submit(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(role): Path<String>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<Json<SubmitResponse>> {
    let role = parse_role(&role)?;
    user.ensure_form_access(role)?;
    let saved = state.values.submit(role, user.record.id, &body.values).await?;
    Ok(Json(SubmitResponse { saved }))
}

pub async fn tabs(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(role): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let role = parse_role(&role)?;
    user.ensure_form_access(role)?;
    let schema = state
        .registry
        .get(role)
        .ok_or_else(|| ApiError::not_found(format!("no form is defined for role '{role}'")))?;
    Ok(Json(schema.tabs()))
}

#[derive(Serialize)]
pub struct ReloadResponse {
    pub forms: usize,
}

/// Re-read descriptor files from disk without a restart.
pub async fn reload(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<ReloadResponse>> {
    user.ensure_admin()?;
    let forms = state
        .registry
        .reload(&state.config.forms_dir)
        .map_err(|err| ApiError::Validation(err.to_string()))?;
    Ok(Json(ReloadResponse { forms }))
}

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use pitwall_auth::Role;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::store::{AuditPage, UserRecord};

use super::CurrentUser;

const MAX_USERNAME_LEN: usize = 64;

#[derive(Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_audit_limit")]
    pub limit: i64,
}

fn default_audit_limit() -> i64 {
    50
}

pub async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<UserRecord>>> {
    user.ensure_admin()?;
    Ok(Json(state.store.list_users().await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(new_user): Json<NewUser>,
) -> ApiResult<Json<UserRecord>> {
    user.ensure_admin()?;

    let username = new_user.username.trim();
    validate_username(username)?;

    let roles = parse_roles(&new_user.roles)?;
    validate_role_shape(new_user.is_admin, &roles)?;

    let password_hash = hash_password(&new_user.password)?;
    let created = state
        .store
        .create_user(username, &password_hash, new_user.is_admin, &roles)
        .await
        .map_err(|err| match err {
            crate::store::StoreError::Conflict(_) => {
                ApiError::Conflict(format!("username '{username}' is already taken"))
            }
            other => other.into(),
        })?;

    info!(username = %created.username, is_admin = created.is_admin, "user created");
    Ok(Json(created))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.ensure_admin()?;
    state.store.delete_user(user_id).await?;
    info!(%user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<StatusCode> {
    user.ensure_admin()?;
    let password_hash = hash_password(&payload.password)?;
    state.store.update_password(user_id, &password_hash).await?;
    info!(%user_id, "password reset");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_audit(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<AuditPage>> {
    user.ensure_admin()?;
    let offset = query.offset.max(0);
    let limit = query.limit.clamp(1, 500);
    Ok(Json(state.store.list_audit(offset, limit).await?))
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err(ApiError::validation("username must not be empty"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::validation(format!(
            "username exceeds {MAX_USERNAME_LEN} characters"
        )));
    }
    let ok = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !ok {
        return Err(ApiError::validation(
            "username may only contain letters, digits, '_', '.', and '-'",
        ));
    }
    Ok(())
}

fn parse_roles(raw: &[String]) -> Result<Vec<Role>, ApiError> {
    raw.iter()
        .map(|value| {
            Role::parse(value)
                .ok_or_else(|| ApiError::validation(format!("unknown role '{value}'")))
        })
        .collect()
}

/// Admins carry no subteam roles; members belong to one or two subteams.
fn validate_role_shape(is_admin: bool, roles: &[Role]) -> Result<(), ApiError> {
    if is_admin {
        if !roles.is_empty() {
            return Err(ApiError::validation("administrators must not have roles"));
        }
        return Ok(());
    }
    if roles.is_empty() || roles.len() > 2 {
        return Err(ApiError::validation(
            "non-admin users need one or two subteam roles",
        ));
    }
    let mut seen = roles.to_vec();
    seen.sort();
    seen.dedup();
    if seen.len() != roles.len() {
        return Err(ApiError::validation("duplicate role"));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    if password.trim().is_empty() {
        return Err(ApiError::validation("password must not be empty"));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ApiError::Internal(anyhow::anyhow!("failed to hash password: {err}")))
}

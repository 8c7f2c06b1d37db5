use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use axum::extract::State;
use axum::{Form, Json};
use pitwall_auth::ALL_ROLES;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::store::UserRecord;

use super::CurrentUser;

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

/// Unknown-user and bad-password failures are deliberately distinct
/// messages (product requirement).
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> ApiResult<Json<LoginResponse>> {
    let Some((user, password_hash)) = state.store.find_user_for_login(&form.username).await?
    else {
        state.metrics.login_attempt("unknown_user");
        return Err(ApiError::Unauthorized("Unknown username".into()));
    };

    let valid = PasswordHash::new(&password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(form.password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false);

    if !valid {
        state.metrics.login_attempt("bad_password");
        return Err(ApiError::Unauthorized("Incorrect password".into()));
    }

    let access_token = state
        .verifier
        .issue(&user.username, user.id, user.is_admin, &user.roles)
        .map_err(|err| ApiError::Internal(anyhow::anyhow!(err)))?;

    state.metrics.login_attempt("success");
    info!(username = %user.username, "login succeeded");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
    }))
}

pub async fn me(user: CurrentUser) -> Json<UserRecord> {
    Json(user.record)
}

/// The closed subteam role set.
pub async fn list_roles(_user: CurrentUser) -> Json<Vec<&'static str>> {
    Json(ALL_ROLES.iter().map(|role| role.as_str()).collect())
}

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::roles::Role;

/// Application-focused representation of verified JWT claims.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    /// Username the token was issued for.
    pub subject: String,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub roles: Vec<Role>,
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    /// Convenience helper for role checks.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClaimsRepr {
    pub sub: String,
    pub uid: String,
    pub is_admin: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let user_id = Uuid::parse_str(&value.uid)
            .map_err(|_| AuthError::InvalidClaim("uid", value.uid.clone()))?;

        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;

        let roles = value
            .roles
            .iter()
            .map(|raw| Role::parse(raw).ok_or_else(|| AuthError::UnknownRole(raw.clone())))
            .collect::<AuthResult<Vec<Role>>>()?;

        Ok(Self {
            subject: value.sub,
            user_id,
            is_admin: value.is_admin,
            roles,
            expires_at,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(value)
            .map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        Claims::try_from(repr)
    }
}

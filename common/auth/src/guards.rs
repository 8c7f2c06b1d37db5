use axum::http::StatusCode;

use crate::claims::Claims;
use crate::roles::Role;

#[derive(Debug, Clone)]
pub enum GuardError {
    AdminRequired,
    FormAccessDenied { role: Role },
}

impl GuardError {
    pub fn into_response(self) -> (StatusCode, String) {
        match self {
            GuardError::AdminRequired => (
                StatusCode::FORBIDDEN,
                "Administrator access required".to_string(),
            ),
            GuardError::FormAccessDenied { role } => (
                StatusCode::FORBIDDEN,
                format!("Not a member of subteam '{role}'"),
            ),
        }
    }
}

impl From<GuardError> for (StatusCode, String) {
    fn from(value: GuardError) -> Self {
        value.into_response()
    }
}

pub fn ensure_admin(claims: &Claims) -> Result<(), GuardError> {
    if claims.is_admin {
        Ok(())
    } else {
        Err(GuardError::AdminRequired)
    }
}

/// Admins see every form; everyone else only the forms of their subteams.
pub fn ensure_form_access(claims: &Claims, role: Role) -> Result<(), GuardError> {
    if claims.is_admin || claims.has_role(role) {
        Ok(())
    } else {
        Err(GuardError::FormAccessDenied { role })
    }
}

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::claims::{Claims, ClaimsRepr};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::roles::Role;

/// Issues and verifies HS256 access tokens with a single shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    config: JwtConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtVerifier {
    pub fn new(config: JwtConfig) -> Self {
        let encoding = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding,
            decoding,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Issue an access token for the given user identity.
    pub fn issue(
        &self,
        username: &str,
        user_id: Uuid,
        is_admin: bool,
        roles: &[Role],
    ) -> AuthResult<String> {
        let exp = (Utc::now() + self.config.ttl).timestamp();
        let repr = ClaimsRepr {
            sub: username.to_owned(),
            uid: user_id.to_string(),
            is_admin,
            roles: roles.iter().map(|role| role.as_str().to_owned()).collect(),
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &repr, &self.encoding)
            .map_err(|err| AuthError::Signing(err.to_string()))
    }

    /// Verify signature and expiry, returning the decoded claims.
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.leeway_seconds.into();
        validation.validate_aud = false;

        let token_data = decode::<Value>(token, &self.decoding, &validation)?;
        let claims = Claims::try_from(token_data.claims)?;
        debug!(subject = %claims.subject, "verified JWT successfully");
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(JwtConfig::new("unit-test-secret"))
    }

    #[test]
    fn issue_verify_roundtrip() {
        let verifier = verifier();
        let uid = Uuid::new_v4();
        let token = verifier
            .issue("dave", uid, false, &[Role::Drivetrain])
            .expect("issue");

        let claims = verifier.verify(&token).expect("verify");
        assert_eq!(claims.subject, "dave");
        assert_eq!(claims.user_id, uid);
        assert_eq!(claims.roles, vec![Role::Drivetrain]);
        assert!(!claims.is_admin);
        assert!(claims.expires_at > Utc::now());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = verifier()
            .issue("dave", Uuid::new_v4(), true, &[])
            .expect("issue");

        let other = JwtVerifier::new(JwtConfig::new("different-secret"));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_expired_token() {
        let mut config = JwtConfig::new("unit-test-secret").with_leeway(0);
        config.ttl = Duration::hours(-1);
        let verifier = JwtVerifier::new(config);

        let token = verifier
            .issue("dave", Uuid::new_v4(), false, &[Role::Aero])
            .expect("issue");

        let err = verifier.verify(&token).expect_err("expired");
        assert!(matches!(err, AuthError::Expired));
    }
}

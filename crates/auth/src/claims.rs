use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use campus_core::{OrganizationId, UserId};

use crate::{AuthUser, Role};

/// Access-token claims model (transport-agnostic).
///
/// This is the minimal set of claims the platform expects once a bearer token
/// has been decoded and its signature verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Roles granted to the caller.
    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub subject_scopes: Vec<String>,

    #[serde(default)]
    pub organization_id: Option<OrganizationId>,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

impl AccessClaims {
    pub fn into_auth_user(self) -> AuthUser {
        AuthUser {
            id: self.sub,
            roles: self.roles,
            subject_scopes: self.subject_scopes,
            organization_id: self.organization_id,
            permissions: Vec::new(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Deterministically validate token claims.
///
/// Note: this validates the *claims* only. Signature verification happens in
/// a [`TokenValidator`].
pub fn validate_claims(claims: &AccessClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Decodes and verifies a bearer token into claims.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenValidationError>;
}

/// HS256 shared-secret validator.
pub struct Hs256TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256TokenValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time window is checked by `validate_claims` against the chrono fields.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl TokenValidator for Hs256TokenValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    fn claims(now: DateTime<Utc>) -> AccessClaims {
        AccessClaims {
            sub: UserId::new(),
            roles: vec![Role::TEACHER],
            subject_scopes: vec!["mathematics".to_string()],
            organization_id: Some(OrganizationId::new()),
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(10),
        }
    }

    fn sign(claims: &AccessClaims, secret: &str) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips_into_auth_user() {
        let now = Utc::now();
        let c = claims(now);
        let token = sign(&c, "secret");

        let decoded = Hs256TokenValidator::new("secret").validate(&token, now).unwrap();
        assert_eq!(decoded, c);

        let user = decoded.into_auth_user();
        assert!(user.has_role(&Role::TEACHER));
        assert_eq!(user.subject_scopes, vec!["mathematics".to_string()]);
    }

    #[test]
    fn wrong_secret_is_malformed() {
        let now = Utc::now();
        let token = sign(&claims(now), "secret");
        let err = Hs256TokenValidator::new("other").validate(&token, now).unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[test]
    fn expired_claims_are_rejected() {
        let now = Utc::now();
        let c = claims(now);
        assert_eq!(
            validate_claims(&c, c.expires_at),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&c, c.issued_at - Duration::seconds(1)),
            Err(TokenValidationError::NotYetValid)
        );
    }
}

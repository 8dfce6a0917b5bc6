use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::Extensions;
use axum::http::request::Parts;

use campus_auth::{Ability, AuthUser};

/// Identity decoded from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUser(pub AuthUser);

/// Token identity merged with the caller's directory profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUserContext(pub AuthUser);

/// Ability built by the guard for this request.
///
/// Every guarded route finds it in the request extensions, anonymous callers
/// included.
#[derive(Debug, Clone)]
pub struct RequestAbility(pub Arc<Ability>);

impl RequestAbility {
    pub fn ability(&self) -> &Ability {
        &self.0
    }
}

/// The enriched caller when enrichment ran, else the raw token identity.
pub fn resolve_caller(extensions: &Extensions) -> Option<&AuthUser> {
    extensions
        .get::<AuthUserContext>()
        .map(|ctx| &ctx.0)
        .or_else(|| extensions.get::<TokenUser>().map(|token| &token.0))
}

/// Extractor for the resolved caller; `None` for anonymous requests.
#[derive(Debug, Clone)]
pub struct Caller(pub Option<AuthUser>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller(resolve_caller(&parts.extensions).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use campus_auth::Role;
    use campus_core::{OrganizationId, UserId};

    use super::*;

    #[test]
    fn enriched_identity_wins_over_token_identity() {
        let id = UserId::new();
        let mut extensions = Extensions::new();
        extensions.insert(TokenUser(AuthUser::new(id)));
        extensions.insert(AuthUserContext(
            AuthUser::new(id)
                .with_roles([Role::TEACHER])
                .with_organization(OrganizationId::new()),
        ));

        let caller = resolve_caller(&extensions).unwrap();
        assert!(caller.has_role(&Role::TEACHER));
    }

    #[test]
    fn falls_back_to_token_identity() {
        let id = UserId::new();
        let mut extensions = Extensions::new();
        extensions.insert(TokenUser(AuthUser::new(id)));

        assert_eq!(resolve_caller(&extensions).map(|u| u.id), Some(id));
    }

    #[test]
    fn anonymous_without_either() {
        assert!(resolve_caller(&Extensions::new()).is_none());
    }
}

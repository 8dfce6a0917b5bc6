use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use campus_auth::{AuthUser, Role};
use campus_core::{OrganizationId, UserId};

/// Directory data merged into a token identity during enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub organization_id: Option<OrganizationId>,
    pub subject_scopes: Vec<String>,
    pub extra_roles: Vec<Role>,
}

impl UserProfile {
    /// Merge into `user`. Token values win for the organization; scopes and
    /// roles are unioned, keeping first occurrence order.
    pub fn apply_to(&self, mut user: AuthUser) -> AuthUser {
        if user.organization_id.is_none() {
            user.organization_id = self.organization_id;
        }
        for scope in &self.subject_scopes {
            if !user.subject_scopes.contains(scope) {
                user.subject_scopes.push(scope.clone());
            }
        }
        for role in &self.extra_roles {
            if !user.has_role(role) {
                user.roles.push(role.clone());
            }
        }
        user
    }
}

pub trait UserDirectory: Send + Sync {
    fn profile(&self, user_id: UserId) -> Option<UserProfile>;
    fn upsert(&self, user_id: UserId, profile: UserProfile);
}

impl<S> UserDirectory for Arc<S>
where
    S: UserDirectory + ?Sized,
{
    fn profile(&self, user_id: UserId) -> Option<UserProfile> {
        (**self).profile(user_id)
    }

    fn upsert(&self, user_id: UserId, profile: UserProfile) {
        (**self).upsert(user_id, profile)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    inner: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn profile(&self, user_id: UserId) -> Option<UserProfile> {
        self.inner.read().ok()?.get(&user_id).cloned()
    }

    fn upsert(&self, user_id: UserId, profile: UserProfile) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(user_id, profile);
        }
    }
}

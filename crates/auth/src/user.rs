//! Authenticated caller context.

use serde::{Deserialize, Serialize};

use campus_core::{OrganizationId, UserId};

use crate::Role;

/// Resolved caller identity, produced once per request by authentication.
///
/// Immutable for the lifetime of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Course subjects the caller is scoped to (e.g. "mathematics").
    #[serde(default)]
    pub subject_scopes: Vec<String>,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl AuthUser {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            roles: Vec::new(),
            subject_scopes: Vec::new(),
            organization_id: None,
            permissions: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_subject_scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.subject_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

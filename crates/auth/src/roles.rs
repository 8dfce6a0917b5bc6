use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier carried by a caller.
///
/// Roles are opaque strings on the wire; the well-known ones that drive the
/// ability rules are exposed as constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Platform operator; manages every subject unconditionally.
    pub const SYSTEM_ADMIN: Role = Role(Cow::Borrowed("system-admin"));
    /// Administrator scoped to one organization.
    pub const ORGANIZATION_ADMIN: Role = Role(Cow::Borrowed("organization-admin"));
    pub const TEACHER: Role = Role(Cow::Borrowed("teacher"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_and_borrowed_roles_compare_equal() {
        assert_eq!(Role::new(String::from("teacher")), Role::TEACHER);
        assert_eq!(Role::SYSTEM_ADMIN.to_string(), "system-admin");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Role::ORGANIZATION_ADMIN).unwrap();
        assert_eq!(json, "\"organization-admin\"");
    }
}

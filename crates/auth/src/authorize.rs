//! Declared requirements and their evaluation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Ability, Action, AttributeBag, Field, FieldValue, SubjectType};

/// Requirement attached to a protected operation.
///
/// `conditions`, when present, describe attributes of the target record; the
/// caller must hold a rule whose conditions those attributes satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAbility {
    pub action: Action,
    pub subject: SubjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<BTreeMap<Field, FieldValue>>,
}

impl RequiredAbility {
    pub fn new(action: Action, subject: SubjectType) -> Self {
        Self {
            action,
            subject,
            conditions: None,
        }
    }

    pub fn with_condition(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.conditions
            .get_or_insert_with(BTreeMap::new)
            .insert(field, value.into());
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: cannot {action} {subject}")]
    Forbidden { action: Action, subject: SubjectType },
}

/// Check a single requirement.
///
/// - No IO
/// - No panics
pub fn authorize(ability: &Ability, required: &RequiredAbility) -> Result<(), AuthzError> {
    let granted = match &required.conditions {
        None => ability.can(required.action, required.subject),
        Some(conditions) => {
            let bag = AttributeBag {
                subject_type: required.subject,
                fields: conditions.clone(),
            };
            ability.can_on(required.action, &bag)
        }
    };

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            action: required.action,
            subject: required.subject,
        })
    }
}

/// Conjunctive check: the first failing requirement denies the operation.
pub fn authorize_all(ability: &Ability, required: &[RequiredAbility]) -> Result<(), AuthzError> {
    required.iter().try_for_each(|r| authorize(ability, r))
}

#[cfg(test)]
mod tests {
    use campus_core::{OrganizationId, UserId};

    use super::*;
    use crate::{AbilityFactory, AuthUser, Role};

    fn org_admin(org: OrganizationId) -> Ability {
        let user = AuthUser::new(UserId::new())
            .with_roles([Role::ORGANIZATION_ADMIN])
            .with_organization(org);
        AbilityFactory::new().create_for_user(Some(&user))
    }

    #[test]
    fn empty_requirement_list_is_authorized() {
        let ability = AbilityFactory::new().create_for_user(None);
        assert_eq!(authorize_all(&ability, &[]), Ok(()));
    }

    #[test]
    fn conditions_are_checked_against_declared_attributes() {
        let org1 = OrganizationId::new();
        let ability = org_admin(org1);

        let own = RequiredAbility::new(Action::Manage, SubjectType::Course)
            .with_condition(Field::OrganizationId, org1);
        let foreign = RequiredAbility::new(Action::Manage, SubjectType::Course)
            .with_condition(Field::OrganizationId, OrganizationId::new());

        assert_eq!(authorize(&ability, &own), Ok(()));
        assert_eq!(
            authorize(&ability, &foreign),
            Err(AuthzError::Forbidden {
                action: Action::Manage,
                subject: SubjectType::Course
            })
        );
    }

    #[test]
    fn one_failing_requirement_denies_all() {
        let ability = org_admin(OrganizationId::new());
        let required = [
            RequiredAbility::new(Action::Manage, SubjectType::HttpRequestLog),
            RequiredAbility::new(Action::Manage, SubjectType::All),
        ];
        let err = authorize_all(&ability, &required).unwrap_err();
        assert_eq!(err.to_string(), "forbidden: cannot manage all");
    }
}

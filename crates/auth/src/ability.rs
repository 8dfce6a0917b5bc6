//! Per-request permission set.
//!
//! An [`Ability`] is a list of additive [`Rule`]s. There is no deny rule, so
//! the effective answer for `(action, subject, record)` is the logical OR of
//! every applicable rule's condition.

use serde::{Deserialize, Serialize};

use crate::{Condition, Subject, SubjectType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Subsumes every other action for the subject.
    Manage,
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Manage => "manage",
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Whether a rule granting `self` also grants `requested`.
    pub fn covers(&self, requested: Action) -> bool {
        *self == Action::Manage || *self == requested
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One grant: `action` on `subject`, optionally restricted by `conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: Action,
    pub subject: SubjectType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Condition>,
}

impl Rule {
    pub fn applies_to(&self, action: Action, subject: SubjectType) -> bool {
        self.action.covers(action) && self.subject.covers(subject)
    }
}

/// Row-level visibility derived from an ability, for storage queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessFilter {
    /// At least one unconditional rule applies.
    All,
    /// No rule applies; the query can be skipped.
    Nothing,
    /// Visible when any of the conditions matches.
    AnyOf(Vec<Condition>),
}

impl AccessFilter {
    pub fn permits(&self, record: &dyn Subject) -> bool {
        match self {
            AccessFilter::All => true,
            AccessFilter::Nothing => false,
            AccessFilter::AnyOf(conditions) => conditions.iter().any(|c| c.matches(record)),
        }
    }
}

/// Immutable rule set built by [`crate::AbilityFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Ability {
    rules: Vec<Rule>,
}

impl Ability {
    pub(crate) fn builder() -> AbilityBuilder {
        AbilityBuilder::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    fn applicable(&self, action: Action, subject: SubjectType) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.applies_to(action, subject))
    }

    /// Type-level check: true when any rule for the pair exists, conditional or not.
    pub fn can(&self, action: Action, subject: SubjectType) -> bool {
        self.applicable(action, subject).next().is_some()
    }

    /// Record-level check: some applicable rule is unconditional or its condition matches.
    pub fn can_on(&self, action: Action, record: &dyn Subject) -> bool {
        self.applicable(action, record.subject_type())
            .any(|r| r.conditions.as_ref().is_none_or(|c| c.matches(record)))
    }

    pub fn cannot_on(&self, action: Action, record: &dyn Subject) -> bool {
        !self.can_on(action, record)
    }

    /// Blanket `Manage` on `all`, granted only to platform operators.
    pub fn is_system_admin(&self) -> bool {
        self.rules.iter().any(|r| {
            r.action == Action::Manage && r.subject == SubjectType::All && r.conditions.is_none()
        })
    }

    pub fn accessible_filter(&self, action: Action, subject: SubjectType) -> AccessFilter {
        let mut conditions = Vec::new();
        for rule in self.applicable(action, subject) {
            match &rule.conditions {
                None => return AccessFilter::All,
                Some(c) => conditions.push(c.clone()),
            }
        }

        if conditions.is_empty() {
            AccessFilter::Nothing
        } else {
            AccessFilter::AnyOf(conditions)
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AbilityBuilder {
    rules: Vec<Rule>,
}

impl AbilityBuilder {
    pub(crate) fn can(&mut self, action: Action, subject: SubjectType) -> &mut Self {
        self.rules.push(Rule {
            action,
            subject,
            conditions: None,
        });
        self
    }

    pub(crate) fn can_where(&mut self, action: Action, subject: SubjectType, conditions: Condition) -> &mut Self {
        self.rules.push(Rule {
            action,
            subject,
            conditions: Some(conditions),
        });
        self
    }

    pub(crate) fn build(self) -> Ability {
        Ability { rules: self.rules }
    }
}

//! Structural conditions attached to ability rules.
//!
//! A [`Condition`] is a small filter AST (equals / in / and) over the
//! queryable fields of a subject. It is evaluated in-process against a
//! [`Subject`] and translated into SQL by the storage layer, so both sides
//! agree on row visibility.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campus_core::{CourseId, LessonId, LogId, OrganizationId, UserId};

use crate::Subject;

/// Queryable field of a protected record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    OrganizationId,
    InstructorId,
    UserId,
    Subject,
    IsArchived,
    /// Organization of the course that owns a lesson.
    CourseOrganizationId,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::OrganizationId => "organization_id",
            Field::InstructorId => "instructor_id",
            Field::UserId => "user_id",
            Field::Subject => "subject",
            Field::IsArchived => "is_archived",
            Field::CourseOrganizationId => "course.organization_id",
        }
    }
}

impl core::fmt::Display for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar value a field can be compared against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Uuid(Uuid),
    Text(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        FieldValue::Uuid(value)
    }
}

macro_rules! impl_from_id {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(value: $t) -> Self {
                    FieldValue::Uuid(*value.as_uuid())
                }
            }
        )*
    };
}

impl_from_id!(UserId, OrganizationId, CourseId, LessonId, LogId);

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Filter expression over a subject's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Eq { field: Field, value: FieldValue },
    In { field: Field, values: Vec<FieldValue> },
    And { all: Vec<Condition> },
}

impl Condition {
    pub fn eq(field: Field, value: impl Into<FieldValue>) -> Self {
        Condition::Eq {
            field,
            value: value.into(),
        }
    }

    pub fn one_of<V: Into<FieldValue>>(field: Field, values: impl IntoIterator<Item = V>) -> Self {
        Condition::In {
            field,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(all: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And {
            all: all.into_iter().collect(),
        }
    }

    /// Evaluate against a record. A field the subject does not expose never matches.
    pub fn matches(&self, subject: &dyn Subject) -> bool {
        match self {
            Condition::Eq { field, value } => subject.field(*field).as_ref() == Some(value),
            Condition::In { field, values } => subject
                .field(*field)
                .is_some_and(|actual| values.contains(&actual)),
            Condition::And { all } => all.iter().all(|c| c.matches(subject)),
        }
    }

    /// Fields referenced anywhere in the expression, in declaration order.
    pub fn fields(&self) -> Vec<Field> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<Field>) {
        match self {
            Condition::Eq { field, .. } | Condition::In { field, .. } => {
                if !out.contains(field) {
                    out.push(*field);
                }
            }
            Condition::And { all } => all.iter().for_each(|c| c.collect_fields(out)),
        }
    }
}

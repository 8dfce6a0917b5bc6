//! Protected subject kinds and the records that carry them.
//!
//! Each record names its kind explicitly through [`Subject::subject_type`];
//! there is no shape-based detection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use campus_core::{CourseId, LessonId, OrganizationId, UserId};

use crate::{Field, FieldValue};

/// Closed set of protected entity kinds. `All` is the wildcard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    #[serde(rename = "all")]
    All,
    Course,
    Lesson,
    User,
    HttpRequestLog,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::All => "all",
            SubjectType::Course => "Course",
            SubjectType::Lesson => "Lesson",
            SubjectType::User => "User",
            SubjectType::HttpRequestLog => "HttpRequestLog",
        }
    }

    /// Whether a rule declared for `self` applies to `other`.
    pub fn covers(&self, other: SubjectType) -> bool {
        *self == SubjectType::All || *self == other
    }
}

impl core::fmt::Display for SubjectType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that can be checked against ability conditions.
pub trait Subject {
    fn subject_type(&self) -> SubjectType;

    /// Value of a queryable field, `None` when the record has no such field.
    fn field(&self, field: Field) -> Option<FieldValue>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: CourseId,
    pub organization_id: Option<OrganizationId>,
    pub instructor_id: Option<UserId>,
    pub subject: String,
    pub title: String,
    pub is_archived: bool,
}

impl Subject for CourseRecord {
    fn subject_type(&self) -> SubjectType {
        SubjectType::Course
    }

    fn field(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Id => Some(self.id.into()),
            Field::OrganizationId => Some(self.organization_id.into()),
            Field::InstructorId => Some(self.instructor_id.into()),
            Field::Subject => Some(self.subject.clone().into()),
            Field::IsArchived => Some(self.is_archived.into()),
            Field::UserId | Field::CourseOrganizationId => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRecord {
    pub id: LessonId,
    pub course_id: CourseId,
    pub instructor_id: Option<UserId>,
    /// Denormalized from the owning course.
    pub course_organization_id: Option<OrganizationId>,
    pub title: String,
}

impl Subject for LessonRecord {
    fn subject_type(&self) -> SubjectType {
        SubjectType::Lesson
    }

    fn field(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Id => Some(self.id.into()),
            Field::InstructorId => Some(self.instructor_id.into()),
            Field::CourseOrganizationId => Some(self.course_organization_id.into()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub display_name: String,
}

impl Subject for UserRecord {
    fn subject_type(&self) -> SubjectType {
        SubjectType::User
    }

    fn field(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Id => Some(self.id.into()),
            Field::OrganizationId => Some(self.organization_id.into()),
            _ => None,
        }
    }
}

/// Partial record built from the attributes a requirement declares.
///
/// Only the listed fields exist; conditions over any other field do not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeBag {
    pub subject_type: SubjectType,
    pub fields: BTreeMap<Field, FieldValue>,
}

impl AttributeBag {
    pub fn new(subject_type: SubjectType) -> Self {
        Self {
            subject_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field, value.into());
        self
    }
}

impl Subject for AttributeBag {
    fn subject_type(&self) -> SubjectType {
        self.subject_type
    }

    fn field(&self, field: Field) -> Option<FieldValue> {
        self.fields.get(&field).cloned()
    }
}

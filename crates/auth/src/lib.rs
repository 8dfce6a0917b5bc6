//! `campus-auth`: caller identity and attribute-based authorization.
//!
//! Everything here is pure: no IO, no HTTP, no storage. The API layer resolves
//! an [`AuthUser`], asks the [`AbilityFactory`] for an [`Ability`] and checks
//! declared [`RequiredAbility`] values against it. Repositories translate the
//! same ability into row filters via [`Ability::accessible_filter`].

pub mod ability;
pub mod authorize;
pub mod claims;
pub mod condition;
pub mod factory;
pub mod roles;
pub mod subject;
pub mod user;

pub use ability::{AccessFilter, Ability, Action, Rule};
pub use authorize::{authorize, authorize_all, AuthzError, RequiredAbility};
pub use claims::{AccessClaims, Hs256TokenValidator, TokenValidationError, TokenValidator, validate_claims};
pub use condition::{Condition, Field, FieldValue};
pub use factory::AbilityFactory;
pub use roles::Role;
pub use subject::{AttributeBag, CourseRecord, LessonRecord, Subject, SubjectType, UserRecord};
pub use user::AuthUser;

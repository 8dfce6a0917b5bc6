//! `campus-core`: identifiers and the error model shared by every crate.
//!
//! This crate stays free of storage and transport concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{CourseId, LessonId, LogId, OrganizationId, UserId};

//! In-process read models consulted by the HTTP layer.

pub mod course_catalog;
pub mod user_directory;

pub use course_catalog::{CourseCatalog, InMemoryCourseCatalog};
pub use user_directory::{InMemoryUserDirectory, UserDirectory, UserProfile};

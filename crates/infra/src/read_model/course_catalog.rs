use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use campus_auth::{AccessFilter, CourseRecord};
use campus_core::CourseId;

/// Course storage for the catalog routes.
///
/// Listing takes the caller's row filter so that only visible courses leave
/// the store.
pub trait CourseCatalog: Send + Sync {
    fn get(&self, id: CourseId) -> Option<CourseRecord>;
    fn insert(&self, course: CourseRecord);
    /// Returns the removed course, if it existed.
    fn remove(&self, id: CourseId) -> Option<CourseRecord>;
    fn list(&self, filter: &AccessFilter) -> Vec<CourseRecord>;
}

impl<S> CourseCatalog for Arc<S>
where
    S: CourseCatalog + ?Sized,
{
    fn get(&self, id: CourseId) -> Option<CourseRecord> {
        (**self).get(id)
    }

    fn insert(&self, course: CourseRecord) {
        (**self).insert(course)
    }

    fn remove(&self, id: CourseId) -> Option<CourseRecord> {
        (**self).remove(id)
    }

    fn list(&self, filter: &AccessFilter) -> Vec<CourseRecord> {
        (**self).list(filter)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCourseCatalog {
    inner: RwLock<HashMap<CourseId, CourseRecord>>,
}

impl InMemoryCourseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_courses(courses: impl IntoIterator<Item = CourseRecord>) -> Self {
        Self {
            inner: RwLock::new(courses.into_iter().map(|c| (c.id, c)).collect()),
        }
    }
}

impl CourseCatalog for InMemoryCourseCatalog {
    fn get(&self, id: CourseId) -> Option<CourseRecord> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    fn insert(&self, course: CourseRecord) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(course.id, course);
        }
    }

    fn remove(&self, id: CourseId) -> Option<CourseRecord> {
        self.inner.write().ok()?.remove(&id)
    }

    fn list(&self, filter: &AccessFilter) -> Vec<CourseRecord> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        let mut courses: Vec<CourseRecord> = map.values().filter(|c| filter.permits(*c)).cloned().collect();
        courses.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        courses
    }
}

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    routing::{delete, post},
};

use campus_auth::{Action, AuthzError, CourseRecord, RequiredAbility, SubjectType};
use campus_core::{CourseId, DomainError};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::{authz_error_to_response, require};
use crate::context::{Caller, RequestAbility};

pub fn router() -> Router {
    let read = RequiredAbility::new(Action::Read, SubjectType::Course);
    let create = RequiredAbility::new(Action::Create, SubjectType::Course);
    let remove = RequiredAbility::new(Action::Delete, SubjectType::Course);

    Router::new()
        .route(
            "/",
            get(list_courses)
                .route_layer(require(&[read.clone()]))
                .merge(post(create_course).route_layer(require(&[create]))),
        )
        .route(
            "/:id",
            get(get_course)
                .route_layer(require(&[read]))
                .merge(delete(delete_course).route_layer(require(&[remove]))),
        )
}

fn forbidden(action: Action) -> axum::response::Response {
    authz_error_to_response(AuthzError::Forbidden {
        action,
        subject: SubjectType::Course,
    })
}

fn parse_course_id(raw: &str) -> Result<CourseId, axum::response::Response> {
    raw.trim().parse().map_err(errors::domain_error_to_response)
}

fn course_not_found() -> axum::response::Response {
    errors::domain_error_to_response(DomainError::not_found())
}

pub async fn list_courses(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ability): Extension<RequestAbility>,
) -> axum::response::Response {
    let filter = ability.ability().accessible_filter(Action::Read, SubjectType::Course);
    let items = services.catalog.list(&filter);
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn create_course(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ability): Extension<RequestAbility>,
    Caller(caller): Caller,
    Json(body): Json<dto::CreateCourseRequest>,
) -> axum::response::Response {
    let course = CourseRecord {
        id: CourseId::new(),
        organization_id: body
            .organization_id
            .or_else(|| caller.as_ref().and_then(|user| user.organization_id)),
        instructor_id: body.instructor_id,
        subject: body.subject.trim().to_string(),
        title: body.title.trim().to_string(),
        is_archived: body.is_archived,
    };

    if course.title.is_empty() {
        return errors::domain_error_to_response(DomainError::validation("title is required"));
    }
    if ability.ability().cannot_on(Action::Create, &course) {
        return forbidden(Action::Create);
    }

    services.catalog.insert(course.clone());
    (StatusCode::CREATED, Json(course)).into_response()
}

pub async fn get_course(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ability): Extension<RequestAbility>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_course_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services.catalog.get(id) {
        None => course_not_found(),
        Some(course) if ability.ability().cannot_on(Action::Read, &course) => forbidden(Action::Read),
        Some(course) => (StatusCode::OK, Json(course)).into_response(),
    }
}

pub async fn delete_course(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ability): Extension<RequestAbility>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_course_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    let Some(course) = services.catalog.get(id) else {
        return course_not_found();
    };
    if ability.ability().cannot_on(Action::Delete, &course) {
        return forbidden(Action::Delete);
    }

    services.catalog.remove(id);
    StatusCode::NO_CONTENT.into_response()
}

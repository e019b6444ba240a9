use std::collections::BTreeMap;

use axum::extract::{
    rejection::{JsonRejection, QueryRejection},
    Extension, Json, Query,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::middleware::{ApiResponse, ApiResult, TenantPool};
use crate::services::registration_plan::flexible_int;
use crate::services::{
    CourseRef, DuplicationMode, LearnerRef, RegistrationOutcome, RegistrationScope, RegistrationService,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationKind {
    /// Every learner currently in the class
    Class,
    /// The learners listed in the request
    Students,
}

#[derive(Debug, Deserialize)]
pub struct RegisterCoursesRequest {
    #[serde(rename = "type")]
    pub kind: RegistrationKind,
    #[serde(default)]
    pub students: Vec<LearnerRef>,
    pub courses: Vec<CourseRef>,
    #[serde(flatten)]
    pub scope: RegistrationScope,
}

#[derive(Debug, Deserialize)]
pub struct DuplicateRequest {
    #[serde(deserialize_with = "flexible_int")]
    pub class_id: i64,
    #[serde(deserialize_with = "flexible_int")]
    pub term: i32,
    #[serde(deserialize_with = "flexible_int")]
    pub year: i32,
    #[serde(default)]
    pub mode: DuplicationMode,
}

#[derive(Debug, Deserialize)]
pub struct TermsQuery {
    #[serde(deserialize_with = "flexible_int")]
    pub class_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterRequest {
    pub students: Vec<LearnerRef>,
    /// Absent means every course the learners hold in scope
    #[serde(default)]
    pub courses: Option<Vec<CourseRef>>,
    #[serde(flatten)]
    pub scope: RegistrationScope,
}

#[derive(Debug, Serialize)]
pub struct TermsEntry {
    pub terms: Vec<i32>,
}

/// POST /portal/course-registrations
pub async fn register_courses(
    Extension(TenantPool(pool)): Extension<TenantPool>,
    payload: Result<Json<RegisterCoursesRequest>, JsonRejection>,
) -> ApiResult<RegistrationOutcome> {
    let Json(request) = payload?;
    let service = RegistrationService::new(pool);

    let outcome = match request.kind {
        RegistrationKind::Class => service.register_class(&request.courses, request.scope).await?,
        RegistrationKind::Students => {
            service
                .register_detailed(&request.students, &request.courses, request.scope)
                .await?
        }
    };

    Ok(ApiResponse::success(outcome).message("Courses registered successfully"))
}

/// POST /portal/course-registrations/duplicate
pub async fn duplicate_registration(
    Extension(TenantPool(pool)): Extension<TenantPool>,
    payload: Result<Json<DuplicateRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    RegistrationService::new(pool)
        .duplicate_registration(request.class_id, request.term, request.year, request.mode)
        .await?;

    Ok(ApiResponse::success(json!({
        "class_id": request.class_id,
        "term": request.term,
        "year": request.year,
        "mode": request.mode,
    }))
    .message("Registration copied successfully"))
}

/// GET /portal/course-registrations/terms?class_id=
pub async fn registration_terms(
    Extension(TenantPool(pool)): Extension<TenantPool>,
    query: Result<Query<TermsQuery>, QueryRejection>,
) -> ApiResult<BTreeMap<i32, TermsEntry>> {
    let Query(query) = query?;
    let grouped = RegistrationService::new(pool).registration_terms(query.class_id).await?;

    let sessions = grouped
        .into_iter()
        .map(|(year, terms)| (year, TermsEntry { terms: terms.into_iter().collect() }))
        .collect();
    Ok(ApiResponse::success(sessions))
}

/// DELETE /portal/course-registrations
pub async fn unregister_courses(
    Extension(TenantPool(pool)): Extension<TenantPool>,
    payload: Result<Json<UnregisterRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    let service = RegistrationService::new(pool);

    let removed = match &request.courses {
        Some(courses) => service.unregister(&request.students, courses, request.scope).await?,
        None => service.unregister_all_of(&request.students, request.scope).await?,
    };

    Ok(ApiResponse::success(json!({ "removed": removed })).message("Courses unregistered successfully"))
}

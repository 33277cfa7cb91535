use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::{
    ApiJson, ApiPath, ApiQuery, ApiResult, SharedState, clean, created, ok, ok_with_message,
    page_response, parse_enum, parse_required_enum, take_required, validate,
};
use crate::errors::{FieldErrors, SchoolError};
use crate::school::auth::{AdminUser, AuthUser};
use crate::school::models::*;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/sections", get(list_sections).post(create_section))
        .route(
            "/api/sections/{id}",
            get(get_section).put(update_section).delete(delete_section),
        )
}

#[derive(Debug, Deserialize)]
pub struct SectionQuery {
    pub search: Option<String>,
    pub grade_level: Option<String>,
    pub strand: Option<String>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSectionRequest {
    #[validate(
        required(message = "The name field is required."),
        length(max = 100, message = "The name may not be greater than 100 characters.")
    )]
    pub name: Option<String>,
    #[validate(required(message = "The grade level field is required."))]
    pub grade_level: Option<String>,
    #[validate(required(message = "The strand field is required."))]
    pub strand: Option<String>,
    pub adviser_id: Option<i64>,
    #[validate(length(max = 50))]
    pub room: Option<String>,
    #[validate(range(min = 1, max = 100, message = "The capacity must be between 1 and 100."))]
    pub capacity: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSectionRequest {
    #[validate(length(max = 100, message = "The name may not be greater than 100 characters."))]
    pub name: Option<String>,
    pub grade_level: Option<String>,
    pub strand: Option<String>,
    pub adviser_id: Option<i64>,
    #[validate(length(max = 50))]
    pub room: Option<String>,
    #[validate(range(min = 1, max = 100, message = "The capacity must be between 1 and 100."))]
    pub capacity: Option<i64>,
}

async fn list_sections(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<SectionQuery>,
) -> ApiResult<Json<Value>> {
    let filter = SectionFilter {
        search: clean(query.search),
        grade_level: parse_enum("grade_level", query.grade_level.as_deref())?,
        strand: parse_enum("strand", query.strand.as_deref())?,
    };
    let page = PageRequest::new(query.page, query.limit);
    let sections = state
        .db
        .call(move |db| db.list_sections(&filter, page))
        .await?;
    page_response("sections", sections, |s| s)
}

async fn get_section(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let section = state
        .db
        .call(move |db| db.get_section(id))
        .await?
        .ok_or_else(|| SchoolError::not_found("Section", id))?;
    ok("section", section)
}

async fn create_section(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiJson(request): ApiJson<CreateSectionRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    validate(&request)?;
    let mut errors = FieldErrors::new();
    let name = take_required(&mut errors, "name", request.name);
    errors.into_result()?;
    let new = NewSection {
        name,
        grade_level: parse_required_enum("grade_level", request.grade_level.as_deref())?,
        strand: parse_required_enum("strand", request.strand.as_deref())?,
        adviser_id: request.adviser_id,
        room: clean(request.room),
        capacity: request.capacity,
    };
    let section = state.db.call(move |db| db.create_section(&new)).await?;
    created("Section created successfully", "section", section)
}

async fn update_section(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateSectionRequest>,
) -> ApiResult<Json<Value>> {
    validate(&request)?;
    let changes = SectionChanges {
        name: clean(request.name),
        grade_level: parse_enum("grade_level", request.grade_level.as_deref())?,
        strand: parse_enum("strand", request.strand.as_deref())?,
        adviser_id: request.adviser_id,
        room: clean(request.room),
        capacity: request.capacity,
    };
    let section = state
        .db
        .call(move |db| db.update_section(id, &changes))
        .await?;
    ok_with_message("Section updated successfully", "section", section)
}

async fn delete_section(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let section = state.db.call(move |db| db.delete_section(id)).await?;
    ok_with_message("Section deleted successfully", "section", section)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::TestApp;
    use super::*;

    #[tokio::test]
    async fn test_section_capacity_range() {
        let app = TestApp::new();
        let (status, body) = app
            .admin(
                "POST",
                "/api/sections",
                Some(json!({"name": "Rizal", "grade_level": "Grade 7", "strand": "N/A", "capacity": 150})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["capacity"].is_array());
    }

    #[tokio::test]
    async fn test_section_with_missing_adviser() {
        let app = TestApp::new();
        let (status, body) = app
            .admin(
                "POST",
                "/api/sections",
                Some(json!({"name": "Rizal", "grade_level": "Grade 7", "strand": "N/A", "adviser_id": 42})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["adviser_id"].is_array());
    }

    #[tokio::test]
    async fn test_section_crud() {
        let app = TestApp::new();
        let payload = json!({"name": "Mabini", "grade_level": "Grade 8", "strand": "N/A", "room": "104"});
        let (status, body) = app.admin("POST", "/api/sections", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["section"]["id"].as_i64().unwrap();

        let (status, body) = app.admin("POST", "/api/sections", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["name"].is_array());

        let (_, body) = app.student("GET", "/api/sections?grade_level=Grade%208", None).await;
        assert_eq!(body["pagination"]["total"], 1);

        let (status, body) = app
            .admin("PUT", &format!("/api/sections/{id}"), Some(json!({"capacity": 35})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["section"]["capacity"], 35);

        let (status, _) = app.admin("DELETE", &format!("/api/sections/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

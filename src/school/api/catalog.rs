//! Grade-level and strand catalogs. Both share one request shape; `code`
//! only matters for strands.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::{
    ApiJson, ApiPath, ApiQuery, ApiResult, SearchQuery, SharedState, clean, created, ok,
    ok_with_message, page_response, validate,
};
use crate::errors::SchoolError;
use crate::school::auth::{AdminUser, AuthUser};
use crate::school::models::CatalogEntry;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/grade-levels", get(list_grade_levels).post(create_grade_level))
        .route(
            "/api/grade-levels/{id}",
            get(get_grade_level)
                .put(update_grade_level)
                .delete(delete_grade_level),
        )
        .route("/api/strands", get(list_strands).post(create_strand))
        .route(
            "/api/strands/{id}",
            get(get_strand).put(update_strand).delete(delete_strand),
        )
}

#[derive(Debug, Deserialize, Validate)]
pub struct CatalogRequest {
    #[validate(length(max = 100, message = "The name may not be greater than 100 characters."))]
    pub name: Option<String>,
    #[validate(length(max = 20, message = "The code may not be greater than 20 characters."))]
    pub code: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl CatalogRequest {
    fn into_entry(self) -> CatalogEntry {
        CatalogEntry {
            name: clean(self.name),
            code: clean(self.code),
            description: clean(self.description),
            is_active: self.is_active,
        }
    }
}

// ── Grade levels ──────────────────────────────────────────────────────

async fn list_grade_levels(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let page = query.page_request();
    let search = clean(query.search);
    let records = state
        .db
        .call(move |db| db.list_grade_levels(search.as_deref(), page))
        .await?;
    page_response("grade_levels", records, |r| r)
}

async fn get_grade_level(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let record = state
        .db
        .call(move |db| db.get_grade_level(id))
        .await?
        .ok_or_else(|| SchoolError::not_found("Grade level", id))?;
    ok("grade_level", record)
}

async fn create_grade_level(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiJson(request): ApiJson<CatalogRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    validate(&request)?;
    let entry = request.into_entry();
    let record = state
        .db
        .call(move |db| db.create_grade_level(&entry))
        .await?;
    created("Grade level created successfully", "grade_level", record)
}

async fn update_grade_level(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<CatalogRequest>,
) -> ApiResult<Json<Value>> {
    validate(&request)?;
    let entry = request.into_entry();
    let record = state
        .db
        .call(move |db| db.update_grade_level(id, &entry))
        .await?;
    ok_with_message("Grade level updated successfully", "grade_level", record)
}

async fn delete_grade_level(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let record = state.db.call(move |db| db.delete_grade_level(id)).await?;
    ok_with_message("Grade level deleted successfully", "grade_level", record)
}

// ── Strands ───────────────────────────────────────────────────────────

async fn list_strands(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let page = query.page_request();
    let search = clean(query.search);
    let records = state
        .db
        .call(move |db| db.list_strands(search.as_deref(), page))
        .await?;
    page_response("strands", records, |r| r)
}

async fn get_strand(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let record = state
        .db
        .call(move |db| db.get_strand(id))
        .await?
        .ok_or_else(|| SchoolError::not_found("Strand", id))?;
    ok("strand", record)
}

async fn create_strand(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiJson(request): ApiJson<CatalogRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    validate(&request)?;
    let entry = request.into_entry();
    let record = state.db.call(move |db| db.create_strand(&entry)).await?;
    created("Strand created successfully", "strand", record)
}

async fn update_strand(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<CatalogRequest>,
) -> ApiResult<Json<Value>> {
    validate(&request)?;
    let entry = request.into_entry();
    let record = state
        .db
        .call(move |db| db.update_strand(id, &entry))
        .await?;
    ok_with_message("Strand updated successfully", "strand", record)
}

async fn delete_strand(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let record = state.db.call(move |db| db.delete_strand(id)).await?;
    ok_with_message("Strand deleted successfully", "strand", record)
}

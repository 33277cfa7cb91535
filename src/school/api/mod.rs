//! JSON API: shared state, the response envelope, error mapping and the
//! router. Handlers for each resource live in the submodules.

mod auth;
mod catalog;
mod sections;
mod students;
mod subjects;
mod teachers;
mod users;

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::multipart::{Multipart, MultipartError};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use validator::Validate;

use super::auth::AuthUser;
use super::db::DbHandle;
use super::models::{Page, PageRequest};
use super::storage::LocalStorage;
use crate::errors::{FieldErrors, SchoolError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub storage: LocalStorage,
    /// Lifetime of issued tokens; 0 means they never expire.
    pub token_ttl_hours: u64,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

/// `SchoolError` at the HTTP boundary.
#[derive(Debug)]
pub struct ApiError(pub SchoolError);

impl From<SchoolError> for ApiError {
    fn from(err: SchoolError) -> Self {
        Self(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self(errors.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(SchoolError::validation("body", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(SchoolError::validation("query", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(SchoolError::validation("id", rejection.body_text()))
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self(SchoolError::validation("avatar", err.body_text()))
    }
}

fn error_body(message: &str, errors: Option<FieldErrors>) -> Value {
    match errors {
        Some(errors) => json!({"success": false, "message": message, "errors": errors}),
        None => json!({"success": false, "message": message}),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        if err.is_internal() {
            tracing::error!(error = ?err, "request failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body("Server Error", None)),
            )
                .into_response();
        }

        let message = err.to_string();
        let (status, errors) = match err {
            SchoolError::Validation(errors) => (StatusCode::UNPROCESSABLE_ENTITY, Some(errors)),
            SchoolError::InvalidEnum { field, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Some(FieldErrors::single(
                    field,
                    format!("The selected {} is invalid.", field.replace('_', " ")),
                )),
            ),
            SchoolError::DuplicateCode { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Some(FieldErrors::single("code", "The code has already been taken.")),
            ),
            SchoolError::DuplicateEmail { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Some(FieldErrors::single("email", "The email has already been taken.")),
            ),
            SchoolError::StudentNotFound { ref ids } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Some(FieldErrors::single(
                    "student_ids",
                    format!("The selected student ids are invalid: {ids:?}."),
                )),
            ),
            SchoolError::HasActiveEnrollments { .. } => (StatusCode::UNPROCESSABLE_ENTITY, None),
            SchoolError::NotFound { .. } => (StatusCode::NOT_FOUND, None),
            SchoolError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, None),
            SchoolError::Forbidden(_) => (StatusCode::FORBIDDEN, None),
            SchoolError::Database(_) | SchoolError::LockPoisoned | SchoolError::Other(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        (status, Json(error_body(&message, errors))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ── Extractors ────────────────────────────────────────────────────────

/// `Json` whose rejection goes through the error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query` whose rejection goes through the error envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// `Path` whose rejection goes through the error envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Numeric query parameter where `?page=` means the same as leaving it out.
pub(crate) fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// `?search=&page=&limit=` for the resources without extra filters.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub limit: Option<u32>,
}

impl SearchQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Run the derived validation rules.
pub(crate) fn validate<T: Validate>(request: &T) -> Result<(), SchoolError> {
    request.validate().map_err(SchoolError::from)
}

/// Trimmed text, `None` when blank.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_message(field: &str) -> String {
    format!("The {} field is required.", field.replace('_', " "))
}

/// Text that must be present and non-blank after trimming. A missing value
/// is recorded in `errors` and comes back empty.
pub(crate) fn take_required(
    errors: &mut FieldErrors,
    field: &'static str,
    value: Option<String>,
) -> String {
    clean(value).unwrap_or_else(|| {
        errors.add(field, required_message(field));
        String::new()
    })
}

/// Parse a closed enum from request text. Blank input is `None`.
pub(crate) fn parse_enum<E: FromStr>(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<E>, SchoolError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| SchoolError::invalid_enum(field, raw)),
    }
}

/// Like `parse_enum`, but the value must be present.
pub(crate) fn parse_required_enum<E: FromStr>(
    field: &'static str,
    value: Option<&str>,
) -> Result<E, SchoolError> {
    parse_enum(field, value)?.ok_or_else(|| SchoolError::validation(field, required_message(field)))
}

fn envelope(message: Option<&str>, key: &str, payload: impl Serialize) -> ApiResult<Json<Value>> {
    let mut body = serde_json::Map::new();
    body.insert("success".into(), Value::Bool(true));
    if let Some(message) = message {
        body.insert("message".into(), Value::String(message.to_string()));
    }
    let payload = serde_json::to_value(payload)
        .map_err(|e| SchoolError::Other(anyhow::Error::new(e).context("Failed to encode response")))?;
    body.insert(key.to_string(), payload);
    Ok(Json(Value::Object(body)))
}

pub(crate) fn ok(key: &str, payload: impl Serialize) -> ApiResult<Json<Value>> {
    envelope(None, key, payload)
}

pub(crate) fn ok_with_message(
    message: &str,
    key: &str,
    payload: impl Serialize,
) -> ApiResult<Json<Value>> {
    envelope(Some(message), key, payload)
}

pub(crate) fn created(
    message: &str,
    key: &str,
    payload: impl Serialize,
) -> ApiResult<(StatusCode, Json<Value>)> {
    Ok((StatusCode::CREATED, envelope(Some(message), key, payload)?))
}

pub(crate) fn page_response<T, V: Serialize>(
    key: &str,
    page: Page<T>,
    view: impl FnMut(T) -> V,
) -> ApiResult<Json<Value>> {
    let items: Vec<V> = page.items.into_iter().map(view).collect();
    extend(envelope(None, key, items)?, "pagination", page.pagination)
}

/// Add one more top-level key to a success envelope.
pub(crate) fn extend(
    Json(mut body): Json<Value>,
    key: &str,
    value: impl Serialize,
) -> ApiResult<Json<Value>> {
    let value = serde_json::to_value(value)
        .map_err(|e| SchoolError::Other(anyhow::Error::new(e).context("Failed to encode response")))?;
    if let Value::Object(map) = &mut body {
        map.insert(key.to_string(), value);
    }
    Ok(Json(body))
}

/// First file part named `field` as `(file_name, bytes)`.
pub(crate) async fn read_upload(
    mut multipart: Multipart,
    field: &'static str,
) -> ApiResult<(String, Vec<u8>)> {
    while let Some(part) = multipart.next_field().await? {
        if part.name() != Some(field) {
            continue;
        }
        let file_name = part.file_name().unwrap_or_default().to_string();
        let bytes = part.bytes().await?;
        return Ok((file_name, bytes.to_vec()));
    }
    Err(SchoolError::validation(field, required_message(field)).into())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/dashboard", get(dashboard))
        .merge(auth::routes())
        .merge(subjects::routes())
        .merge(students::routes())
        .merge(teachers::routes())
        .merge(sections::routes())
        .merge(catalog::routes())
        .merge(users::routes())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn dashboard(State(state): State<SharedState>, _auth: AuthUser) -> ApiResult<Json<Value>> {
    let stats = state.db.call(|db| db.dashboard_stats()).await?;
    ok("stats", stats)
}

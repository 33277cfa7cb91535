use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::{
    ApiJson, ApiPath, ApiQuery, ApiResult, SharedState, clean, created, ok, ok_with_message,
    page_response, parse_enum, parse_required_enum, read_upload, take_required, validate,
};
use crate::errors::{FieldErrors, SchoolError};
use crate::school::auth::{AdminUser, AuthUser};
use crate::school::models::*;
use crate::school::storage::LocalStorage;

const AVATAR_FOLDER: &str = "avatars/teachers";

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/teachers", get(list_teachers).post(create_teacher))
        .route(
            "/api/teachers/{id}",
            get(get_teacher).put(update_teacher).delete(delete_teacher),
        )
        .route("/api/teachers/{id}/avatar", post(upload_avatar))
}

#[derive(Debug, Serialize)]
struct TeacherView {
    #[serde(flatten)]
    teacher: Teacher,
    avatar_url: Option<String>,
}

impl TeacherView {
    fn new(teacher: Teacher, storage: &LocalStorage) -> Self {
        let avatar_url = teacher.avatar.as_deref().map(|path| storage.url(path));
        Self {
            teacher,
            avatar_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TeacherQuery {
    pub search: Option<String>,
    pub gender: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTeacherRequest {
    #[validate(
        required(message = "The name field is required."),
        length(max = 255, message = "The name may not be greater than 255 characters.")
    )]
    pub name: Option<String>,
    #[validate(
        required(message = "The email field is required."),
        email(message = "The email must be a valid email address.")
    )]
    pub email: Option<String>,
    #[validate(required(message = "The gender field is required."))]
    pub gender: Option<String>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 255))]
    pub specialization: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTeacherRequest {
    #[validate(length(max = 255, message = "The name may not be greater than 255 characters."))]
    pub name: Option<String>,
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: Option<String>,
    pub gender: Option<String>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 255))]
    pub specialization: Option<String>,
    pub is_active: Option<bool>,
}

async fn list_teachers(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<TeacherQuery>,
) -> ApiResult<Json<Value>> {
    let filter = TeacherFilter {
        search: clean(query.search),
        gender: parse_enum("gender", query.gender.as_deref())?,
        status: parse_enum("status", query.status.as_deref())?,
    };
    let page = PageRequest::new(query.page, query.limit);
    let teachers = state
        .db
        .call(move |db| db.list_teachers(&filter, page))
        .await?;
    page_response("teachers", teachers, |t| TeacherView::new(t, &state.storage))
}

async fn get_teacher(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let teacher = state
        .db
        .call(move |db| db.get_teacher(id))
        .await?
        .ok_or_else(|| SchoolError::not_found("Teacher", id))?;
    ok("teacher", TeacherView::new(teacher, &state.storage))
}

async fn create_teacher(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiJson(request): ApiJson<CreateTeacherRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    validate(&request)?;
    let mut errors = FieldErrors::new();
    let name = take_required(&mut errors, "name", request.name);
    let email = take_required(&mut errors, "email", request.email);
    errors.into_result()?;
    let new = NewTeacher {
        name,
        email,
        gender: parse_required_enum("gender", request.gender.as_deref())?,
        phone: clean(request.phone),
        address: clean(request.address),
        specialization: clean(request.specialization),
        is_active: request.is_active.unwrap_or(true),
    };
    let teacher = state.db.call(move |db| db.create_teacher(&new)).await?;
    created(
        "Teacher created successfully",
        "teacher",
        TeacherView::new(teacher, &state.storage),
    )
}

async fn update_teacher(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateTeacherRequest>,
) -> ApiResult<Json<Value>> {
    validate(&request)?;
    let changes = TeacherChanges {
        name: clean(request.name),
        email: clean(request.email),
        gender: parse_enum("gender", request.gender.as_deref())?,
        phone: clean(request.phone),
        address: clean(request.address),
        specialization: clean(request.specialization),
        is_active: request.is_active,
    };
    let teacher = state
        .db
        .call(move |db| db.update_teacher(id, &changes))
        .await?;
    ok_with_message(
        "Teacher updated successfully",
        "teacher",
        TeacherView::new(teacher, &state.storage),
    )
}

async fn delete_teacher(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let teacher = state.db.call(move |db| db.delete_teacher(id)).await?;
    if let Some(avatar) = &teacher.avatar {
        state.storage.remove(avatar).await;
    }
    ok_with_message(
        "Teacher deleted successfully",
        "teacher",
        TeacherView::new(teacher, &state.storage),
    )
}

async fn upload_avatar(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    if state.db.call(move |db| db.get_teacher(id)).await?.is_none() {
        return Err(SchoolError::not_found("Teacher", id).into());
    }
    let (file_name, bytes) = read_upload(multipart, "avatar").await?;
    let path = state.storage.put(AVATAR_FOLDER, &file_name, &bytes).await?;

    let stored = path.clone();
    let previous = match state
        .db
        .call(move |db| db.set_teacher_avatar(id, &stored))
        .await
    {
        Ok(previous) => previous,
        Err(e) => {
            state.storage.remove(&path).await;
            return Err(e.into());
        }
    };
    if let Some(previous) = previous {
        state.storage.remove(&previous).await;
    }

    let teacher = state
        .db
        .call(move |db| db.get_teacher(id))
        .await?
        .ok_or_else(|| SchoolError::not_found("Teacher", id))?;
    ok_with_message(
        "Avatar uploaded successfully",
        "teacher",
        TeacherView::new(teacher, &state.storage),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::TestApp;
    use super::*;

    #[tokio::test]
    async fn test_teacher_crud() {
        let app = TestApp::new();
        let (status, body) = app
            .admin(
                "POST",
                "/api/teachers",
                Some(json!({"name": "Jose Rizal", "email": "jose@school.test", "gender": "Male", "specialization": "Literature"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["teacher"]["id"].as_i64().unwrap();
        assert_eq!(body["teacher"]["is_active"], true);

        let (status, body) = app
            .admin("PUT", &format!("/api/teachers/{id}"), Some(json!({"is_active": false})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["teacher"]["is_active"], false);
        assert_eq!(body["teacher"]["specialization"], "Literature");

        let (_, body) = app.student("GET", "/api/teachers?search=liter", None).await;
        assert_eq!(body["teachers"].as_array().unwrap().len(), 1);

        let (status, _) = app.admin("DELETE", &format!("/api/teachers/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.student("GET", &format!("/api/teachers/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_teacher_requires_email_and_gender() {
        let app = TestApp::new();
        let (status, body) = app
            .admin("POST", "/api/teachers", Some(json!({"name": "Nobody", "gender": "Female"})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["email"].is_array());
    }

    #[tokio::test]
    async fn test_duplicate_teacher_email() {
        let app = TestApp::new();
        let payload = json!({"name": "A", "email": "a@school.test", "gender": "Female"});
        let (status, _) = app.admin("POST", "/api/teachers", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = app.admin("POST", "/api/teachers", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["email"].is_array());
    }
}

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

const AVATAR_FOLDER: &str = "avatars/students";

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/students", get(list_students).post(create_student))
        .route(
            "/api/students/{id}",
            get(get_student).put(update_student).delete(delete_student),
        )
        .route("/api/students/{id}/restore", post(restore_student))
        .route("/api/students/{id}/avatar", post(upload_avatar))
}

// ── Views ─────────────────────────────────────────────────────────────

/// A student as returned to clients: the row plus a public avatar link.
#[derive(Debug, Serialize)]
pub struct StudentView {
    #[serde(flatten)]
    pub student: Student,
    pub avatar_url: Option<String>,
}

impl StudentView {
    pub fn new(student: Student, storage: &LocalStorage) -> Self {
        let avatar_url = student.avatar.as_deref().map(|path| storage.url(path));
        Self {
            student,
            avatar_url,
        }
    }
}

#[derive(Serialize)]
struct StudentDetailView {
    #[serde(flatten)]
    student: StudentView,
    subjects: Vec<Subject>,
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StudentQuery {
    pub search: Option<String>,
    pub grade_level: Option<String>,
    pub strand: Option<String>,
    pub section: Option<String>,
    pub gender: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub limit: Option<u32>,
}

impl StudentQuery {
    fn filter(&self) -> Result<StudentFilter, SchoolError> {
        Ok(StudentFilter {
            search: clean(self.search.clone()),
            grade_level: parse_enum("grade_level", self.grade_level.as_deref())?,
            strand: parse_enum("strand", self.strand.as_deref())?,
            section: clean(self.section.clone()),
            gender: parse_enum("gender", self.gender.as_deref())?,
            status: parse_enum("status", self.status.as_deref())?,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(
        required(message = "The name field is required."),
        length(max = 255, message = "The name may not be greater than 255 characters.")
    )]
    pub name: Option<String>,
    #[validate(required(message = "The gender field is required."))]
    pub gender: Option<String>,
    #[validate(required(message = "The grade level field is required."))]
    pub grade_level: Option<String>,
    #[validate(required(message = "The strand field is required."))]
    pub strand: Option<String>,
    #[validate(length(max = 100))]
    pub section: Option<String>,
    #[validate(length(max = 255))]
    pub subject: Option<String>,
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: Option<String>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 255))]
    pub guardian_name: Option<String>,
    #[validate(length(max = 30))]
    pub guardian_phone: Option<String>,
    pub is_active: Option<bool>,
}

impl CreateStudentRequest {
    fn into_new(self) -> Result<NewStudent, SchoolError> {
        validate(&self)?;
        let mut errors = FieldErrors::new();
        let name = take_required(&mut errors, "name", self.name);
        errors.into_result()?;
        Ok(NewStudent {
            name,
            gender: parse_required_enum("gender", self.gender.as_deref())?,
            grade_level: parse_required_enum("grade_level", self.grade_level.as_deref())?,
            strand: parse_required_enum("strand", self.strand.as_deref())?,
            section: clean(self.section),
            subject: clean(self.subject),
            email: clean(self.email),
            phone: clean(self.phone),
            address: clean(self.address),
            guardian_name: clean(self.guardian_name),
            guardian_phone: clean(self.guardian_phone),
            is_active: self.is_active.unwrap_or(true),
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStudentRequest {
    #[validate(length(max = 255, message = "The name may not be greater than 255 characters."))]
    pub name: Option<String>,
    pub gender: Option<String>,
    pub grade_level: Option<String>,
    pub strand: Option<String>,
    #[validate(length(max = 100))]
    pub section: Option<String>,
    #[validate(length(max = 255))]
    pub subject: Option<String>,
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: Option<String>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 255))]
    pub guardian_name: Option<String>,
    #[validate(length(max = 30))]
    pub guardian_phone: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdateStudentRequest {
    fn into_changes(self) -> Result<StudentChanges, SchoolError> {
        validate(&self)?;
        Ok(StudentChanges {
            name: clean(self.name),
            gender: parse_enum("gender", self.gender.as_deref())?,
            grade_level: parse_enum("grade_level", self.grade_level.as_deref())?,
            strand: parse_enum("strand", self.strand.as_deref())?,
            section: clean(self.section),
            subject: clean(self.subject),
            email: clean(self.email),
            phone: clean(self.phone),
            address: clean(self.address),
            guardian_name: clean(self.guardian_name),
            guardian_phone: clean(self.guardian_phone),
            is_active: self.is_active,
        })
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn list_students(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<StudentQuery>,
) -> ApiResult<Json<Value>> {
    let filter = query.filter()?;
    let page = PageRequest::new(query.page, query.limit);
    let students = state
        .db
        .call(move |db| db.list_students(&filter, page))
        .await?;
    page_response("students", students, |s| StudentView::new(s, &state.storage))
}

async fn get_student(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let detail = state.db.call(move |db| db.get_student_detail(id)).await?;
    ok(
        "student",
        StudentDetailView {
            student: StudentView::new(detail.student, &state.storage),
            subjects: detail.subjects,
        },
    )
}

async fn create_student(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiJson(request): ApiJson<CreateStudentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let new = request.into_new()?;
    let student = state.db.call(move |db| db.create_student(&new)).await?;
    created(
        "Student created successfully",
        "student",
        StudentView::new(student, &state.storage),
    )
}

async fn update_student(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateStudentRequest>,
) -> ApiResult<Json<Value>> {
    let changes = request.into_changes()?;
    let student = state
        .db
        .call(move |db| db.update_student(id, &changes))
        .await?;
    ok_with_message(
        "Student updated successfully",
        "student",
        StudentView::new(student, &state.storage),
    )
}

async fn delete_student(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let mut student = state.db.call(move |db| db.delete_student(id)).await?;
    if let Some(avatar) = student.avatar.take() {
        state.storage.remove(&avatar).await;
    }
    ok_with_message(
        "Student deleted successfully",
        "student",
        StudentView::new(student, &state.storage),
    )
}

async fn restore_student(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let student = state.db.call(move |db| db.restore_student(id)).await?;
    ok_with_message(
        "Student restored successfully",
        "student",
        StudentView::new(student, &state.storage),
    )
}

async fn upload_avatar(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    // Fail fast before touching the disk.
    if state.db.call(move |db| db.get_student(id)).await?.is_none() {
        return Err(SchoolError::not_found("Student", id).into());
    }
    let (file_name, bytes) = read_upload(multipart, "avatar").await?;
    let path = state.storage.put(AVATAR_FOLDER, &file_name, &bytes).await?;

    let stored = path.clone();
    let previous = match state
        .db
        .call(move |db| db.set_student_avatar(id, &stored))
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

    let student = state
        .db
        .call(move |db| db.get_student(id))
        .await?
        .ok_or_else(|| SchoolError::not_found("Student", id))?;
    ok_with_message(
        "Avatar uploaded successfully",
        "student",
        StudentView::new(student, &state.storage),
    )
}

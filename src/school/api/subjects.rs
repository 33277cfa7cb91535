use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::students::StudentView;
use super::{
    ApiJson, ApiPath, ApiQuery, ApiResult, SharedState, clean, created, extend, ok,
    ok_with_message, page_response, parse_enum, parse_required_enum, take_required, validate,
};
use crate::errors::{FieldErrors, SchoolError};
use crate::school::auth::{AdminUser, AuthUser};
use crate::school::models::*;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/subjects", get(list_subjects).post(create_subject))
        .route("/api/subjects/grade-levels", get(grade_levels))
        .route("/api/subjects/strands", get(strands))
        .route(
            "/api/subjects/{id}",
            get(get_subject).put(update_subject).delete(delete_subject),
        )
        .route("/api/subjects/{id}/restore", post(restore_subject))
        .route("/api/subjects/{id}/enroll", post(enroll_students))
        .route("/api/subjects/{id}/unenroll", post(unenroll_students))
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubjectQuery {
    pub search: Option<String>,
    pub grade_level: Option<String>,
    pub strand: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub limit: Option<u32>,
}

impl SubjectQuery {
    fn filter(&self) -> Result<SubjectFilter, SchoolError> {
        Ok(SubjectFilter {
            search: clean(self.search.clone()),
            grade_level: parse_enum("grade_level", self.grade_level.as_deref())?,
            strand: parse_enum("strand", self.strand.as_deref())?,
            status: parse_enum("status", self.status.as_deref())?,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubjectRequest {
    #[validate(
        required(message = "The name field is required."),
        length(max = 255, message = "The name may not be greater than 255 characters.")
    )]
    pub name: Option<String>,
    #[validate(
        required(message = "The code field is required."),
        length(max = 50, message = "The code may not be greater than 50 characters.")
    )]
    pub code: Option<String>,
    pub status: Option<String>,
    #[validate(required(message = "The grade level field is required."))]
    pub grade_level: Option<String>,
    #[validate(required(message = "The strand field is required."))]
    pub strand: Option<String>,
    #[validate(length(max = 1000, message = "The description may not be greater than 1000 characters."))]
    pub description: Option<String>,
}

impl CreateSubjectRequest {
    fn into_new(self) -> Result<NewSubject, SchoolError> {
        validate(&self)?;
        let mut errors = FieldErrors::new();
        let name = take_required(&mut errors, "name", self.name);
        let code = take_required(&mut errors, "code", self.code);
        errors.into_result()?;
        Ok(NewSubject {
            name,
            code,
            status: parse_enum("status", self.status.as_deref())?.unwrap_or(SubjectStatus::Available),
            grade_level: parse_required_enum("grade_level", self.grade_level.as_deref())?,
            strand: parse_required_enum("strand", self.strand.as_deref())?,
            description: clean(self.description),
        })
    }
}

/// Partial update: absent or blank fields keep their current value.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSubjectRequest {
    #[validate(length(max = 255, message = "The name may not be greater than 255 characters."))]
    pub name: Option<String>,
    #[validate(length(max = 50, message = "The code may not be greater than 50 characters."))]
    pub code: Option<String>,
    pub status: Option<String>,
    pub grade_level: Option<String>,
    pub strand: Option<String>,
    #[validate(length(max = 1000, message = "The description may not be greater than 1000 characters."))]
    pub description: Option<String>,
}

impl UpdateSubjectRequest {
    fn into_changes(self) -> Result<SubjectChanges, SchoolError> {
        validate(&self)?;
        Ok(SubjectChanges {
            name: clean(self.name),
            code: clean(self.code),
            status: parse_enum("status", self.status.as_deref())?,
            grade_level: parse_enum("grade_level", self.grade_level.as_deref())?,
            strand: parse_enum("strand", self.strand.as_deref())?,
            description: clean(self.description),
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnrollmentRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "The student ids field must contain at least one student."))]
    pub student_ids: Vec<i64>,
}

// ── Views ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SubjectDetailView {
    #[serde(flatten)]
    subject: Subject,
    students: Vec<StudentView>,
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn list_subjects(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<SubjectQuery>,
) -> ApiResult<Json<Value>> {
    let filter = query.filter()?;
    let page = PageRequest::new(query.page, query.limit);
    let subjects = state
        .db
        .call(move |db| db.list_subjects(&filter, page))
        .await?;
    page_response("subjects", subjects, |s| s)
}

async fn grade_levels(_auth: AuthUser) -> ApiResult<Json<Value>> {
    ok("grade_levels", GradeLevel::values())
}

async fn strands(_auth: AuthUser) -> ApiResult<Json<Value>> {
    ok("strands", Strand::values())
}

async fn get_subject(
    State(state): State<SharedState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let detail = state.db.call(move |db| db.get_subject_detail(id)).await?;
    let view = SubjectDetailView {
        subject: detail.subject,
        students: detail
            .students
            .into_iter()
            .map(|s| StudentView::new(s, &state.storage))
            .collect(),
    };
    ok("subject", view)
}

async fn create_subject(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiJson(request): ApiJson<CreateSubjectRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let new = request.into_new()?;
    let subject = state.db.call(move |db| db.create_subject(&new)).await?;
    created("Subject created successfully", "subject", subject)
}

async fn update_subject(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateSubjectRequest>,
) -> ApiResult<Json<Value>> {
    let changes = request.into_changes()?;
    let subject = state
        .db
        .call(move |db| db.update_subject(id, &changes))
        .await?;
    ok_with_message("Subject updated successfully", "subject", subject)
}

async fn delete_subject(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let subject = state.db.call(move |db| db.delete_subject(id)).await?;
    ok_with_message("Subject deleted successfully", "subject", subject)
}

async fn restore_subject(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let subject = state.db.call(move |db| db.restore_subject(id)).await?;
    ok_with_message("Subject restored successfully", "subject", subject)
}

async fn enroll_students(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<EnrollmentRequest>,
) -> ApiResult<Json<Value>> {
    validate(&request)?;
    let change = state
        .db
        .call(move |db| db.enroll(id, &request.student_ids))
        .await?;
    let body = ok_with_message("Students enrolled successfully", "subject", change.subject)?;
    extend(body, "attached", change.changed)
}

async fn unenroll_students(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<EnrollmentRequest>,
) -> ApiResult<Json<Value>> {
    validate(&request)?;
    let change = state
        .db
        .call(move |db| db.unenroll(id, &request.student_ids))
        .await?;
    let body = ok_with_message("Students unenrolled successfully", "subject", change.subject)?;
    extend(body, "detached", change.changed)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::TestApp;
    use super::*;

    fn math101() -> Value {
        json!({
            "name": "Mathematics",
            "code": "MATH101",
            "grade_level": "Grade 10",
            "strand": "STEM",
            "description": "Algebra and geometry"
        })
    }

    async fn create(app: &TestApp, body: Value) -> Value {
        let (status, body) = app.admin("POST", "/api/subjects", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["subject"].clone()
    }

    async fn create_student(app: &TestApp, name: &str) -> i64 {
        let (status, body) = app
            .admin(
                "POST",
                "/api/students",
                Some(json!({"name": name, "gender": "Female", "grade_level": "Grade 10", "strand": "N/A"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["student"]["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_create_subject_returns_201_with_envelope() {
        let app = TestApp::new();
        let (status, body) = app.admin("POST", "/api/subjects", Some(math101())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Subject created successfully");
        assert_eq!(body["subject"]["code"], "MATH101");
        assert_eq!(body["subject"]["status"], "Available");
        assert_eq!(body["subject"]["students_count"], 0);
    }

    #[tokio::test]
    async fn test_create_subject_requires_fields() {
        let app = TestApp::new();
        let (status, body) = app.admin("POST", "/api/subjects", Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        for field in ["name", "code", "grade_level", "strand"] {
            assert!(body["errors"][field].is_array(), "missing error for {field}: {body}");
        }
    }

    #[tokio::test]
    async fn test_invalid_enum_is_422_keyed_by_field() {
        let app = TestApp::new();
        let mut payload = math101();
        payload["strand"] = json!("MEDICINE");
        let (status, body) = app.admin("POST", "/api/subjects", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["strand"].is_array());

        let (status, body) = app.student("GET", "/api/subjects?grade_level=Grade%2013", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["grade_level"].is_array());
    }

    #[tokio::test]
    async fn test_duplicate_code_is_422_on_code() {
        let app = TestApp::new();
        create(&app, math101()).await;
        let (status, body) = app.admin("POST", "/api/subjects", Some(math101())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["code"].is_array());
    }

    #[tokio::test]
    async fn test_malformed_json_is_422() {
        let app = TestApp::new();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/subjects")
            .header("authorization", format!("Bearer {}", app.admin_token))
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{not json"))
            .unwrap();
        let response = tower::ServiceExt::oneshot(app.router.clone(), request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_writes_require_admin() {
        let app = TestApp::new();
        let (status, body) = app.student("POST", "/api/subjects", Some(math101())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);

        let (status, _) = app.send("GET", "/api/subjects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.student("GET", "/api/subjects", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_is_partial_and_unknown_id_is_404() {
        let app = TestApp::new();
        let subject = create(&app, math101()).await;
        let uri = format!("/api/subjects/{}", subject["id"]);
        let (status, body) = app
            .admin("PUT", &uri, Some(json!({"status": "Unavailable"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subject"]["status"], "Unavailable");
        assert_eq!(body["subject"]["code"], "MATH101");

        let (status, body) = app.admin("PUT", "/api/subjects/999", Some(json!({"name": "X"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_enroll_flow_and_delete_rules() {
        let app = TestApp::new();
        let subject = create(&app, math101()).await;
        let id = subject["id"].as_i64().unwrap();
        let ana = create_student(&app, "Ana").await;

        let enroll = format!("/api/subjects/{id}/enroll");
        let (status, body) = app
            .admin("POST", &enroll, Some(json!({"student_ids": [ana, ana]})))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["subject"]["students_count"], 1);
        assert_eq!(body["attached"], 1);

        let (status, body) = app.admin("DELETE", &format!("/api/subjects/{id}"), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["message"].as_str().unwrap().contains("1 student(s)"));

        let (status, body) = app.student("GET", &format!("/api/subjects/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subject"]["students"][0]["name"], "Ana");
        assert_eq!(body["subject"]["students"][0]["avatar_url"], Value::Null);

        let unenroll = format!("/api/subjects/{id}/unenroll");
        let (status, body) = app
            .admin("POST", &unenroll, Some(json!({"student_ids": [ana]})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subject"]["students_count"], 0);
        assert_eq!(body["detached"], 1);

        let (status, _) = app.admin("DELETE", &format!("/api/subjects/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.student("GET", &format!("/api/subjects/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .admin("POST", &format!("/api/subjects/{id}/restore"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subject"]["deleted_at"], Value::Null);
    }

    #[tokio::test]
    async fn test_enroll_unknown_student_is_422_on_student_ids() {
        let app = TestApp::new();
        let subject = create(&app, math101()).await;
        let uri = format!("/api/subjects/{}/enroll", subject["id"]);

        let (status, body) = app
            .admin("POST", &uri, Some(json!({"student_ids": [404]})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["student_ids"].is_array());

        let (status, body) = app.admin("POST", &uri, Some(json!({"student_ids": []}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["student_ids"].is_array());
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination_metadata() {
        let app = TestApp::new();
        for i in 0..12 {
            let mut payload = math101();
            payload["code"] = json!(format!("G10-{i}"));
            create(&app, payload).await;
        }
        let mut other = math101();
        other["code"] = json!("G7");
        other["grade_level"] = json!("Grade 7");
        create(&app, other).await;

        let (status, body) = app
            .student("GET", "/api/subjects?grade_level=grade%2010&limit=5&page=3", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subjects"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["pagination"],
            json!({"total": 12, "per_page": 5, "current_page": 3, "last_page": 3})
        );
    }

    #[tokio::test]
    async fn test_list_accepts_blank_query_params() {
        let app = TestApp::new();
        create(&app, math101()).await;
        let (status, body) = app
            .admin(
                "GET",
                "/api/subjects?search=&grade_level=&strand=&status=&page=&limit=",
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["subjects"].as_array().unwrap().len(), 1);
        assert_eq!(body["pagination"]["current_page"], 1);
        assert_eq!(body["pagination"]["per_page"], 10);
    }

    #[tokio::test]
    async fn test_enum_listing_endpoints() {
        let app = TestApp::new();
        let (_, body) = app.student("GET", "/api/subjects/grade-levels", None).await;
        assert_eq!(body["grade_levels"].as_array().unwrap().len(), 6);
        let (_, body) = app.student("GET", "/api/subjects/strands", None).await;
        assert_eq!(body["strands"].as_array().unwrap().len(), 8);
        assert_eq!(body["strands"][7], "N/A");
    }
}

//! End-to-end enrollment scenarios driven through the public router.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use schoolhouse::school::api::AppState;
use schoolhouse::school::auth::issue_token;
use schoolhouse::school::db::{DbHandle, SchoolDb};
use schoolhouse::school::models::{NewUser, Role};
use schoolhouse::school::server::build_router;
use schoolhouse::school::storage::LocalStorage;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct School {
    router: Router,
    token: String,
    _storage: TempDir,
}

impl School {
    fn new() -> Self {
        let storage = TempDir::new().unwrap();
        let db = SchoolDb::new_in_memory().unwrap();
        let admin = db
            .create_user(&NewUser {
                name: "Registrar".into(),
                email: "registrar@school.test".into(),
                role: Role::Admin,
                password_hash: "unused".into(),
            })
            .unwrap();
        let token = issue_token(&db, admin.id, 0).unwrap();
        let state = Arc::new(AppState {
            db: DbHandle::new(db),
            storage: LocalStorage::new(storage.path(), "http://localhost:8000", "storage", 1024),
            token_ttl_hours: 0,
        });
        Self {
            router: build_router(state, false),
            token,
            _storage: storage,
        }
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", self.token));
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn subject(&self, code: &str, grade_level: &str) -> i64 {
        let (status, body) = self
            .call(
                "POST",
                "/api/subjects",
                Some(json!({
                    "name": format!("Subject {code}"),
                    "code": code,
                    "grade_level": grade_level,
                    "strand": "N/A",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["subject"]["id"].as_i64().unwrap()
    }

    async fn student(&self, name: &str) -> i64 {
        let (status, body) = self
            .call(
                "POST",
                "/api/students",
                Some(json!({
                    "name": name,
                    "gender": "Female",
                    "grade_level": "Grade 10",
                    "strand": "N/A",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["student"]["id"].as_i64().unwrap()
    }

    async fn students_count(&self, subject_id: i64) -> i64 {
        let (status, body) = self
            .call("GET", &format!("/api/subjects/{subject_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["subject"]["students_count"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_math101_lifecycle() {
    let school = School::new();
    let math = school.subject("MATH101", "Grade 10").await;
    let s1 = school.student("Ana").await;
    let s2 = school.student("Ben").await;

    let (status, _) = school
        .call("POST", &format!("/api/subjects/{math}/enroll"), Some(json!({"student_ids": [s1, s2]})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(school.students_count(math).await, 2);

    // Enrolling the same pair again changes nothing.
    let (status, body) = school
        .call("POST", &format!("/api/subjects/{math}/enroll"), Some(json!({"student_ids": [s1]})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attached"], 0);
    assert_eq!(school.students_count(math).await, 2);

    let (status, _) = school.call("DELETE", &format!("/api/subjects/{math}"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = school
        .call(
            "POST",
            &format!("/api/subjects/{math}/unenroll"),
            Some(json!({"student_ids": [s1, s2]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(school.students_count(math).await, 0);

    let (status, _) = school.call("DELETE", &format!("/api/subjects/{math}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = school.call("GET", "/api/subjects?search=MATH101", None).await;
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_student_delete_releases_enrollments() {
    let school = School::new();
    let subjects = [
        school.subject("ENG10", "Grade 10").await,
        school.subject("SCI10", "Grade 10").await,
        school.subject("FIL10", "Grade 10").await,
    ];
    let leaving = school.student("Carlo").await;
    let staying = school.student("Dina").await;
    for subject in subjects {
        let (status, _) = school
            .call(
                "POST",
                &format!("/api/subjects/{subject}/enroll"),
                Some(json!({"student_ids": [leaving, staying]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = school.call("DELETE", &format!("/api/students/{leaving}"), None).await;
    assert_eq!(status, StatusCode::OK);

    for subject in subjects {
        assert_eq!(school.students_count(subject).await, 1);
        let (_, body) = school.call("GET", &format!("/api/subjects/{subject}"), None).await;
        let ids: Vec<i64> = body["subject"]["students"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![staying]);
    }

    // With no enrollments left, a subject can be deleted once Dina leaves too.
    let (status, _) = school
        .call(
            "POST",
            &format!("/api/subjects/{}/unenroll", subjects[0]),
            Some(json!({"student_ids": [staying]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = school
        .call("DELETE", &format!("/api/subjects/{}", subjects[0]), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_student_aborts_whole_batch() {
    let school = School::new();
    let subject = school.subject("HIST10", "Grade 10").await;
    let student = school.student("Elena").await;

    let (status, body) = school
        .call(
            "POST",
            &format!("/api/subjects/{subject}/enroll"),
            Some(json!({"student_ids": [student, 9999]})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["student_ids"].is_array());
    assert_eq!(school.students_count(subject).await, 0);
}

#[tokio::test]
async fn test_code_reuse_after_soft_delete() {
    let school = School::new();
    let first = school.subject("ART10", "Grade 10").await;

    let (status, body) = school
        .call(
            "POST",
            "/api/subjects",
            Some(json!({"name": "Again", "code": "ART10", "grade_level": "Grade 10", "strand": "N/A"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["code"].is_array());

    let (status, _) = school.call("DELETE", &format!("/api/subjects/{first}"), None).await;
    assert_eq!(status, StatusCode::OK);
    school.subject("ART10", "Grade 10").await;
}

#[tokio::test]
async fn test_grade_filter_pagination() {
    let school = School::new();
    for i in 0..15 {
        school.subject(&format!("G10-{i:02}"), "Grade 10").await;
    }
    for i in 0..5 {
        school.subject(&format!("G11-{i:02}"), "Grade 11").await;
    }

    let (status, body) = school
        .call("GET", "/api/subjects?grade_level=Grade%2010&limit=10", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subjects"].as_array().unwrap().len(), 10);
    assert_eq!(body["pagination"]["total"], 15);
    assert_eq!(body["pagination"]["last_page"], 2);

    let (_, body) = school
        .call("GET", "/api/subjects?grade_level=Grade%2010&limit=10&page=2", None)
        .await;
    assert_eq!(body["subjects"].as_array().unwrap().len(), 5);
}

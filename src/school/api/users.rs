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
use crate::school::auth::{AdminUser, spawn_hash_password};
use crate::school::models::*;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "super::blank_as_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
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
    #[validate(
        required(message = "The password field is required."),
        length(min = 8, message = "The password must be at least 8 characters.")
    )]
    pub password: Option<String>,
    #[validate(required(message = "The role field is required."))]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(max = 255, message = "The name may not be greater than 255 characters."))]
    pub name: Option<String>,
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: Option<String>,
    #[validate(length(min = 8, message = "The password must be at least 8 characters."))]
    pub password: Option<String>,
    pub role: Option<String>,
}

async fn list_users(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<UserQuery>,
) -> ApiResult<Json<Value>> {
    let filter = UserFilter {
        search: clean(query.search),
        role: parse_enum("role", query.role.as_deref())?,
    };
    let page = PageRequest::new(query.page, query.limit);
    let users = state
        .db
        .call(move |db| db.list_users(&filter, page))
        .await?;
    page_response("users", users, |u| u)
}

async fn get_user(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let user = state
        .db
        .call(move |db| db.get_user(id))
        .await?
        .ok_or_else(|| SchoolError::not_found("User", id))?;
    ok("user", user)
}

async fn create_user(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    validate(&request)?;
    let mut errors = FieldErrors::new();
    let name = take_required(&mut errors, "name", request.name);
    let email = take_required(&mut errors, "email", request.email);
    errors.into_result()?;
    let role: Role = parse_required_enum("role", request.role.as_deref())?;
    let password = request.password.unwrap_or_default();

    let new = NewUser {
        name,
        email,
        role,
        password_hash: spawn_hash_password(password).await?,
    };
    let user = state.db.call(move |db| db.create_user(&new)).await?;
    created("User created successfully", "user", user)
}

async fn update_user(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<Value>> {
    validate(&request)?;
    let name = clean(request.name);
    let email = clean(request.email);
    let role = parse_enum("role", request.role.as_deref())?;
    let password_hash = match request.password.filter(|p| !p.is_empty()) {
        Some(password) => Some(spawn_hash_password(password).await?),
        None => None,
    };
    let changes = UserChanges {
        name,
        email,
        role,
        password_hash,
    };
    let user = state
        .db
        .call(move |db| db.update_user(id, &changes))
        .await?;
    ok_with_message("User updated successfully", "user", user)
}

async fn delete_user(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    if admin.user.id == id {
        return Err(SchoolError::Forbidden("You cannot delete your own account.".into()).into());
    }
    let user = state.db.call(move |db| db.delete_user(id)).await?;
    ok_with_message("User deleted successfully", "user", user)
}

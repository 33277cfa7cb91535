use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::{
    ApiJson, ApiResult, SharedState, clean, created, extend, ok, ok_with_message, parse_enum,
    take_required, validate,
};
use crate::errors::{FieldErrors, SchoolError};
use crate::school::auth::{self, AuthUser};
use crate::school::models::{NewUser, Role};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
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
    pub password_confirmation: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(
        required(message = "The email field is required."),
        email(message = "The email must be a valid email address.")
    )]
    pub email: Option<String>,
    #[validate(required(message = "The password field is required."))]
    pub password: Option<String>,
}

async fn register(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    validate(&request)?;
    let mut errors = FieldErrors::new();
    let name = take_required(&mut errors, "name", request.name);
    let email = take_required(&mut errors, "email", request.email);
    let password = request.password.unwrap_or_default();
    if request.password_confirmation.as_deref() != Some(password.as_str()) {
        errors.add("password", "The password confirmation does not match.");
    }
    errors.into_result()?;

    let role = parse_enum("role", request.role.as_deref())?.unwrap_or(Role::Student);
    if role == Role::Admin {
        return Err(SchoolError::Forbidden("Admin accounts cannot be self-registered.".into()).into());
    }

    let new = NewUser {
        name,
        email,
        role,
        password_hash: auth::spawn_hash_password(password).await?,
    };
    let ttl = state.token_ttl_hours;
    let (user, token) = state
        .db
        .call(move |db| {
            let user = db.create_user(&new)?;
            let token = auth::issue_token(db, user.id, ttl)?;
            Ok((user, token))
        })
        .await?;
    tracing::info!(user_id = user.id, role = %user.role, "account registered");

    let (status, body) = created("Registration successful", "user", user)?;
    Ok((status, extend(body, "token", token)?))
}

async fn login(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ApiResult<Json<Value>> {
    validate(&request)?;
    let email = clean(request.email).unwrap_or_default();
    let password = request.password.unwrap_or_default();

    let credentials = state
        .db
        .call(move |db| db.find_user_credentials(&email))
        .await?;
    let (user, hash) = credentials.unzip();
    let verified = auth::spawn_verify_password(password, hash).await?;
    let user = match user {
        Some(user) if verified => user,
        _ => return Err(SchoolError::Unauthorized(INVALID_CREDENTIALS.into()).into()),
    };

    let (user_id, ttl) = (user.id, state.token_ttl_hours);
    let token = state
        .db
        .call(move |db| auth::issue_token(db, user_id, ttl))
        .await?;
    tracing::info!(user_id = user.id, "login");

    extend(ok_with_message("Login successful", "user", user)?, "token", token)
}

async fn logout(State(state): State<SharedState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    let token_id = auth.token_id;
    state.db.call(move |db| db.delete_token(token_id)).await?;
    tracing::info!(user_id = auth.user.id, "logout");
    ok_with_message("Logged out successfully", "user", auth.user)
}

async fn me(auth: AuthUser) -> ApiResult<Json<Value>> {
    ok("user", auth.user)
}

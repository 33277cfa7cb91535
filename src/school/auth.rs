//! Password hashing, bearer tokens and the role-gate extractors.
//!
//! Tokens handed to clients look like `"{id}|{secret}"`. Only the SHA-256
//! of the secret is stored, so a leaked database does not leak usable
//! tokens.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use std::sync::LazyLock;

use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::api::{ApiError, SharedState};
use super::db::SchoolDb;
use super::models::{Role, User};
use crate::errors::{Result, SchoolError};

pub const TOKEN_NAME: &str = "auth_token";
const MAX_TTL_HOURS: u64 = 24 * 365 * 100;
const INVALID_TOKEN: &str = "Unauthenticated.";

/// Verified against when a login names an unknown account, so a miss costs
/// as much as a wrong password.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("schoolhouse-dummy-password").ok());

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| SchoolError::Other(anyhow::anyhow!("Failed to build salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SchoolError::Other(anyhow::anyhow!("Failed to hash password: {e}")))
}

/// False for a wrong password and for a hash that cannot be parsed.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn password_task_failed(err: tokio::task::JoinError) -> SchoolError {
    SchoolError::Other(anyhow::Error::new(err).context("Password task panicked"))
}

/// `hash_password` on the blocking pool. Never call Argon2 inside
/// `DbHandle::call`: that holds the database lock for the whole hash.
pub async fn spawn_hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(password_task_failed)?
}

/// `verify_password` on the blocking pool. With no stored hash the
/// password is checked against a throwaway hash and the result is false.
pub async fn spawn_verify_password(password: String, hash: Option<String>) -> Result<bool> {
    tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                verify_password(&password, dummy);
            }
            false
        }
    })
    .await
    .map_err(password_task_failed)
}

pub fn hash_token(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn generate_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Split `"{id}|{secret}"`. `None` for anything else.
fn parse_token(raw: &str) -> Option<(i64, &str)> {
    let (id, secret) = raw.trim().split_once('|')?;
    let id = id.parse().ok()?;
    (!secret.is_empty()).then_some((id, secret))
}

/// Create a token for `user_id` and return the plain-text form. A
/// `ttl_hours` of 0 issues a token that never expires.
pub fn issue_token(db: &SchoolDb, user_id: i64, ttl_hours: u64) -> Result<String> {
    let secret = generate_secret();
    let expires_at = (ttl_hours > 0).then(|| {
        let hours = ttl_hours.min(MAX_TTL_HOURS) as i64;
        (Utc::now() + Duration::hours(hours)).to_rfc3339_opts(SecondsFormat::Millis, true)
    });
    let purged = db.purge_expired_tokens()?;
    if purged > 0 {
        tracing::debug!(purged, "expired tokens removed");
    }
    let token = db.create_token(user_id, TOKEN_NAME, &hash_token(&secret), expires_at.as_deref())?;
    Ok(format!("{}|{}", token.id, secret))
}

/// Resolve a plain-text token to its user, touching `last_used_at`.
/// Expired tokens are deleted on sight.
pub fn authenticate(db: &SchoolDb, raw: &str) -> Result<(User, i64)> {
    let unauthorized = || SchoolError::Unauthorized(INVALID_TOKEN.into());
    let (id, secret) = parse_token(raw).ok_or_else(unauthorized)?;
    let token = db.find_token(id)?.ok_or_else(unauthorized)?;
    let valid: bool = hash_token(secret)
        .as_bytes()
        .ct_eq(token.token_hash.as_bytes())
        .into();
    if !valid {
        return Err(unauthorized());
    }
    if let Some(expires_at) = &token.expires_at {
        let expired = DateTime::parse_from_rfc3339(expires_at)
            .map(|at| at <= Utc::now())
            .unwrap_or(true);
        if expired {
            db.delete_token(token.id)?;
            tracing::debug!(token_id = token.id, "expired token removed");
            return Err(unauthorized());
        }
    }
    db.touch_token(token.id)?;
    let user = db.get_user(token.user_id)?.ok_or_else(unauthorized)?;
    Ok((user, token.id))
}

fn bearer(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim().to_string())
}

/// Any authenticated account.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token_id: i64,
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let raw = bearer(parts).ok_or_else(|| SchoolError::Unauthorized(INVALID_TOKEN.into()))?;
        let (user, token_id) = state
            .db
            .call(move |db| authenticate(db, &raw))
            .await?;
        Ok(Self { user, token_id })
    }
}

/// An authenticated account with the `Admin` role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl FromRequestParts<SharedState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        if auth.user.role != Role::Admin {
            tracing::warn!(user_id = auth.user.id, role = %auth.user.role, "admin route refused");
            return Err(SchoolError::Forbidden("This action is unauthorized.".into()).into());
        }
        Ok(Self(auth))
    }
}

//! Typed error hierarchy for the school back-end.
//!
//! `SchoolError` is the single domain error. Database operations, the
//! enrollment manager and the auth layer all return it; the HTTP boundary
//! (`school::api::ApiError`) maps each variant onto a status code and the
//! JSON envelope.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Field-level validation messages, keyed by request field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a map holding a single message.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when empty, otherwise a `SchoolError::Validation`.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SchoolError::Validation(self))
        }
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut out = FieldErrors::new();
        for (field, list) in errors.field_errors() {
            for error in list {
                let message = match &error.message {
                    Some(message) => message.to_string(),
                    None => format!("The {} field is invalid.", field),
                };
                out.add(field.to_string(), message);
            }
        }
        out
    }
}

/// Errors surfaced by every school operation.
#[derive(Debug, Error)]
pub enum SchoolError {
    #[error("The given data was invalid.")]
    Validation(FieldErrors),

    #[error("The selected {field} '{value}' is invalid.")]
    InvalidEnum { field: &'static str, value: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("The code '{code}' has already been taken.")]
    DuplicateCode { code: String },

    #[error("The email '{email}' has already been taken.")]
    DuplicateEmail { email: String },

    #[error("Cannot delete subject {subject_id}: {count} student(s) are still enrolled")]
    HasActiveEnrollments { subject_id: i64, count: i64 },

    #[error("Student(s) not found: {ids:?}")]
    StudentNotFound { ids: Vec<i64> },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchoolError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn invalid_enum(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidEnum {
            field,
            value: value.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::single(field, message))
    }

    /// True for the variants that indicate a server-side failure rather
    /// than a problem with the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::LockPoisoned | Self::Other(_)
        )
    }
}

impl From<validator::ValidationErrors> for SchoolError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.into())
    }
}

pub type Result<T, E = SchoolError> = std::result::Result<T, E>;

/// True when `err` is a SQLite UNIQUE constraint violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

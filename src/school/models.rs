use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Declares a closed enumeration stored as TEXT and exchanged as its
/// canonical display string. Parsing is case-insensitive and trims
/// surrounding whitespace.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($label:literal) {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            /// Canonical strings of every variant, in declaration order.
            pub fn values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let needle = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(needle))
                    .ok_or_else(|| format!("Invalid {}: {}", $label, s))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum! {
    /// The six grade levels a subject, student or section can belong to.
    GradeLevel("grade level") {
        Grade7 => "Grade 7",
        Grade8 => "Grade 8",
        Grade9 => "Grade 9",
        Grade10 => "Grade 10",
        Grade11 => "Grade 11",
        Grade12 => "Grade 12",
    }
}

text_enum! {
    /// Senior-high strands. `NoStrand` is the sentinel for junior-high rows.
    Strand("strand") {
        Stem => "STEM",
        Abm => "ABM",
        Humss => "HUMSS",
        Gas => "GAS",
        Tvl => "TVL",
        ArtsAndDesign => "Arts and Design",
        Sports => "Sports",
        NoStrand => "N/A",
    }
}

text_enum! {
    SubjectStatus("status") {
        Available => "Available",
        Unavailable => "Unavailable",
    }
}

text_enum! {
    Gender("gender") {
        Male => "Male",
        Female => "Female",
    }
}

text_enum! {
    /// Account role. Only `Admin` may mutate records.
    Role("role") {
        Admin => "Admin",
        Student => "Student",
        Teacher => "Teacher",
    }
}

text_enum! {
    /// List filter over the `is_active` flag.
    ActiveStatus("status") {
        Active => "active",
        Inactive => "inactive",
    }
}

impl ActiveStatus {
    pub fn as_flag(&self) -> bool {
        matches!(self, Self::Active)
    }
}

// ── Entities ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub status: SubjectStatus,
    pub grade_level: GradeLevel,
    pub strand: Strand,
    pub description: Option<String>,
    pub students_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub gender: Gender,
    pub grade_level: GradeLevel,
    pub strand: Strand,
    pub section: Option<String>,
    /// Legacy single-subject label; not tied to enrollment.
    pub subject: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub subjects_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teacher {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub gender: Gender,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub specialization: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub name: String,
    pub grade_level: GradeLevel,
    pub strand: Strand,
    pub adviser_id: Option<i64>,
    pub adviser_name: Option<String>,
    pub room: Option<String>,
    pub capacity: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeLevelRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrandRecord {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

/// Stored bearer token. Only the SHA-256 of the secret is persisted.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub token_hash: String,
    pub last_used_at: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectDetail {
    #[serde(flatten)]
    pub subject: Subject,
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentDetail {
    #[serde(flatten)]
    pub student: Student,
    pub subjects: Vec<Subject>,
}

/// Result of an enroll/unenroll batch.
#[derive(Debug, Clone)]
pub struct EnrollmentChange {
    pub subject: Subject,
    /// Rows actually inserted or removed; already-enrolled (or never
    /// enrolled) ids do not count.
    pub changed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardStats {
    pub students: i64,
    pub teachers: i64,
    pub subjects: i64,
    pub sections: i64,
    pub users: i64,
}

// ── Write models ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewSubject {
    pub name: String,
    pub code: String,
    pub status: SubjectStatus,
    pub grade_level: GradeLevel,
    pub strand: Strand,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubjectChanges {
    pub name: Option<String>,
    pub code: Option<String>,
    pub status: Option<SubjectStatus>,
    pub grade_level: Option<GradeLevel>,
    pub strand: Option<Strand>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub gender: Gender,
    pub grade_level: GradeLevel,
    pub strand: Strand,
    pub section: Option<String>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StudentChanges {
    pub name: Option<String>,
    pub gender: Option<Gender>,
    pub grade_level: Option<GradeLevel>,
    pub strand: Option<Strand>,
    pub section: Option<String>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewTeacher {
    pub name: String,
    pub email: String,
    pub gender: Gender,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub specialization: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TeacherChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub specialization: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewSection {
    pub name: String,
    pub grade_level: GradeLevel,
    pub strand: Strand,
    pub adviser_id: Option<i64>,
    pub room: Option<String>,
    pub capacity: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct SectionChanges {
    pub name: Option<String>,
    pub grade_level: Option<GradeLevel>,
    pub strand: Option<Strand>,
    pub adviser_id: Option<i64>,
    pub room: Option<String>,
    pub capacity: Option<i64>,
}

/// Shared write model for the grade-level and strand catalogs. `code` is
/// ignored for grade levels.
#[derive(Debug, Clone, Default)]
pub struct CatalogEntry {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub password_hash: Option<String>,
}

// ── Query models ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SubjectFilter {
    pub search: Option<String>,
    pub grade_level: Option<GradeLevel>,
    pub strand: Option<Strand>,
    pub status: Option<SubjectStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub search: Option<String>,
    pub grade_level: Option<GradeLevel>,
    pub strand: Option<Strand>,
    pub section: Option<String>,
    pub gender: Option<Gender>,
    pub status: Option<ActiveStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct TeacherFilter {
    pub search: Option<String>,
    pub gender: Option<Gender>,
    pub status: Option<ActiveStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct SectionFilter {
    pub search: Option<String>,
    pub grade_level: Option<GradeLevel>,
    pub strand: Option<Strand>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role: Option<Role>,
}

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

/// Offset pagination request. `page` is 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    /// Clamps out-of-range values instead of rejecting them: page 0 becomes
    /// 1, limit is held to `1..=MAX_PER_PAGE`.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub total: i64,
    pub per_page: u32,
    pub current_page: u32,
    pub last_page: u32,
}

impl Pagination {
    pub fn new(total: i64, request: PageRequest) -> Self {
        let per_page = i64::from(request.limit);
        let pages = (total.max(0) + per_page - 1) / per_page;
        Self {
            total,
            per_page: request.limit,
            current_page: request.page,
            last_page: u32::try_from(pages.max(1)).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

//! SQLite persistence for the school back-end.
//!
//! `SchoolDb` owns one connection and is split across files by entity
//! (`subjects`, `enrollment`, `students`, ...), each contributing an
//! `impl SchoolDb` block. `DbHandle` is the async-facing wrapper used by
//! the HTTP handlers.

mod catalog;
mod enrollment;
mod sections;
mod students;
mod subjects;
mod teachers;
mod users;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior, params_from_iter};

use super::models::{DashboardStats, Page, PageRequest, Pagination};
use crate::errors::{Result, SchoolError};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Async-safe handle to the school database.
///
/// Wraps `SchoolDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<SchoolDb>>,
}

impl DbHandle {
    pub fn new(db: SchoolDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SchoolDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| SchoolError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| SchoolError::Other(anyhow::Error::new(e).context("DB task panicked")))?
    }

    /// Acquire the database mutex synchronously. Only for startup, CLI
    /// commands and tests; never from a request path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, SchoolDb>> {
        self.inner.lock().map_err(|_| SchoolError::LockPoisoned)
    }
}

pub struct SchoolDb {
    conn: Connection,
}

impl SchoolDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open(path: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("Failed to enable WAL journal")?;
        tracing::debug!(journal_mode = %mode, path = %path.display(), "opened database");
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL COLLATE NOCASE UNIQUE,
                    role TEXT NOT NULL DEFAULT 'Student',
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS personal_access_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    token_hash TEXT NOT NULL UNIQUE,
                    last_used_at TEXT,
                    expires_at TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS subjects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    code TEXT NOT NULL COLLATE NOCASE,
                    status TEXT NOT NULL DEFAULT 'Available',
                    grade_level TEXT NOT NULL,
                    strand TEXT NOT NULL,
                    description TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS students (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    gender TEXT NOT NULL,
                    grade_level TEXT NOT NULL,
                    strand TEXT NOT NULL,
                    section TEXT,
                    subject TEXT,
                    email TEXT COLLATE NOCASE,
                    phone TEXT,
                    address TEXT,
                    guardian_name TEXT,
                    guardian_phone TEXT,
                    avatar TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS subject_student (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    subject_id INTEGER NOT NULL REFERENCES subjects(id),
                    student_id INTEGER NOT NULL REFERENCES students(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(subject_id, student_id)
                );

                CREATE TABLE IF NOT EXISTS teachers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL COLLATE NOCASE UNIQUE,
                    gender TEXT NOT NULL,
                    phone TEXT,
                    address TEXT,
                    specialization TEXT,
                    avatar TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sections (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    grade_level TEXT NOT NULL,
                    strand TEXT NOT NULL,
                    adviser_id INTEGER REFERENCES teachers(id) ON DELETE SET NULL,
                    room TEXT,
                    capacity INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(name, grade_level)
                );

                CREATE TABLE IF NOT EXISTS grade_levels (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL COLLATE NOCASE UNIQUE,
                    description TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS strands (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    code TEXT NOT NULL COLLATE NOCASE UNIQUE,
                    description TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_subjects_code_live
                    ON subjects(code) WHERE deleted_at IS NULL;
                CREATE INDEX IF NOT EXISTS idx_subjects_created ON subjects(created_at);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_students_email_live
                    ON students(email) WHERE deleted_at IS NULL AND email IS NOT NULL;
                CREATE INDEX IF NOT EXISTS idx_students_created ON students(created_at);
                CREATE INDEX IF NOT EXISTS idx_subject_student_student ON subject_student(student_id);
                CREATE INDEX IF NOT EXISTS idx_tokens_user ON personal_access_tokens(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Begin a `BEGIN IMMEDIATE` transaction. The write lock is taken up
    /// front so concurrent processes serialize on the database, not on a
    /// lost upgrade halfway through a batch. Dropping without `commit`
    /// rolls back.
    fn immediate(&self) -> rusqlite::Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
    }

    /// Run a filtered, ordered, offset-paginated query.
    fn paginate<T, F>(
        &self,
        select: &str,
        from: &str,
        conditions: &Conditions,
        order_by: &str,
        page: PageRequest,
        map: F,
    ) -> Result<Page<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let where_sql = conditions.to_sql();
        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {from}{where_sql}"),
            params_from_iter(conditions.args()),
            |row| row.get(0),
        )?;

        let mut args = conditions.args().to_vec();
        args.push(Value::Integer(i64::from(page.limit)));
        args.push(Value::Integer(page.offset()));
        let sql =
            format!("SELECT {select} FROM {from}{where_sql} ORDER BY {order_by} LIMIT ? OFFSET ?");
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(args.iter()), map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            pagination: Pagination::new(total, page),
        })
    }

    // ── Dashboard ─────────────────────────────────────────────────────

    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };
        Ok(DashboardStats {
            students: count("SELECT COUNT(*) FROM students WHERE deleted_at IS NULL")?,
            teachers: count("SELECT COUNT(*) FROM teachers")?,
            subjects: count("SELECT COUNT(*) FROM subjects WHERE deleted_at IS NULL")?,
            sections: count("SELECT COUNT(*) FROM sections")?,
            users: count("SELECT COUNT(*) FROM users")?,
        })
    }
}

/// Current UTC time with millisecond precision, the format every
/// timestamp column uses. Lexicographic order matches time order.
pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Trimmed, non-empty text or `None`.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accumulates `AND`-joined WHERE clauses with positional `?` arguments.
#[derive(Debug, Default)]
pub(crate) struct Conditions {
    clauses: Vec<String>,
    args: Vec<Value>,
}

impl Conditions {
    pub(crate) fn new(base: &str) -> Self {
        Self {
            clauses: vec![base.to_string()],
            args: Vec::new(),
        }
    }

    pub(crate) fn eq(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.clauses.push(format!("{column} = ?"));
        self.args.push(value.into());
        self
    }

    /// Substring match of `term` against any of `columns`. A blank term
    /// adds nothing. `%` and `_` in the term match literally.
    pub(crate) fn search(&mut self, columns: &[&str], term: Option<&str>) -> &mut Self {
        let Some(term) = non_empty(term) else {
            return self;
        };
        let pattern = format!("%{}%", escape_like(term));
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("{c} LIKE ? ESCAPE '\\'"))
            .collect();
        self.clauses.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            self.args.push(Value::Text(pattern.clone()));
        }
        self
    }

    pub(crate) fn to_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(crate) fn args(&self) -> &[Value] {
        &self.args
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `Some(id)` when the row exists, used for uniqueness probes.
fn find_id(conn: &Connection, sql: &str, args: &[Value]) -> Result<Option<i64>> {
    use rusqlite::OptionalExtension;
    Ok(conn
        .query_row(sql, params_from_iter(args), |row| row.get(0))
        .optional()?)
}

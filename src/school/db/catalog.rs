//! Grade-level and strand catalogs: small admin-maintained lookup tables,
//! independent of the fixed `GradeLevel`/`Strand` enums used on records.

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};

use super::{Conditions, SchoolDb, find_id, non_empty, timestamp};
use crate::errors::{Result, SchoolError, is_unique_violation};
use crate::school::models::*;

const GRADE_LEVEL_COLUMNS: &str = "id, name, description, is_active, created_at, updated_at";
const STRAND_COLUMNS: &str = "id, name, code, description, is_active, created_at, updated_at";
const DUPLICATE_GRADE_LEVEL: &str = "The name has already been taken.";

fn grade_level_from_row(row: &Row<'_>) -> rusqlite::Result<GradeLevelRecord> {
    Ok(GradeLevelRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn strand_from_row(row: &Row<'_>) -> rusqlite::Result<StrandRecord> {
    Ok(StrandRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Required text field of a catalog entry on create.
fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    non_empty(value).ok_or_else(|| {
        SchoolError::validation(field, format!("The {field} field is required."))
    })
}

impl SchoolDb {
    // ── Grade levels ──────────────────────────────────────────────────

    pub fn list_grade_levels(
        &self,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<GradeLevelRecord>> {
        let mut conditions = Conditions::new("1 = 1");
        conditions.search(&["name", "description"], search);
        self.paginate(
            GRADE_LEVEL_COLUMNS,
            "grade_levels",
            &conditions,
            "name, id",
            page,
            grade_level_from_row,
        )
    }

    pub fn get_grade_level(&self, id: i64) -> Result<Option<GradeLevelRecord>> {
        let sql = format!("SELECT {GRADE_LEVEL_COLUMNS} FROM grade_levels WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], grade_level_from_row)
            .optional()?)
    }

    fn require_grade_level(&self, id: i64) -> Result<GradeLevelRecord> {
        self.get_grade_level(id)?
            .ok_or_else(|| SchoolError::not_found("Grade level", id))
    }

    fn ensure_grade_level_name_available(&self, name: &str, except: Option<i64>) -> Result<()> {
        let taken = find_id(
            &self.conn,
            "SELECT id FROM grade_levels WHERE name = ? AND id != ?",
            &[Value::Text(name.to_string()), Value::Integer(except.unwrap_or(0))],
        )?;
        match taken {
            Some(_) => Err(SchoolError::validation("name", DUPLICATE_GRADE_LEVEL)),
            None => Ok(()),
        }
    }

    pub fn create_grade_level(&self, entry: &CatalogEntry) -> Result<GradeLevelRecord> {
        let name = required(entry.name.as_deref(), "name")?;
        let tx = self.immediate()?;
        self.ensure_grade_level_name_available(name, None)?;
        let now = timestamp();
        tx.execute(
            "INSERT INTO grade_levels (name, description, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, entry.description, entry.is_active.unwrap_or(true), now],
        )
        .map_err(|e| map_conflict(e, || SchoolError::validation("name", DUPLICATE_GRADE_LEVEL)))?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(grade_level_id = id, name, "grade level created");
        self.require_grade_level(id)
    }

    pub fn update_grade_level(&self, id: i64, entry: &CatalogEntry) -> Result<GradeLevelRecord> {
        let tx = self.immediate()?;
        let current = self.require_grade_level(id)?;
        let name = match non_empty(entry.name.as_deref()) {
            Some(name) => {
                self.ensure_grade_level_name_available(name, Some(id))?;
                name.to_string()
            }
            None => current.name,
        };
        tx.execute(
            "UPDATE grade_levels SET name = ?1, description = ?2, is_active = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                name,
                entry.description.clone().or(current.description),
                entry.is_active.unwrap_or(current.is_active),
                timestamp(),
                id
            ],
        )
        .map_err(|e| map_conflict(e, || SchoolError::validation("name", DUPLICATE_GRADE_LEVEL)))?;
        tx.commit()?;
        self.require_grade_level(id)
    }

    pub fn delete_grade_level(&self, id: i64) -> Result<GradeLevelRecord> {
        let tx = self.immediate()?;
        let record = self.require_grade_level(id)?;
        tx.execute("DELETE FROM grade_levels WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!(grade_level_id = id, "grade level deleted");
        Ok(record)
    }

    // ── Strands ───────────────────────────────────────────────────────

    pub fn list_strands(&self, search: Option<&str>, page: PageRequest) -> Result<Page<StrandRecord>> {
        let mut conditions = Conditions::new("1 = 1");
        conditions.search(&["name", "code", "description"], search);
        self.paginate(
            STRAND_COLUMNS,
            "strands",
            &conditions,
            "code, id",
            page,
            strand_from_row,
        )
    }

    pub fn get_strand(&self, id: i64) -> Result<Option<StrandRecord>> {
        let sql = format!("SELECT {STRAND_COLUMNS} FROM strands WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], strand_from_row)
            .optional()?)
    }

    fn require_strand(&self, id: i64) -> Result<StrandRecord> {
        self.get_strand(id)?
            .ok_or_else(|| SchoolError::not_found("Strand", id))
    }

    fn ensure_strand_code_available(&self, code: &str, except: Option<i64>) -> Result<()> {
        let taken = find_id(
            &self.conn,
            "SELECT id FROM strands WHERE code = ? AND id != ?",
            &[Value::Text(code.to_string()), Value::Integer(except.unwrap_or(0))],
        )?;
        match taken {
            Some(_) => Err(SchoolError::DuplicateCode {
                code: code.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn create_strand(&self, entry: &CatalogEntry) -> Result<StrandRecord> {
        let name = required(entry.name.as_deref(), "name")?;
        let code = required(entry.code.as_deref(), "code")?;
        let tx = self.immediate()?;
        self.ensure_strand_code_available(code, None)?;
        let now = timestamp();
        tx.execute(
            "INSERT INTO strands (name, code, description, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![name, code, entry.description, entry.is_active.unwrap_or(true), now],
        )
        .map_err(|e| map_conflict(e, || SchoolError::DuplicateCode { code: code.to_string() }))?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(strand_id = id, code, "strand created");
        self.require_strand(id)
    }

    pub fn update_strand(&self, id: i64, entry: &CatalogEntry) -> Result<StrandRecord> {
        let tx = self.immediate()?;
        let current = self.require_strand(id)?;
        let code = match non_empty(entry.code.as_deref()) {
            Some(code) => {
                self.ensure_strand_code_available(code, Some(id))?;
                code.to_string()
            }
            None => current.code,
        };
        tx.execute(
            "UPDATE strands SET name = ?1, code = ?2, description = ?3, is_active = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                non_empty(entry.name.as_deref()).map(str::to_string).unwrap_or(current.name),
                code,
                entry.description.clone().or(current.description),
                entry.is_active.unwrap_or(current.is_active),
                timestamp(),
                id
            ],
        )
        .map_err(|e| map_conflict(e, || SchoolError::DuplicateCode { code: code.clone() }))?;
        tx.commit()?;
        self.require_strand(id)
    }

    pub fn delete_strand(&self, id: i64) -> Result<StrandRecord> {
        let tx = self.immediate()?;
        let record = self.require_strand(id)?;
        tx.execute("DELETE FROM strands WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!(strand_id = id, "strand deleted");
        Ok(record)
    }
}

fn map_conflict(err: rusqlite::Error, conflict: impl FnOnce() -> SchoolError) -> SchoolError {
    if is_unique_violation(&err) {
        conflict()
    } else {
        err.into()
    }
}

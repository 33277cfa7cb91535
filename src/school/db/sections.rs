use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};

use super::{Conditions, SchoolDb, find_id, timestamp};
use crate::errors::{FieldErrors, Result, SchoolError, is_unique_violation};
use crate::school::models::*;

const SECTION_COLUMNS: &str = "sc.id, sc.name, sc.grade_level, sc.strand, sc.adviser_id,
    t.name AS adviser_name, sc.room, sc.capacity, sc.created_at, sc.updated_at";

const SECTION_FROM: &str = "sections sc LEFT JOIN teachers t ON t.id = sc.adviser_id";

fn section_from_row(row: &Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: row.get(0)?,
        name: row.get(1)?,
        grade_level: row.get(2)?,
        strand: row.get(3)?,
        adviser_id: row.get(4)?,
        adviser_name: row.get(5)?,
        room: row.get(6)?,
        capacity: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const DUPLICATE_SECTION: &str = "A section with this name already exists for the grade level.";

impl SchoolDb {
    pub fn list_sections(&self, filter: &SectionFilter, page: PageRequest) -> Result<Page<Section>> {
        let mut conditions = Conditions::new("1 = 1");
        conditions.search(&["sc.name", "sc.room"], filter.search.as_deref());
        if let Some(grade_level) = filter.grade_level {
            conditions.eq("sc.grade_level", grade_level.as_str().to_string());
        }
        if let Some(strand) = filter.strand {
            conditions.eq("sc.strand", strand.as_str().to_string());
        }
        self.paginate(
            SECTION_COLUMNS,
            SECTION_FROM,
            &conditions,
            "sc.grade_level, sc.name, sc.id",
            page,
            section_from_row,
        )
    }

    pub fn get_section(&self, id: i64) -> Result<Option<Section>> {
        let sql = format!("SELECT {SECTION_COLUMNS} FROM {SECTION_FROM} WHERE sc.id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], section_from_row)
            .optional()?)
    }

    fn require_section(&self, id: i64) -> Result<Section> {
        self.get_section(id)?
            .ok_or_else(|| SchoolError::not_found("Section", id))
    }

    /// Cross-table checks: the adviser must exist and `(name, grade_level)`
    /// must be free. Both failures are reported together.
    fn check_section(
        &self,
        name: &str,
        grade_level: GradeLevel,
        adviser_id: Option<i64>,
        except: Option<i64>,
    ) -> Result<()> {
        let mut errors = FieldErrors::new();
        if let Some(adviser_id) = adviser_id {
            if self.get_teacher(adviser_id)?.is_none() {
                errors.add("adviser_id", "The selected adviser does not exist.");
            }
        }
        let taken = find_id(
            &self.conn,
            "SELECT id FROM sections WHERE name = ? AND grade_level = ? AND id != ?",
            &[
                Value::Text(name.to_string()),
                Value::Text(grade_level.as_str().to_string()),
                Value::Integer(except.unwrap_or(0)),
            ],
        )?;
        if taken.is_some() {
            errors.add("name", DUPLICATE_SECTION);
        }
        errors.into_result()
    }

    pub fn create_section(&self, new: &NewSection) -> Result<Section> {
        let tx = self.immediate()?;
        self.check_section(&new.name, new.grade_level, new.adviser_id, None)?;
        let now = timestamp();
        tx.execute(
            "INSERT INTO sections (name, grade_level, strand, adviser_id, room, capacity, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                new.name,
                new.grade_level,
                new.strand,
                new.adviser_id,
                new.room,
                new.capacity,
                now
            ],
        )
        .map_err(map_section_conflict)?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(section_id = id, name = %new.name, "section created");
        self.require_section(id)
    }

    pub fn update_section(&self, id: i64, changes: &SectionChanges) -> Result<Section> {
        let tx = self.immediate()?;
        let current = self.require_section(id)?;
        let name = changes.name.clone().unwrap_or(current.name);
        let grade_level = changes.grade_level.unwrap_or(current.grade_level);
        self.check_section(&name, grade_level, changes.adviser_id, Some(id))?;
        tx.execute(
            "UPDATE sections SET name = ?1, grade_level = ?2, strand = ?3, adviser_id = ?4, room = ?5,
                 capacity = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                name,
                grade_level,
                changes.strand.unwrap_or(current.strand),
                changes.adviser_id.or(current.adviser_id),
                changes.room.clone().or(current.room),
                changes.capacity.or(current.capacity),
                timestamp(),
                id
            ],
        )
        .map_err(map_section_conflict)?;
        tx.commit()?;
        self.require_section(id)
    }

    pub fn delete_section(&self, id: i64) -> Result<Section> {
        let tx = self.immediate()?;
        let section = self.require_section(id)?;
        tx.execute("DELETE FROM sections WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!(section_id = id, "section deleted");
        Ok(section)
    }
}

fn map_section_conflict(err: rusqlite::Error) -> SchoolError {
    if is_unique_violation(&err) {
        SchoolError::validation("name", DUPLICATE_SECTION)
    } else {
        err.into()
    }
}

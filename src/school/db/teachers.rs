use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};

use super::{Conditions, SchoolDb, find_id, timestamp};
use crate::errors::{Result, SchoolError, is_unique_violation};
use crate::school::models::*;

const TEACHER_COLUMNS: &str = "t.id, t.name, t.email, t.gender, t.phone, t.address, t.specialization,
    t.avatar, t.is_active, t.created_at, t.updated_at";

fn teacher_from_row(row: &Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        gender: row.get(3)?,
        phone: row.get(4)?,
        address: row.get(5)?,
        specialization: row.get(6)?,
        avatar: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl SchoolDb {
    pub fn list_teachers(&self, filter: &TeacherFilter, page: PageRequest) -> Result<Page<Teacher>> {
        let mut conditions = Conditions::new("1 = 1");
        conditions.search(
            &["t.name", "t.email", "t.specialization"],
            filter.search.as_deref(),
        );
        if let Some(gender) = filter.gender {
            conditions.eq("t.gender", gender.as_str().to_string());
        }
        if let Some(status) = filter.status {
            conditions.eq("t.is_active", status.as_flag());
        }
        self.paginate(
            TEACHER_COLUMNS,
            "teachers t",
            &conditions,
            "t.created_at DESC, t.id DESC",
            page,
            teacher_from_row,
        )
    }

    pub fn get_teacher(&self, id: i64) -> Result<Option<Teacher>> {
        let sql = format!("SELECT {TEACHER_COLUMNS} FROM teachers t WHERE t.id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], teacher_from_row)
            .optional()?)
    }

    fn require_teacher(&self, id: i64) -> Result<Teacher> {
        self.get_teacher(id)?
            .ok_or_else(|| SchoolError::not_found("Teacher", id))
    }

    fn ensure_teacher_email_available(&self, email: &str, except: Option<i64>) -> Result<()> {
        let taken = find_id(
            &self.conn,
            "SELECT id FROM teachers WHERE email = ? AND id != ?",
            &[Value::Text(email.to_string()), Value::Integer(except.unwrap_or(0))],
        )?;
        match taken {
            Some(_) => Err(SchoolError::DuplicateEmail {
                email: email.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn create_teacher(&self, new: &NewTeacher) -> Result<Teacher> {
        let tx = self.immediate()?;
        self.ensure_teacher_email_available(&new.email, None)?;
        let now = timestamp();
        tx.execute(
            "INSERT INTO teachers (name, email, gender, phone, address, specialization, is_active,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                new.name,
                new.email,
                new.gender,
                new.phone,
                new.address,
                new.specialization,
                new.is_active,
                now
            ],
        )
        .map_err(|e| map_email_conflict(e, &new.email))?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(teacher_id = id, "teacher created");
        self.require_teacher(id)
    }

    pub fn update_teacher(&self, id: i64, changes: &TeacherChanges) -> Result<Teacher> {
        let tx = self.immediate()?;
        let current = self.require_teacher(id)?;
        if let Some(email) = &changes.email {
            self.ensure_teacher_email_available(email, Some(id))?;
        }
        let email = changes.email.clone().unwrap_or(current.email);
        tx.execute(
            "UPDATE teachers SET name = ?1, email = ?2, gender = ?3, phone = ?4, address = ?5,
                 specialization = ?6, is_active = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                changes.name.clone().unwrap_or(current.name),
                email,
                changes.gender.unwrap_or(current.gender),
                changes.phone.clone().or(current.phone),
                changes.address.clone().or(current.address),
                changes.specialization.clone().or(current.specialization),
                changes.is_active.unwrap_or(current.is_active),
                timestamp(),
                id
            ],
        )
        .map_err(|e| map_email_conflict(e, &email))?;
        tx.commit()?;
        self.require_teacher(id)
    }

    /// Hard delete. Sections advised by the teacher keep existing with no
    /// adviser. Returns the removed row so the caller can drop its avatar.
    pub fn delete_teacher(&self, id: i64) -> Result<Teacher> {
        let tx = self.immediate()?;
        let teacher = self.require_teacher(id)?;
        tx.execute("DELETE FROM teachers WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!(teacher_id = id, "teacher deleted");
        Ok(teacher)
    }

    /// Record a new avatar path and return the one it replaces.
    pub fn set_teacher_avatar(&self, id: i64, path: &str) -> Result<Option<String>> {
        let tx = self.immediate()?;
        let previous = self.require_teacher(id)?.avatar;
        tx.execute(
            "UPDATE teachers SET avatar = ?1, updated_at = ?2 WHERE id = ?3",
            params![path, timestamp(), id],
        )?;
        tx.commit()?;
        Ok(previous)
    }
}

fn map_email_conflict(err: rusqlite::Error, email: &str) -> SchoolError {
    if is_unique_violation(&err) {
        SchoolError::DuplicateEmail {
            email: email.to_string(),
        }
    } else {
        err.into()
    }
}

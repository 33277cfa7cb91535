use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};

use super::{Conditions, SchoolDb, find_id, timestamp};
use crate::errors::{Result, SchoolError, is_unique_violation};
use crate::school::models::*;

pub(super) const STUDENT_COLUMNS: &str = "st.id, st.name, st.gender, st.grade_level, st.strand, st.section,
    st.subject, st.email, st.phone, st.address, st.guardian_name, st.guardian_phone, st.avatar,
    st.is_active,
    (SELECT COUNT(*) FROM subject_student ss WHERE ss.student_id = st.id) AS subjects_count,
    st.created_at, st.updated_at, st.deleted_at";

pub(super) fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        gender: row.get(2)?,
        grade_level: row.get(3)?,
        strand: row.get(4)?,
        section: row.get(5)?,
        subject: row.get(6)?,
        email: row.get(7)?,
        phone: row.get(8)?,
        address: row.get(9)?,
        guardian_name: row.get(10)?,
        guardian_phone: row.get(11)?,
        avatar: row.get(12)?,
        is_active: row.get(13)?,
        subjects_count: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
        deleted_at: row.get(17)?,
    })
}

impl SchoolDb {
    pub fn list_students(&self, filter: &StudentFilter, page: PageRequest) -> Result<Page<Student>> {
        let mut conditions = Conditions::new("st.deleted_at IS NULL");
        conditions.search(
            &["st.name", "st.email", "st.section"],
            filter.search.as_deref(),
        );
        if let Some(grade_level) = filter.grade_level {
            conditions.eq("st.grade_level", grade_level.as_str().to_string());
        }
        if let Some(strand) = filter.strand {
            conditions.eq("st.strand", strand.as_str().to_string());
        }
        if let Some(section) = super::non_empty(filter.section.as_deref()) {
            conditions.eq("st.section", section.to_string());
        }
        if let Some(gender) = filter.gender {
            conditions.eq("st.gender", gender.as_str().to_string());
        }
        if let Some(status) = filter.status {
            conditions.eq("st.is_active", status.as_flag());
        }
        self.paginate(
            STUDENT_COLUMNS,
            "students st",
            &conditions,
            "st.created_at DESC, st.id DESC",
            page,
            student_from_row,
        )
    }

    /// Live student by id.
    pub fn get_student(&self, id: i64) -> Result<Option<Student>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students st WHERE st.id = ?1 AND st.deleted_at IS NULL");
        Ok(self
            .conn
            .query_row(&sql, params![id], student_from_row)
            .optional()?)
    }

    fn get_student_with_trashed(&self, id: i64) -> Result<Option<Student>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students st WHERE st.id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], student_from_row)
            .optional()?)
    }

    fn require_student(&self, id: i64) -> Result<Student> {
        self.get_student(id)?
            .ok_or_else(|| SchoolError::not_found("Student", id))
    }

    pub fn get_student_detail(&self, id: i64) -> Result<StudentDetail> {
        let student = self.require_student(id)?;
        let subjects = self.enrolled_subjects(id)?;
        Ok(StudentDetail { student, subjects })
    }

    fn ensure_student_email_available(&self, email: &str, except: Option<i64>) -> Result<()> {
        let taken = find_id(
            &self.conn,
            "SELECT id FROM students WHERE email = ? AND deleted_at IS NULL AND id != ?",
            &[Value::Text(email.to_string()), Value::Integer(except.unwrap_or(0))],
        )?;
        match taken {
            Some(_) => Err(SchoolError::DuplicateEmail {
                email: email.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn create_student(&self, new: &NewStudent) -> Result<Student> {
        let tx = self.immediate()?;
        if let Some(email) = &new.email {
            self.ensure_student_email_available(email, None)?;
        }
        let now = timestamp();
        tx.execute(
            "INSERT INTO students (name, gender, grade_level, strand, section, subject, email, phone,
                 address, guardian_name, guardian_phone, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                new.name,
                new.gender,
                new.grade_level,
                new.strand,
                new.section,
                new.subject,
                new.email,
                new.phone,
                new.address,
                new.guardian_name,
                new.guardian_phone,
                new.is_active,
                now
            ],
        )
        .map_err(|e| map_email_conflict(e, new.email.as_deref()))?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(student_id = id, "student created");
        self.require_student(id)
    }

    pub fn update_student(&self, id: i64, changes: &StudentChanges) -> Result<Student> {
        let tx = self.immediate()?;
        let current = self.require_student(id)?;
        if let Some(email) = &changes.email {
            self.ensure_student_email_available(email, Some(id))?;
        }

        let email = changes.email.clone().or(current.email);
        tx.execute(
            "UPDATE students SET name = ?1, gender = ?2, grade_level = ?3, strand = ?4, section = ?5,
                 subject = ?6, email = ?7, phone = ?8, address = ?9, guardian_name = ?10,
                 guardian_phone = ?11, is_active = ?12, updated_at = ?13
             WHERE id = ?14",
            params![
                changes.name.clone().unwrap_or(current.name),
                changes.gender.unwrap_or(current.gender),
                changes.grade_level.unwrap_or(current.grade_level),
                changes.strand.unwrap_or(current.strand),
                changes.section.clone().or(current.section),
                changes.subject.clone().or(current.subject),
                email,
                changes.phone.clone().or(current.phone),
                changes.address.clone().or(current.address),
                changes.guardian_name.clone().or(current.guardian_name),
                changes.guardian_phone.clone().or(current.guardian_phone),
                changes.is_active.unwrap_or(current.is_active),
                timestamp(),
                id
            ],
        )
        .map_err(|e| map_email_conflict(e, email.as_deref()))?;
        tx.commit()?;
        self.require_student(id)
    }

    /// Soft delete plus removal of every enrollment row, in one
    /// transaction. The avatar path is cleared with it; the returned row
    /// still carries it so the caller can remove the stored file.
    pub fn delete_student(&self, id: i64) -> Result<Student> {
        let tx = self.immediate()?;
        let student = self.require_student(id)?;
        let now = timestamp();
        let detached = tx.execute(
            "DELETE FROM subject_student WHERE student_id = ?1",
            params![id],
        )?;
        tx.execute(
            "UPDATE students SET deleted_at = ?1, updated_at = ?1, avatar = NULL WHERE id = ?2",
            params![now, id],
        )?;
        tx.commit()?;
        tracing::info!(student_id = id, detached, "student soft-deleted");
        Ok(student)
    }

    /// Record a new avatar path and return the one it replaces.
    pub fn set_student_avatar(&self, id: i64, path: &str) -> Result<Option<String>> {
        let tx = self.immediate()?;
        let previous = self.require_student(id)?.avatar;
        tx.execute(
            "UPDATE students SET avatar = ?1, updated_at = ?2 WHERE id = ?3",
            params![path, timestamp(), id],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    /// Bring a soft-deleted student back. Enrollments removed by the
    /// delete stay removed.
    pub fn restore_student(&self, id: i64) -> Result<Student> {
        let tx = self.immediate()?;
        let student = self
            .get_student_with_trashed(id)?
            .filter(|s| s.deleted_at.is_some())
            .ok_or_else(|| SchoolError::not_found("Deleted student", id))?;
        if let Some(email) = &student.email {
            self.ensure_student_email_available(email, Some(id))?;
        }
        tx.execute(
            "UPDATE students SET deleted_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![timestamp(), id],
        )
        .map_err(|e| map_email_conflict(e, student.email.as_deref()))?;
        tx.commit()?;
        tracing::info!(student_id = id, "student restored");
        self.require_student(id)
    }
}

fn map_email_conflict(err: rusqlite::Error, email: Option<&str>) -> SchoolError {
    match email {
        Some(email) if is_unique_violation(&err) => SchoolError::DuplicateEmail {
            email: email.to_string(),
        },
        _ => err.into(),
    }
}

//! Subject ↔ student enrollment.
//!
//! Rows in `subject_student` are only written here. Each batch runs in a
//! single `BEGIN IMMEDIATE` transaction: either every requested row is
//! attached/detached or nothing changes.

use std::collections::BTreeSet;

use rusqlite::params;

use super::students::{STUDENT_COLUMNS, student_from_row};
use super::subjects::{SUBJECT_COLUMNS, subject_from_row};
use super::{SchoolDb, timestamp};
use crate::errors::{Result, SchoolError};
use crate::school::models::{EnrollmentChange, Student, Subject};

/// De-duplicated, ordered ids. An empty batch is a validation failure.
fn normalize_ids(student_ids: &[i64]) -> Result<Vec<i64>> {
    let ids: BTreeSet<i64> = student_ids.iter().copied().collect();
    if ids.is_empty() {
        return Err(SchoolError::validation(
            "student_ids",
            "The student ids field must contain at least one student.",
        ));
    }
    Ok(ids.into_iter().collect())
}

impl SchoolDb {
    /// Attach students to a subject. Already-enrolled ids are skipped; any
    /// unknown (or soft-deleted) student fails the whole batch.
    pub fn enroll(&self, subject_id: i64, student_ids: &[i64]) -> Result<EnrollmentChange> {
        let ids = normalize_ids(student_ids)?;
        let tx = self.immediate()?;

        if self.get_subject(subject_id)?.is_none() {
            return Err(SchoolError::not_found("Subject", subject_id));
        }

        let mut missing = Vec::new();
        {
            let mut exists = tx.prepare_cached(
                "SELECT EXISTS(SELECT 1 FROM students WHERE id = ?1 AND deleted_at IS NULL)",
            )?;
            for id in &ids {
                let found: bool = exists.query_row(params![id], |row| row.get(0))?;
                if !found {
                    missing.push(*id);
                }
            }
        }
        if !missing.is_empty() {
            return Err(SchoolError::StudentNotFound { ids: missing });
        }

        let now = timestamp();
        let mut changed = 0;
        {
            let mut insert = tx.prepare_cached(
                "INSERT OR IGNORE INTO subject_student (subject_id, student_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
            )?;
            for id in &ids {
                changed += insert.execute(params![subject_id, id, now])?;
            }
        }
        tx.commit()?;

        tracing::info!(subject_id, requested = ids.len(), attached = changed, "students enrolled");
        let subject = self
            .get_subject(subject_id)?
            .ok_or_else(|| SchoolError::not_found("Subject", subject_id))?;
        Ok(EnrollmentChange { subject, changed })
    }

    /// Detach students from a subject. Pairs that do not exist are no-ops.
    pub fn unenroll(&self, subject_id: i64, student_ids: &[i64]) -> Result<EnrollmentChange> {
        let ids = normalize_ids(student_ids)?;
        let tx = self.immediate()?;

        if self.get_subject_with_trashed(subject_id)?.is_none() {
            return Err(SchoolError::not_found("Subject", subject_id));
        }

        let mut changed = 0;
        {
            let mut delete = tx.prepare_cached(
                "DELETE FROM subject_student WHERE subject_id = ?1 AND student_id = ?2",
            )?;
            for id in &ids {
                changed += delete.execute(params![subject_id, id])?;
            }
        }
        tx.commit()?;

        tracing::info!(subject_id, requested = ids.len(), detached = changed, "students unenrolled");
        let subject = self
            .get_subject_with_trashed(subject_id)?
            .ok_or_else(|| SchoolError::not_found("Subject", subject_id))?;
        Ok(EnrollmentChange { subject, changed })
    }

    /// Live students enrolled in a subject, by name.
    pub fn enrolled_students(&self, subject_id: i64) -> Result<Vec<Student>> {
        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM students st
             JOIN subject_student ss ON ss.student_id = st.id
             WHERE ss.subject_id = ?1 AND st.deleted_at IS NULL
             ORDER BY st.name, st.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let students = stmt
            .query_map(params![subject_id], student_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(students)
    }

    /// Live subjects a student is enrolled in, by name.
    pub fn enrolled_subjects(&self, student_id: i64) -> Result<Vec<Subject>> {
        let sql = format!(
            "SELECT {SUBJECT_COLUMNS} FROM subjects s
             JOIN subject_student e ON e.subject_id = s.id
             WHERE e.student_id = ?1 AND s.deleted_at IS NULL
             ORDER BY s.name, s.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let subjects = stmt
            .query_map(params![student_id], subject_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subjects)
    }
}

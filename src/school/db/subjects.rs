use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};

use super::{Conditions, SchoolDb, find_id, timestamp};
use crate::errors::{Result, SchoolError, is_unique_violation};
use crate::school::models::*;

pub(super) const SUBJECT_COLUMNS: &str = "s.id, s.name, s.code, s.status, s.grade_level, s.strand, s.description,
    (SELECT COUNT(*) FROM subject_student ss WHERE ss.subject_id = s.id) AS students_count,
    s.created_at, s.updated_at, s.deleted_at";

pub(super) fn subject_from_row(row: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        status: row.get(3)?,
        grade_level: row.get(4)?,
        strand: row.get(5)?,
        description: row.get(6)?,
        students_count: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        deleted_at: row.get(10)?,
    })
}

impl SchoolDb {
    // ── Subject CRUD ──────────────────────────────────────────────────

    pub fn list_subjects(&self, filter: &SubjectFilter, page: PageRequest) -> Result<Page<Subject>> {
        let mut conditions = Conditions::new("s.deleted_at IS NULL");
        conditions.search(
            &["s.name", "s.code", "s.description"],
            filter.search.as_deref(),
        );
        if let Some(grade_level) = filter.grade_level {
            conditions.eq("s.grade_level", grade_level.as_str().to_string());
        }
        if let Some(strand) = filter.strand {
            conditions.eq("s.strand", strand.as_str().to_string());
        }
        if let Some(status) = filter.status {
            conditions.eq("s.status", status.as_str().to_string());
        }
        self.paginate(
            SUBJECT_COLUMNS,
            "subjects s",
            &conditions,
            "s.created_at DESC, s.id DESC",
            page,
            subject_from_row,
        )
    }

    /// Live subject by id.
    pub fn get_subject(&self, id: i64) -> Result<Option<Subject>> {
        let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects s WHERE s.id = ?1 AND s.deleted_at IS NULL");
        Ok(self
            .conn
            .query_row(&sql, params![id], subject_from_row)
            .optional()?)
    }

    /// Subject by id regardless of soft-delete state.
    pub fn get_subject_with_trashed(&self, id: i64) -> Result<Option<Subject>> {
        let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects s WHERE s.id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], subject_from_row)
            .optional()?)
    }

    fn require_subject(&self, id: i64) -> Result<Subject> {
        self.get_subject(id)?
            .ok_or_else(|| SchoolError::not_found("Subject", id))
    }

    pub fn get_subject_detail(&self, id: i64) -> Result<SubjectDetail> {
        let subject = self.require_subject(id)?;
        let students = self.enrolled_students(id)?;
        Ok(SubjectDetail { subject, students })
    }

    /// Fails with `DuplicateCode` when a live subject other than `except`
    /// already uses `code`.
    fn ensure_code_available(&self, code: &str, except: Option<i64>) -> Result<()> {
        let taken = find_id(
            &self.conn,
            "SELECT id FROM subjects WHERE code = ? AND deleted_at IS NULL AND id != ?",
            &[Value::Text(code.to_string()), Value::Integer(except.unwrap_or(0))],
        )?;
        match taken {
            Some(_) => Err(SchoolError::DuplicateCode {
                code: code.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn create_subject(&self, new: &NewSubject) -> Result<Subject> {
        let tx = self.immediate()?;
        self.ensure_code_available(&new.code, None)?;
        let now = timestamp();
        tx.execute(
            "INSERT INTO subjects (name, code, status, grade_level, strand, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                new.name,
                new.code,
                new.status,
                new.grade_level,
                new.strand,
                new.description,
                now
            ],
        )
        .map_err(|e| map_code_conflict(e, &new.code))?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(subject_id = id, code = %new.code, "subject created");
        self.require_subject(id)
    }

    pub fn update_subject(&self, id: i64, changes: &SubjectChanges) -> Result<Subject> {
        let tx = self.immediate()?;
        let current = self.require_subject(id)?;
        if let Some(code) = &changes.code {
            self.ensure_code_available(code, Some(id))?;
        }

        let code = changes.code.clone().unwrap_or(current.code);
        tx.execute(
            "UPDATE subjects SET name = ?1, code = ?2, status = ?3, grade_level = ?4, strand = ?5,
                 description = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                changes.name.clone().unwrap_or(current.name),
                code,
                changes.status.unwrap_or(current.status),
                changes.grade_level.unwrap_or(current.grade_level),
                changes.strand.unwrap_or(current.strand),
                changes.description.clone().or(current.description),
                timestamp(),
                id
            ],
        )
        .map_err(|e| map_code_conflict(e, &code))?;
        tx.commit()?;
        self.require_subject(id)
    }

    /// Soft delete. Rejected while any student is enrolled.
    pub fn delete_subject(&self, id: i64) -> Result<Subject> {
        let tx = self.immediate()?;
        let subject = self.require_subject(id)?;
        if subject.students_count > 0 {
            return Err(SchoolError::HasActiveEnrollments {
                subject_id: id,
                count: subject.students_count,
            });
        }
        let now = timestamp();
        tx.execute(
            "UPDATE subjects SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        tx.commit()?;
        tracing::info!(subject_id = id, "subject soft-deleted");
        self.get_subject_with_trashed(id)?
            .ok_or_else(|| SchoolError::not_found("Subject", id))
    }

    /// Bring a soft-deleted subject back. Its code must still be free.
    pub fn restore_subject(&self, id: i64) -> Result<Subject> {
        let tx = self.immediate()?;
        let subject = self
            .get_subject_with_trashed(id)?
            .filter(|s| s.deleted_at.is_some())
            .ok_or_else(|| SchoolError::not_found("Deleted subject", id))?;
        self.ensure_code_available(&subject.code, Some(id))?;
        tx.execute(
            "UPDATE subjects SET deleted_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![timestamp(), id],
        )
        .map_err(|e| map_code_conflict(e, &subject.code))?;
        tx.commit()?;
        tracing::info!(subject_id = id, "subject restored");
        self.require_subject(id)
    }
}

fn map_code_conflict(err: rusqlite::Error, code: &str) -> SchoolError {
    if is_unique_violation(&err) {
        SchoolError::DuplicateCode {
            code: code.to_string(),
        }
    } else {
        err.into()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;

    pub(crate) fn new_subject(code: &str, grade_level: GradeLevel) -> NewSubject {
        NewSubject {
            name: format!("Subject {code}"),
            code: code.to_string(),
            status: SubjectStatus::Available,
            grade_level,
            strand: Strand::Stem,
            description: None,
        }
    }

    #[test]
    fn test_create_subject() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let subject = db.create_subject(&new_subject("MATH101", GradeLevel::Grade10))?;
        assert!(subject.id > 0);
        assert_eq!(subject.code, "MATH101");
        assert_eq!(subject.grade_level, GradeLevel::Grade10);
        assert_eq!(subject.students_count, 0);
        assert!(subject.deleted_at.is_none());
        Ok(())
    }

    #[test]
    fn test_duplicate_live_code_is_rejected() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        db.create_subject(&new_subject("MATH101", GradeLevel::Grade10))?;
        let err = db
            .create_subject(&new_subject("MATH101", GradeLevel::Grade11))
            .unwrap_err();
        assert!(matches!(err, SchoolError::DuplicateCode { ref code } if code == "MATH101"));

        // Case differences still collide.
        let err = db
            .create_subject(&new_subject("math101", GradeLevel::Grade11))
            .unwrap_err();
        assert!(matches!(err, SchoolError::DuplicateCode { .. }));
        Ok(())
    }

    #[test]
    fn test_code_of_soft_deleted_subject_can_be_reused() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let old = db.create_subject(&new_subject("SCI7", GradeLevel::Grade7))?;
        db.delete_subject(old.id)?;
        let fresh = db.create_subject(&new_subject("SCI7", GradeLevel::Grade7))?;
        assert_ne!(fresh.id, old.id);
        Ok(())
    }

    #[test]
    fn test_update_subject_excludes_own_code() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let subject = db.create_subject(&new_subject("ENG9", GradeLevel::Grade9))?;
        let updated = db.update_subject(
            subject.id,
            &SubjectChanges {
                code: Some("ENG9".into()),
                name: Some("English 9".into()),
                status: Some(SubjectStatus::Unavailable),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.name, "English 9");
        assert_eq!(updated.status, SubjectStatus::Unavailable);
        assert_eq!(updated.grade_level, GradeLevel::Grade9);
        Ok(())
    }

    #[test]
    fn test_update_subject_to_taken_code_fails() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        db.create_subject(&new_subject("A1", GradeLevel::Grade8))?;
        let b = db.create_subject(&new_subject("B1", GradeLevel::Grade8))?;
        let err = db
            .update_subject(
                b.id,
                &SubjectChanges {
                    code: Some("A1".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SchoolError::DuplicateCode { .. }));
        Ok(())
    }

    #[test]
    fn test_update_missing_or_deleted_subject_is_not_found() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let err = db.update_subject(99, &SubjectChanges::default()).unwrap_err();
        assert!(matches!(err, SchoolError::NotFound { id: 99, .. }));

        let subject = db.create_subject(&new_subject("GONE", GradeLevel::Grade8))?;
        db.delete_subject(subject.id)?;
        let err = db
            .update_subject(subject.id, &SubjectChanges::default())
            .unwrap_err();
        assert!(matches!(err, SchoolError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_delete_soft_deletes_and_hides_from_list() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let subject = db.create_subject(&new_subject("HIST", GradeLevel::Grade12))?;
        let deleted = db.delete_subject(subject.id)?;
        assert!(deleted.deleted_at.is_some());

        let page = db.list_subjects(&SubjectFilter::default(), PageRequest::default())?;
        assert_eq!(page.pagination.total, 0);
        assert!(db.get_subject(subject.id)?.is_none());

        // Still physically present.
        let rows: i64 = db.conn.query_row("SELECT COUNT(*) FROM subjects", [], |r| r.get(0))?;
        assert_eq!(rows, 1);
        Ok(())
    }

    #[test]
    fn test_list_orders_newest_first_and_filters() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        db.create_subject(&new_subject("FIRST", GradeLevel::Grade10))?;
        db.create_subject(&NewSubject {
            strand: Strand::Abm,
            status: SubjectStatus::Unavailable,
            description: Some("Accounting basics".into()),
            ..new_subject("SECOND", GradeLevel::Grade11)
        })?;
        db.create_subject(&new_subject("THIRD", GradeLevel::Grade10))?;

        let all = db.list_subjects(&SubjectFilter::default(), PageRequest::default())?;
        let codes: Vec<_> = all.items.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["THIRD", "SECOND", "FIRST"]);

        let grade10 = db.list_subjects(
            &SubjectFilter {
                grade_level: Some(GradeLevel::Grade10),
                ..Default::default()
            },
            PageRequest::default(),
        )?;
        assert_eq!(grade10.pagination.total, 2);

        let abm_unavailable = db.list_subjects(
            &SubjectFilter {
                strand: Some(Strand::Abm),
                status: Some(SubjectStatus::Unavailable),
                ..Default::default()
            },
            PageRequest::default(),
        )?;
        assert_eq!(abm_unavailable.items.len(), 1);
        assert_eq!(abm_unavailable.items[0].code, "SECOND");

        let by_description = db.list_subjects(
            &SubjectFilter {
                search: Some("accounting".into()),
                ..Default::default()
            },
            PageRequest::default(),
        )?;
        assert_eq!(by_description.items.len(), 1);
        Ok(())
    }

    #[test]
    fn test_list_paginates_grade_ten() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        for i in 0..15 {
            db.create_subject(&new_subject(&format!("G10-{i}"), GradeLevel::Grade10))?;
        }
        for i in 0..5 {
            db.create_subject(&new_subject(&format!("G8-{i}"), GradeLevel::Grade8))?;
        }
        let filter = SubjectFilter {
            grade_level: Some(GradeLevel::Grade10),
            ..Default::default()
        };
        let first = db.list_subjects(&filter, PageRequest::new(Some(1), Some(10)))?;
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.pagination.total, 15);
        assert_eq!(first.pagination.last_page, 2);
        assert_eq!(first.pagination.current_page, 1);

        let second = db.list_subjects(&filter, PageRequest::new(Some(2), Some(10)))?;
        assert_eq!(second.items.len(), 5);
        Ok(())
    }

    #[test]
    fn test_search_treats_wildcards_literally() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        db.create_subject(&new_subject("PE_1", GradeLevel::Grade7))?;
        db.create_subject(&new_subject("PEX1", GradeLevel::Grade7))?;
        let page = db.list_subjects(
            &SubjectFilter {
                search: Some("PE_".into()),
                ..Default::default()
            },
            PageRequest::default(),
        )?;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].code, "PE_1");
        Ok(())
    }

    #[test]
    fn test_restore_subject() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let subject = db.create_subject(&new_subject("ART", GradeLevel::Grade9))?;
        db.delete_subject(subject.id)?;
        let restored = db.restore_subject(subject.id)?;
        assert!(restored.deleted_at.is_none());

        // Restoring a live subject is not found.
        let err = db.restore_subject(subject.id).unwrap_err();
        assert!(matches!(err, SchoolError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_restore_fails_when_code_was_reused() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let old = db.create_subject(&new_subject("MUSIC", GradeLevel::Grade9))?;
        db.delete_subject(old.id)?;
        db.create_subject(&new_subject("MUSIC", GradeLevel::Grade9))?;
        let err = db.restore_subject(old.id).unwrap_err();
        assert!(matches!(err, SchoolError::DuplicateCode { .. }));
        Ok(())
    }
}

//! Accounts and their personal access tokens.

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};

use super::{Conditions, SchoolDb, find_id, timestamp};
use crate::errors::{Result, SchoolError, is_unique_violation};
use crate::school::models::*;

const USER_COLUMNS: &str = "u.id, u.name, u.email, u.role, u.created_at, u.updated_at";
const TOKEN_COLUMNS: &str = "id, user_id, name, token_hash, last_used_at, expires_at, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<AccessToken> {
    Ok(AccessToken {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        token_hash: row.get(3)?,
        last_used_at: row.get(4)?,
        expires_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl SchoolDb {
    // ── Users ─────────────────────────────────────────────────────────

    pub fn list_users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>> {
        let mut conditions = Conditions::new("1 = 1");
        conditions.search(&["u.name", "u.email"], filter.search.as_deref());
        if let Some(role) = filter.role {
            conditions.eq("u.role", role.as_str().to_string());
        }
        self.paginate(
            USER_COLUMNS,
            "users u",
            &conditions,
            "u.created_at DESC, u.id DESC",
            page,
            user_from_row,
        )
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], user_from_row)
            .optional()?)
    }

    fn require_user(&self, id: i64) -> Result<User> {
        self.get_user(id)?
            .ok_or_else(|| SchoolError::not_found("User", id))
    }

    /// User plus stored password hash, for credential checks.
    pub fn find_user_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let sql = format!("SELECT {USER_COLUMNS}, u.password_hash FROM users u WHERE u.email = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![email.trim()], |row| {
                Ok((user_from_row(row)?, row.get(6)?))
            })
            .optional()?)
    }

    fn ensure_user_email_available(&self, email: &str, except: Option<i64>) -> Result<()> {
        let taken = find_id(
            &self.conn,
            "SELECT id FROM users WHERE email = ? AND id != ?",
            &[Value::Text(email.to_string()), Value::Integer(except.unwrap_or(0))],
        )?;
        match taken {
            Some(_) => Err(SchoolError::DuplicateEmail {
                email: email.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let tx = self.immediate()?;
        self.ensure_user_email_available(&new.email, None)?;
        let now = timestamp();
        tx.execute(
            "INSERT INTO users (name, email, role, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![new.name, new.email, new.role, new.password_hash, now],
        )
        .map_err(|e| map_email_conflict(e, &new.email))?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(user_id = id, role = %new.role, "user created");
        self.require_user(id)
    }

    pub fn update_user(&self, id: i64, changes: &UserChanges) -> Result<User> {
        let tx = self.immediate()?;
        let current = self.require_user(id)?;
        if let Some(email) = &changes.email {
            self.ensure_user_email_available(email, Some(id))?;
        }
        let email = changes.email.clone().unwrap_or(current.email);
        let now = timestamp();
        tx.execute(
            "UPDATE users SET name = ?1, email = ?2, role = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                changes.name.clone().unwrap_or(current.name),
                email,
                changes.role.unwrap_or(current.role),
                now,
                id
            ],
        )
        .map_err(|e| map_email_conflict(e, &email))?;
        if let Some(hash) = &changes.password_hash {
            tx.execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![hash, id],
            )?;
        }
        tx.commit()?;
        self.require_user(id)
    }

    /// Hard delete; tokens go with the user through the FK cascade.
    pub fn delete_user(&self, id: i64) -> Result<User> {
        let tx = self.immediate()?;
        let user = self.require_user(id)?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!(user_id = id, "user deleted");
        Ok(user)
    }

    // ── Tokens ────────────────────────────────────────────────────────

    pub fn create_token(
        &self,
        user_id: i64,
        name: &str,
        token_hash: &str,
        expires_at: Option<&str>,
    ) -> Result<AccessToken> {
        self.conn.execute(
            "INSERT INTO personal_access_tokens (user_id, name, token_hash, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, name, token_hash, expires_at, timestamp()],
        )?;
        let id = self.conn.last_insert_rowid();
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM personal_access_tokens WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![id], token_from_row)?)
    }

    pub fn find_token(&self, id: i64) -> Result<Option<AccessToken>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM personal_access_tokens WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], token_from_row)
            .optional()?)
    }

    pub fn touch_token(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE personal_access_tokens SET last_used_at = ?1 WHERE id = ?2",
            params![timestamp(), id],
        )?;
        Ok(())
    }

    /// Returns whether a token was removed.
    /// Drop every token whose expiry has passed. Returns how many went.
    pub fn purge_expired_tokens(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM personal_access_tokens WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![timestamp()],
        )?)
    }

    pub fn delete_token(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM personal_access_tokens WHERE id = ?1", params![id])?;
        Ok(removed > 0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            name: "Someone".into(),
            email: email.to_string(),
            role,
            password_hash: "not-a-real-hash".into(),
        }
    }

    #[test]
    fn test_create_user_and_find_credentials() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let user = db.create_user(&new_user("admin@school.test", Role::Admin))?;
        let (found, hash) = db.find_user_credentials(" ADMIN@school.test ")?.unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.role, Role::Admin);
        assert_eq!(hash, "not-a-real-hash");
        assert!(db.find_user_credentials("nobody@school.test")?.is_none());
        Ok(())
    }

    #[test]
    fn test_user_email_is_unique() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        db.create_user(&new_user("a@school.test", Role::Student))?;
        let err = db
            .create_user(&new_user("a@school.test", Role::Teacher))
            .unwrap_err();
        assert!(matches!(err, SchoolError::DuplicateEmail { .. }));
        Ok(())
    }

    #[test]
    fn test_update_user_replaces_password_hash() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let user = db.create_user(&new_user("a@school.test", Role::Student))?;
        let updated = db.update_user(
            user.id,
            &UserChanges {
                role: Some(Role::Teacher),
                password_hash: Some("new-hash".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.role, Role::Teacher);
        let (_, hash) = db.find_user_credentials("a@school.test")?.unwrap();
        assert_eq!(hash, "new-hash");
        Ok(())
    }

    #[test]
    fn test_list_users_by_role() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        db.create_user(&new_user("admin@school.test", Role::Admin))?;
        db.create_user(&new_user("s1@school.test", Role::Student))?;
        db.create_user(&new_user("s2@school.test", Role::Student))?;
        let filter = UserFilter {
            role: Some(Role::Student),
            ..Default::default()
        };
        assert_eq!(db.list_users(&filter, PageRequest::default())?.pagination.total, 2);
        let filter = UserFilter {
            search: Some("admin".into()),
            ..Default::default()
        };
        assert_eq!(db.list_users(&filter, PageRequest::default())?.items.len(), 1);
        Ok(())
    }

    #[test]
    fn test_token_lifecycle_and_cascade() -> Result<()> {
        let db = SchoolDb::new_in_memory()?;
        let user = db.create_user(&new_user("a@school.test", Role::Student))?;
        let token = db.create_token(user.id, "auth_token", "abc123", None)?;
        assert!(token.last_used_at.is_none());

        db.touch_token(token.id)?;
        assert!(db.find_token(token.id)?.unwrap().last_used_at.is_some());

        let second = db.create_token(user.id, "auth_token", "def456", None)?;
        assert!(db.delete_token(token.id)?);
        assert!(!db.delete_token(token.id)?);

        db.delete_user(user.id)?;
        assert!(db.find_token(second.id)?.is_none());
        Ok(())
    }
}

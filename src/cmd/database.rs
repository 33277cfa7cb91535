//! Database maintenance commands: `init-db` and `create-admin`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use schoolhouse::config::AppConfig;
use schoolhouse::school::auth::hash_password;
use schoolhouse::school::db::SchoolDb;
use schoolhouse::school::models::{NewUser, Role};

const MIN_PASSWORD_LEN: usize = 8;

pub fn apply_db_path(config: &mut AppConfig, db_path: Option<PathBuf>) {
    if let Some(path) = db_path {
        config.database.path = path;
    }
}

fn open(config: &AppConfig) -> Result<SchoolDb> {
    let path = &config.database.path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    SchoolDb::open(path, config.database.busy_timeout())
        .with_context(|| format!("Failed to initialize database at {}", path.display()))
}

pub fn cmd_init_db(config: &AppConfig) -> Result<()> {
    open(config)?;
    println!("Database initialized at {}", config.database.path.display());
    Ok(())
}

pub fn cmd_create_admin(config: &AppConfig, name: &str, email: &str, password: &str) -> Result<()> {
    let name = name.trim();
    let email = email.trim();
    if name.is_empty() || email.is_empty() {
        bail!("Name and email must not be empty");
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        bail!("Password must be at least {MIN_PASSWORD_LEN} characters");
    }

    let db = open(config)?;
    let user = db
        .create_user(&NewUser {
            name: name.to_string(),
            email: email.to_string(),
            role: Role::Admin,
            password_hash: hash_password(password)?,
        })
        .with_context(|| format!("Failed to create admin {email}"))?;
    println!("Admin {} created (id {})", user.email, user.id);
    Ok(())
}

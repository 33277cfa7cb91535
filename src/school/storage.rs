//! Local-disk file store for avatars.
//!
//! Paths handed out and persisted are relative (`avatars/students/<uuid>.png`);
//! `url` turns them into absolute links served by `GET /storage/{*path}`.

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

use crate::errors::{Result, SchoolError};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Request field every upload error is reported under.
const UPLOAD_FIELD: &str = "avatar";

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    base_url: String,
    url_prefix: String,
    max_upload_bytes: usize,
}

impl LocalStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        base_url: &str,
        url_prefix: &str,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            url_prefix: url_prefix.trim_matches('/').to_string(),
            max_upload_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Validate and write an upload, returning its relative path.
    pub async fn put(&self, folder: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|e| ALLOWED_EXTENSIONS.contains(&e.as_str()))
            .ok_or_else(|| {
                SchoolError::validation(
                    UPLOAD_FIELD,
                    format!("The avatar must be a file of type: {}.", ALLOWED_EXTENSIONS.join(", ")),
                )
            })?;
        if bytes.is_empty() {
            return Err(SchoolError::validation(UPLOAD_FIELD, "The avatar file is empty."));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(SchoolError::validation(
                UPLOAD_FIELD,
                format!(
                    "The avatar may not be greater than {} kilobytes.",
                    self.max_upload_bytes / 1024
                ),
            ));
        }

        let folder = folder.trim_matches('/');
        let relative = format!("{folder}/{}.{extension}", Uuid::new_v4());
        let full = self.root.join(&relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))?;
        tracing::info!(path = %relative, bytes = bytes.len(), "file stored");
        Ok(relative)
    }

    /// Best-effort delete. A missing file or a failed removal is logged,
    /// never returned.
    pub async fn remove(&self, path: &str) {
        let Some(full) = self.resolve(path) else {
            tracing::warn!(path, "refusing to remove path outside storage root");
            return;
        };
        match tokio::fs::remove_file(&full).await {
            Ok(()) => tracing::debug!(path, "file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path, error = %e, "failed to remove stored file"),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.url_prefix,
            path.trim_start_matches('/')
        )
    }

    /// Map a relative storage path onto disk. `None` for absolute paths
    /// and anything containing `..`.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        (safe && !path.is_empty()).then(|| self.root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, "http://localhost:8000/", "/storage/", 16)
    }

    #[tokio::test]
    async fn test_put_writes_under_folder_with_uuid_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        let path = store.put("avatars/students", "Me.PNG", b"pngdata").await.unwrap();
        assert!(path.starts_with("avatars/students/"));
        assert!(path.ends_with(".png"));
        assert_eq!(std::fs::read(dir.path().join(&path)).unwrap(), b"pngdata");
    }

    #[tokio::test]
    async fn test_put_rejects_bad_extension_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());

        let err = store.put("avatars", "script.exe", b"x").await.unwrap_err();
        match err {
            SchoolError::Validation(errors) => assert!(errors.get("avatar").is_some()),
            other => panic!("Expected Validation, got {other:?}"),
        }

        let err = store
            .put("avatars", "big.jpg", &[0u8; 17])
            .await
            .unwrap_err();
        assert!(matches!(err, SchoolError::Validation(_)));

        let err = store.put("avatars", "noext", b"x").await.unwrap_err();
        assert!(matches!(err, SchoolError::Validation(_)));
    }

    #[tokio::test]
    async fn test_remove_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        let path = store.put("avatars", "a.gif", b"gif").await.unwrap();
        store.remove(&path).await;
        assert!(!dir.path().join(&path).exists());
        // Second removal and traversal attempts are silent no-ops.
        store.remove(&path).await;
        store.remove("../outside.txt").await;
    }

    #[test]
    fn test_url_joins_base_prefix_and_path() {
        let store = LocalStorage::new("/tmp", "http://localhost:8000/", "/storage/", 1);
        assert_eq!(
            store.url("avatars/students/x.png"),
            "http://localhost:8000/storage/avatars/students/x.png"
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let store = LocalStorage::new("/srv/files", "http://x", "storage", 1);
        assert!(store.resolve("../etc/passwd").is_none());
        assert!(store.resolve("avatars/../../x").is_none());
        assert!(store.resolve("/etc/passwd").is_none());
        assert!(store.resolve("").is_none());
        assert_eq!(
            store.resolve("avatars/a.png"),
            Some(PathBuf::from("/srv/files/avatars/a.png"))
        );
    }
}

//! Layered runtime configuration.
//!
//! Resolution order, lowest to highest priority:
//! 1. Built-in defaults
//! 2. `schoolhouse.toml` (or the file passed with `--config`)
//! 3. `SCHOOLHOUSE_*` environment variables (a `.env` file is loaded first)
//! 4. Command-line flags, applied by the subcommand that owns them

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::school::storage::DEFAULT_MAX_UPLOAD_BYTES;

pub const DEFAULT_CONFIG_FILE: &str = "schoolhouse.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public origin used in avatar URLs. Derived from host and port when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            dev_mode: false,
        }
    }
}

impl ServerSection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn public_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.address()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/schoolhouse.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseSection {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_url_prefix() -> String {
    "storage".to_string()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            url_prefix: default_url_prefix(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthSection {
    /// Token lifetime in hours. 0 issues tokens that never expire.
    #[serde(default)]
    pub token_ttl_hours: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => bail!("Unknown log format '{}'. Valid formats: text, json", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Write daily-rolling log files here instead of stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

impl AppConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse schoolhouse.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    /// Read `explicit` if given (it must exist), else `./schoolhouse.toml`
    /// when present, else the defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Full resolution of file and environment layers.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        let mut config = Self::load_or_default(explicit)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `SCHOOLHOUSE_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("SCHOOLHOUSE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("SCHOOLHOUSE_PORT") {
            self.server.port = parse_var("SCHOOLHOUSE_PORT", &port)?;
        }
        if let Some(url) = get("SCHOOLHOUSE_BASE_URL") {
            self.server.base_url = Some(url);
        }
        if let Some(path) = get("SCHOOLHOUSE_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(root) = get("SCHOOLHOUSE_STORAGE_DIR") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(bytes) = get("SCHOOLHOUSE_MAX_UPLOAD_BYTES") {
            self.storage.max_upload_bytes = parse_var("SCHOOLHOUSE_MAX_UPLOAD_BYTES", &bytes)?;
        }
        if let Some(hours) = get("SCHOOLHOUSE_TOKEN_TTL_HOURS") {
            self.auth.token_ttl_hours = parse_var("SCHOOLHOUSE_TOKEN_TTL_HOURS", &hours)?;
        }
        if let Some(level) = get("SCHOOLHOUSE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = get("SCHOOLHOUSE_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Some(dir) = get("SCHOOLHOUSE_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if self.storage.max_upload_bytes == 0 {
            errors.push("storage.max_upload_bytes must be greater than 0".to_string());
        }
        if self.storage.url_prefix.trim_matches('/').is_empty() {
            errors.push("storage.url_prefix must not be empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            bail!("Invalid configuration:\n  {}", errors.join("\n  "))
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {key}: '{value}'"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.address(), "127.0.0.1:8000");
        assert_eq!(config.server.public_base_url(), "http://127.0.0.1:8000");
        assert_eq!(config.database.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.storage.max_upload_bytes, 2 * 1024 * 1024);
        assert_eq!(config.auth.token_ttl_hours, 0);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = AppConfig::parse(
            r#"
            [server]
            port = 9000
            base_url = "https://school.example/"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.public_base_url(), "https://school.example");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.database, DatabaseSection::default());
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(AppConfig::parse("[server]\nport = \"eighty\"").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::parse("[server]\nport = 9000").unwrap();
        config
            .apply_env(env(&[
                ("SCHOOLHOUSE_PORT", "9100"),
                ("SCHOOLHOUSE_DB_PATH", "/tmp/school.db"),
                ("SCHOOLHOUSE_TOKEN_TTL_HOURS", "24"),
                ("SCHOOLHOUSE_LOG_FORMAT", "JSON"),
                ("SCHOOLHOUSE_HOST", "  "),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.path, PathBuf::from("/tmp/school.db"));
        assert_eq!(config.auth.token_ttl_hours, 24);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("SCHOOLHOUSE_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("SCHOOLHOUSE_PORT"));
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        config.storage.max_upload_bytes = 0;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("server.port"));
        assert!(message.contains("max_upload_bytes"));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load_or_default(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schoolhouse.toml");
        std::fs::write(&path, "[auth]\ntoken_ttl_hours = 12\n").unwrap();
        let config = AppConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.auth.token_ttl_hours, 12);
    }
}

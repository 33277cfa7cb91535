//! API server command: `schoolhouse serve`.

use std::path::PathBuf;

use anyhow::Result;
use schoolhouse::config::AppConfig;

use super::apply_db_path;

/// Command-line flags are the last configuration layer.
pub fn apply_serve_overrides(
    config: &mut AppConfig,
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    apply_db_path(config, db_path);
    config.server.dev_mode |= dev;
}

pub async fn cmd_serve(config: &AppConfig) -> Result<()> {
    config.validate()?;
    schoolhouse::school::server::start_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = AppConfig::default();
        apply_serve_overrides(
            &mut config,
            Some("0.0.0.0".into()),
            Some(9000),
            Some(PathBuf::from("/tmp/x.db")),
            true,
        );
        assert_eq!(config.server.address(), "0.0.0.0:9000");
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert!(config.server.dev_mode);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let mut config = AppConfig::default();
        config.server.dev_mode = true;
        apply_serve_overrides(&mut config, None, None, None, false);
        assert_eq!(config, {
            let mut expected = AppConfig::default();
            expected.server.dev_mode = true;
            expected
        });
    }
}

//! Loads [`GatewayConfig`] from disk, with environment overrides for the
//! bind address and a couple of guard rails against malformed or oversized
//! config files.

use std::io::Read;
use std::path::Path;

use crate::models::settings::GatewayConfig;

const MAX_CONFIG_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("config path escapes the working directory: {0}")]
    PathTraversal(String),
    #[error("config file too large ({size} bytes, max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config validation failed: {0}")]
    Invalid(String),
}

/// Loads configuration from `KAIROS_CONFIG_PATH` (default `./config.json`),
/// applying `KAIROS_HOST`/`KAIROS_PORT` overrides and running
/// [`GatewayConfig::validate`] before returning.
pub fn load_settings() -> Result<GatewayConfig, SettingsError> {
    let path = std::env::var("KAIROS_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());
    let mut config = load_from_path(&path)?;

    if let Ok(host) = std::env::var("KAIROS_HOST") {
        config.bind_host = host;
    }
    if let Ok(port) = std::env::var("KAIROS_PORT") {
        if let Ok(port) = port.parse::<u16>() {
            config.bind_port = port;
        } else {
            log::warn!("KAIROS_PORT={} is not a valid port, ignoring", port);
        }
    }

    config
        .validate()
        .map_err(SettingsError::Invalid)?;

    Ok(config)
}

/// Reads and parses a config file at `path`, guarding against path traversal
/// outside the current working directory and against unreasonably large files.
pub fn load_from_path(path: &str) -> Result<GatewayConfig, SettingsError> {
    let canonical = Path::new(path);
    if canonical.components().any(|c| c.as_os_str() == "..") {
        return Err(SettingsError::PathTraversal(path.to_string()));
    }

    let mut file = std::fs::File::open(canonical).map_err(|e| SettingsError::Io {
        path: path.to_string(),
        source: e,
    })?;

    let size = file
        .metadata()
        .map_err(|e| SettingsError::Io {
            path: path.to_string(),
            source: e,
        })?
        .len();
    if size > MAX_CONFIG_BYTES {
        return Err(SettingsError::TooLarge {
            size,
            max: MAX_CONFIG_BYTES,
        });
    }

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| SettingsError::Io {
            path: path.to_string(),
            source: e,
        })?;

    serde_json::from_str(&contents).map_err(|e| SettingsError::Parse {
        path: path.to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_minimal_valid_config() {
        let file = write_temp(
            r#"{
                "version": 1,
                "services": {"orders": [{"id": "a", "host": "127.0.0.1", "port": 9000}]},
                "routes": [{"path": "/api/v1/orders", "match_type": "prefix", "service": "orders"}]
            }"#,
        );
        let config = load_from_path(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.bind_port, 5900);
    }

    #[test]
    fn rejects_path_traversal() {
        let result = load_from_path("../../etc/passwd");
        assert!(matches!(result, Err(SettingsError::PathTraversal(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        let file = write_temp("not json");
        let result = load_from_path(file.path().to_str().unwrap());
        assert!(matches!(result, Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = load_from_path("/nonexistent/path/to/config.json");
        assert!(matches!(result, Err(SettingsError::Io { .. })));
    }
}

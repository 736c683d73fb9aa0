//! Configuration file loading.

use crate::config::{Config, validate_config};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Read and parse a YAML configuration file without validating it.
///
/// Used when the caller still has overrides to apply (command line flags)
/// before the result is validated.
pub fn parse_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Load configuration from a YAML file.
///
/// This function reads the file, parses the YAML, and validates the configuration.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let config = parse_config(path)?;
    validate_config(&config).map_err(ConfigError::ValidationError)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthCheckMode;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
backends:
  - address: "http://127.0.0.1:9001"
  - address: "http://127.0.0.1:9002"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].address, "http://127.0.0.1:9002");
        assert_eq!(config.listen.port(), 8000);
    }

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
global:
  log_level: debug
  log_format: json
listen: "127.0.0.1:8080"
backends:
  - address: "http://10.0.0.1:80/app"
health_check:
  mode: background
  path: /healthz
  timeout: 2s
  interval: 15s
proxy:
  connect_timeout: 3s
  request_headers:
    X-Proxy: rrlb
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.health_check.mode, HealthCheckMode::Background);
        assert_eq!(config.health_check.path.as_deref(), Some("/healthz"));
        assert_eq!(config.health_check.interval, Duration::from_secs(15));
        assert_eq!(config.proxy.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.proxy.request_headers.get("X-Proxy").unwrap(), "rrlb");
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: {{{}}}").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_parse_skips_validation() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"backends: []\n").unwrap();

        assert!(parse_config(file.path()).is_ok());
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }
}

//! Configuration validation.

use crate::backend::parse_address;
use crate::config::Config;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - Every backend address is an absolute `http://` URI
/// - No duplicate backend addresses
/// - Sane health check and proxy settings
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        match parse_address(&backend.address) {
            Ok(uri) => {
                if !seen.insert(uri.to_string()) {
                    errors.push(format!("duplicate backend address: {}", backend.address));
                }
            }
            Err(e) => errors.push(e.to_string()),
        }
    }

    let hc = &config.health_check;
    if let Some(ref path) = hc.path {
        if !path.starts_with('/') {
            errors.push(format!("health check path '{}' must start with '/'", path));
        }
    }
    if !(100..=599).contains(&hc.expected_status) {
        errors.push(format!(
            "health check expected_status {} is not a valid HTTP status",
            hc.expected_status
        ));
    }
    if hc.timeout.is_zero() {
        errors.push("health check timeout must be greater than zero".to_string());
    }
    if hc.interval.is_zero() {
        errors.push("health check interval must be greater than zero".to_string());
    }
    if hc.unhealthy_threshold == 0 || hc.healthy_threshold == 0 {
        errors.push("health check thresholds must be >= 1".to_string());
    }

    if config.proxy.connect_timeout.is_zero() {
        errors.push("proxy connect_timeout must be greater than zero".to_string());
    }
    if config.proxy.selection_timeout.is_some_and(|d| d.is_zero()) {
        errors.push("proxy selection_timeout must be greater than zero when set".to_string());
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use std::time::Duration;

    fn minimal_config() -> Config {
        Config {
            backends: vec![
                BackendConfig::new("http://127.0.0.1:9001"),
                BackendConfig::new("http://127.0.0.1:9002"),
            ],
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&minimal_config()).is_ok());
    }

    #[test]
    fn test_no_backends() {
        let mut config = minimal_config();
        config.backends.clear();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("at least one backend"));
    }

    #[test]
    fn test_malformed_backend_address() {
        let mut config = minimal_config();
        config.backends.push(BackendConfig::new("not a uri"));
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("not a uri"));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let mut config = minimal_config();
        config.backends[0].address = "ftp://127.0.0.1:21".to_string();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("scheme"));
    }

    #[test]
    fn test_duplicate_backend_address() {
        let mut config = minimal_config();
        config.backends.push(BackendConfig::new("http://127.0.0.1:9001"));
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("duplicate backend address"));
    }

    #[test]
    fn test_relative_health_path() {
        let mut config = minimal_config();
        config.health_check.path = Some("healthz".to_string());
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("must start with '/'"));
    }

    #[test]
    fn test_zero_thresholds_and_timeouts() {
        let mut config = minimal_config();
        config.health_check.unhealthy_threshold = 0;
        config.health_check.timeout = Duration::ZERO;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("thresholds"));
        assert!(err.contains("timeout"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = minimal_config();
        config.global.log_level = "loud".to_string();
        assert!(validate_config(&config).unwrap_err().contains("invalid log level"));
    }
}

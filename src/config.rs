//! TOML configuration for the monitor CLI: sensible defaults, environment
//! variable override for the config file path, and a standard system
//! location.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Root configuration for the monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MonitorConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded monitor configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `ATHENA_MONITOR_CONFIG` environment variable.
    /// 2. `/etc/athena-monitor/config.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("ATHENA_MONITOR_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ATHENA_MONITOR_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/athena-monitor/config.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

/// Execution service endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the execution service.
    pub base_url: String,
    /// Request timeout for plain REST calls (seconds). Does not apply to the
    /// progress stream, which stays open for the life of an execution.
    pub timeout_sec: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_sec: 30,
        }
    }
}

/// Snapshot poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval between snapshot fetches while an execution is non-terminal.
    pub interval_ms: u64,
    /// Default page size for execution history listings.
    pub list_limit: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            list_limit: 20,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.api.base_url, "http://127.0.0.1:8000");
        assert_eq!(cfg.api.timeout_sec, 30);
        assert_eq!(cfg.poll.interval_ms, 2000);
        assert_eq!(cfg.poll.list_limit, 20);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[api]
base_url = "https://athena.internal:8443"
timeout_sec = 10

[poll]
interval_ms = 500
list_limit = 50

[logging]
level = "debug"
"#;
        let cfg: MonitorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.api.base_url, "https://athena.internal:8443");
        assert_eq!(cfg.api.timeout_sec, 10);
        assert_eq!(cfg.poll.interval_ms, 500);
        assert_eq!(cfg.poll.list_limit, 50);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: MonitorConfig = toml::from_str("[poll]\ninterval_ms = 100\n").unwrap();
        assert_eq!(cfg.poll.interval_ms, 100);
        assert_eq!(cfg.poll.list_limit, 20);
        assert_eq!(cfg.api.base_url, "http://127.0.0.1:8000");
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: MonitorConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.api.timeout_sec, MonitorConfig::default().api.timeout_sec);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\nbase_url = \"http://10.0.0.5:8000\"\n").unwrap();

        let cfg = MonitorConfig::load(&path).unwrap();
        assert_eq!(cfg.api.base_url, "http://10.0.0.5:8000");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(MonitorConfig::load(Path::new("/nonexistent/athena/config.toml")).is_err());
    }
}

//! # Configuration
//!
//! Layered settings for the cvlive binary, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config <path>`, or `cvlive.toml` in the working
//!    directory if present)
//! 3. Environment (`CVLIVE_SERVICE_URL`, `CVLIVE_API_KEY`,
//!    `CVLIVE_CORS_ORIGINS`)
//! 4. CLI flags, applied by the `cli` module

use cvlive_core::CvliveError;
use cvlive_core::primitives::ERROR_FLAG_INTERVAL_MS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file picked up implicitly when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "cvlive.toml";

/// Maximum accepted config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the compute service.
    pub service_url: String,
    /// Per-request timeout for compute-service calls.
    pub request_timeout_secs: u64,
    /// How long a node stays flagged after a compute failure.
    pub error_flag_secs: u64,
    /// Chart file loaded at startup and rewritten after every pass.
    pub chart: PathBuf,
    /// HTTP API bind host.
    pub host: String,
    /// HTTP API bind port.
    pub port: u16,
    /// Bearer token required by the HTTP API. Disabled when unset.
    pub api_key: Option<String>,
    /// Comma-separated CORS origins, or `*`.
    pub cors_origins: Option<String>,
    /// Whether every edit through the API requests a pass.
    pub auto_refresh: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:5000".to_string(),
            request_timeout_secs: 120,
            error_flag_secs: ERROR_FLAG_INTERVAL_MS / 1000,
            chart: PathBuf::from("chart.json"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: None,
            cors_origins: None,
            auto_refresh: true,
        }
    }
}

impl Config {
    /// Load defaults, then the TOML file, then the process environment.
    ///
    /// An explicit `path` must exist; the implicit `cvlive.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, CvliveError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Read a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, CvliveError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            CvliveError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(CvliveError::SerializationError(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            CvliveError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML text; missing fields keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, CvliveError> {
        toml::from_str(text)
            .map_err(|e| CvliveError::SerializationError(format!("Invalid config: {}", e)))
    }

    /// Overlay environment variables. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        if let Some(url) = get("CVLIVE_SERVICE_URL") {
            self.service_url = url;
        }
        if let Some(key) = get("CVLIVE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(origins) = get("CVLIVE_CORS_ORIGINS") {
            self.cors_origins = Some(origins);
        }
    }

    /// Service URL without a trailing slash.
    #[must_use]
    pub fn service_base(&self) -> &str {
        self.service_url.trim_end_matches('/')
    }

    /// Compute-service request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Transient error flag interval.
    #[must_use]
    pub fn error_flag_interval(&self) -> Duration {
        Duration::from_secs(self.error_flag_secs)
    }

    /// `host:port` for the HTTP listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn defaults_match_engine_constants() {
        let config = Config::default();
        assert_eq!(config.error_flag_interval(), Duration::from_millis(3000));
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert!(config.auto_refresh);
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let config = Config::from_toml_str(
            r#"
            service_url = "http://cv.local:9000/"
            port = 9090
            "#,
        )
        .expect("parse");
        assert_eq!(config.service_base(), "http://cv.local:9000");
        assert_eq!(config.port, 9090);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn unknown_toml_field_is_rejected() {
        assert!(Config::from_toml_str("sevice_url = \"typo\"").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: BTreeMap<&str, &str> = [
            ("CVLIVE_SERVICE_URL", "http://env:1"),
            ("CVLIVE_API_KEY", "secret"),
            ("CVLIVE_CORS_ORIGINS", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::from_toml_str("service_url = \"http://file:2\"").expect("parse");
        config.apply_env(|name| env.get(name).map(|v| (*v).to_string()));

        assert_eq!(config.service_url, "http://env:1");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.cors_origins, None);
    }

    #[test]
    fn explicit_missing_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cvlive.toml");
        std::fs::write(&path, "error_flag_secs = 5\nauto_refresh = false\n").expect("write");
        let config = Config::from_file(&path).expect("load");
        assert_eq!(config.error_flag_secs, 5);
        assert!(!config.auto_refresh);
    }
}

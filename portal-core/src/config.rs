//! Configuration management

use crate::async_utils::{RetryConfig, DEFAULT_CALL_TIMEOUT_MS};
use crate::error::{ErrorContext, PortalError, PortalResult, NON_RETRYABLE_CODES};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `backend.url`
pub const ENV_BACKEND_URL: &str = "PORTAL_BACKEND_URL";
/// Environment variable overriding `backend.anon_key`
pub const ENV_ANON_KEY: &str = "PORTAL_ANON_KEY";

/// Top-level portal configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub backend: BackendConfig,
    pub access: AccessConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Where the hosted backend lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    /// Public API key sent with every request
    pub anon_key: String,
    /// Transport-level timeout, independent of the per-read ceiling
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Timeout and retry policy of the data-access layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub query_timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Backend codes the retry loop never repeats. `PGRST116` and `22P02`
    /// are final whether listed or not.
    pub non_retryable_codes: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            query_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            max_retries: retry.max_retries,
            base_delay_ms: retry.base_delay_ms,
            max_delay_ms: retry.max_delay_ms,
            jitter: retry.jitter,
            non_retryable_codes: NON_RETRYABLE_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl AccessConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter: self.jitter,
            non_retryable_codes: self.non_retryable_codes.clone(),
        }
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on the loading state at startup
    pub bootstrap_timeout_ms: u64,
    /// Entry point users are sent to after sign-out
    pub sign_in_path: String,
    /// Collection holding the role attribute, keyed by user id
    pub role_table: String,
    pub role_column: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bootstrap_timeout_ms: 5_000,
            sign_in_path: "/login".to_string(),
            role_table: "users".to_string(),
            role_column: "role".to_string(),
        }
    }
}

/// Persisted local state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Key of the serialized auth session
    pub auth_storage_key: String,
    /// Key of the cached `{role, timestamp}` pair
    pub user_data_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.portal".to_string(),
            auth_storage_key: "portal-auth-token".to_string(),
            user_data_key: "portal-user-data".to_string(),
        }
    }
}

impl StorageConfig {
    /// `data_dir` with a leading `~` expanded
    pub fn resolved_data_dir(&self) -> PathBuf {
        match (self.data_dir.strip_prefix('~'), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
            _ => PathBuf::from(&self.data_dir),
        }
    }
}

impl PortalConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PortalResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PortalError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: PortalConfig = toml::from_str(&content).map_err(|e| PortalError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> PortalResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| PortalError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, content).map_err(|e| PortalError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Apply `PORTAL_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_BACKEND_URL) {
            self.backend.url = url;
        }
        if let Ok(key) = std::env::var(ENV_ANON_KEY) {
            self.backend.anon_key = key;
        }
        self
    }

    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("portal").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("portal.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> PortalResult<()> {
        if self.backend.url.trim().is_empty() {
            return Err(invalid("backend.url must not be empty", "Set backend.url"));
        }

        if self.access.query_timeout_ms == 0 {
            return Err(invalid(
                "access.query_timeout_ms must be greater than 0",
                "Set access.query_timeout_ms to a positive value",
            ));
        }

        if self.session.bootstrap_timeout_ms == 0 {
            return Err(invalid(
                "session.bootstrap_timeout_ms must be greater than 0",
                "Set session.bootstrap_timeout_ms to a positive value",
            ));
        }

        if self.storage.auth_storage_key == self.storage.user_data_key {
            return Err(invalid(
                "storage.auth_storage_key and storage.user_data_key must differ",
                "Use distinct keys for the auth session and the user-data cache",
            ));
        }

        if self.session.role_table.is_empty() || self.session.role_column.is_empty() {
            return Err(invalid(
                "session.role_table and session.role_column must be set",
                "Point the role lookup at the collection holding user roles",
            ));
        }

        Ok(())
    }
}

fn invalid(message: &str, suggestion: &str) -> PortalError {
    PortalError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("config")
            .with_operation("validate")
            .with_suggestion(suggestion),
    }
}

//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use civicair_core::grid::MIN_STEP_KM;
use civicair_core::{ReconcileOptions, RefreshOptions};

/// Environment variable that overrides `provider.api_key`.
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Upstream AQI provider.
    pub provider: ProviderConfig,
    /// Grid generation.
    pub grid: GridConfig,
    /// Background refresh sweep.
    pub refresh: RefreshConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file gives the defaults; a file that exists but cannot be
    /// read or parsed is an error.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_or_default(default_config_path())
    }

    /// Load configuration from `path`, or the defaults if it does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Take the API key from `OPENWEATHER_API_KEY` when it is set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.apply_api_key_override(Some(key));
        }
    }

    fn apply_api_key_override(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.provider.api_key = key;
        }
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Storage path is not empty
    /// - Provider base URL is http(s) and the timeout is 1-60 seconds
    /// - Grid step is in (0, 100] km and the point limit in 1-10000
    /// - Refresh interval is 1 minute to 1 day and concurrency 1-64
    ///
    /// The API key is checked when the provider client is built.
    ///
    /// # Example
    ///
    /// ```
    /// use civicair_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.provider.validate());
        errors.extend(self.grid.validate());
        errors.extend(self.refresh.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Reconciler options derived from this configuration.
    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions::default()
            .step_km(self.grid.step_km)
            .max_points(self.grid.max_points)
            .fetch_timeout(self.provider.timeout())
    }

    /// Refresh sweep options derived from this configuration.
    pub fn refresh_options(&self) -> RefreshOptions {
        RefreshOptions {
            concurrency: self.refresh.concurrency,
            fetch_timeout: self.provider.timeout(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        // Check for valid host:port format
        let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
        if parts.len() != 2 {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            ));
            return errors;
        }

        match parts[0].parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
            Err(_) => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid port '{}': must be a number 1-65535", parts[0]),
            )),
            Ok(_) => {}
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: civicair_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Upstream provider configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API root, without the `/data/2.5/...` path.
    pub base_url: String,
    /// OpenWeather API key.
    pub api_key: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Minimum provider timeout in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 1;
/// Maximum provider timeout in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 60;

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: civicair_core::openweather::DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout_secs: civicair_core::openweather::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ProviderConfig {
    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate provider configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(ValidationError::new(
                "provider.base_url",
                format!(
                    "URL must start with http:// or https://, got: '{}'",
                    self.base_url
                ),
            ));
        }

        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            errors.push(ValidationError::new(
                "provider.timeout_secs",
                format!(
                    "timeout {} is out of range ({}-{} seconds)",
                    self.timeout_secs, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
                ),
            ));
        }

        errors
    }
}

/// Grid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Distance between neighbouring grid points in kilometres.
    pub step_km: f64,
    /// Largest grid a single request may produce.
    pub max_points: usize,
}

/// Largest allowed grid step in kilometres.
pub const MAX_STEP_KM: f64 = 100.0;
/// Largest allowed value for `grid.max_points`.
pub const MAX_GRID_POINTS: usize = 10_000;

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            step_km: civicair_core::reconcile::DEFAULT_STEP_KM,
            max_points: civicair_core::reconcile::DEFAULT_MAX_POINTS,
        }
    }
}

impl GridConfig {
    /// Validate grid configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.step_km.is_finite() || self.step_km < MIN_STEP_KM || self.step_km > MAX_STEP_KM {
            errors.push(ValidationError::new(
                "grid.step_km",
                format!(
                    "step {} km is out of range ({} to {})",
                    self.step_km, MIN_STEP_KM, MAX_STEP_KM
                ),
            ));
        }

        if !(1..=MAX_GRID_POINTS).contains(&self.max_points) {
            errors.push(ValidationError::new(
                "grid.max_points",
                format!(
                    "max_points {} is out of range (1-{})",
                    self.max_points, MAX_GRID_POINTS
                ),
            ));
        }

        errors
    }
}

/// Background refresh configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Start the sweep with the server.
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Concurrent fetches per sweep.
    pub concurrency: usize,
}

/// Minimum refresh interval in seconds (1 minute).
pub const MIN_REFRESH_INTERVAL: u64 = 60;
/// Maximum refresh interval in seconds (1 day).
pub const MAX_REFRESH_INTERVAL: u64 = 86_400;
/// Maximum sweep concurrency.
pub const MAX_REFRESH_CONCURRENCY: usize = 64;

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 900,
            concurrency: civicair_core::refresh::DEFAULT_CONCURRENCY,
        }
    }
}

impl RefreshConfig {
    /// Time between sweeps.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate refresh configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_secs < MIN_REFRESH_INTERVAL {
            errors.push(ValidationError::new(
                "refresh.interval_secs",
                format!(
                    "interval {} is too short (minimum {} seconds)",
                    self.interval_secs, MIN_REFRESH_INTERVAL
                ),
            ));
        } else if self.interval_secs > MAX_REFRESH_INTERVAL {
            errors.push(ValidationError::new(
                "refresh.interval_secs",
                format!(
                    "interval {} is too long (maximum {} seconds / 1 day)",
                    self.interval_secs, MAX_REFRESH_INTERVAL
                ),
            ));
        }

        if !(1..=MAX_REFRESH_CONCURRENCY).contains(&self.concurrency) {
            errors.push(ValidationError::new(
                "refresh.concurrency",
                format!(
                    "concurrency {} is out of range (1-{})",
                    self.concurrency, MAX_REFRESH_CONCURRENCY
                ),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `grid.step_km`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("civicair")
        .join("server.toml")
}
